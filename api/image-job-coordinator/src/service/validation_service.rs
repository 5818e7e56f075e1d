use crate::module::image_job::error::AppError;
use crate::module::image_job::schema::{JobStatusRequest, SubmitJobsRequest};

pub const MAX_PROMPTS_PER_SUBMISSION: usize = 50;
pub const MAX_PROMPT_CHARS: usize = 4_000;
pub const MAX_STATUS_IDS: usize = 500;

/// A prompt that survived filtering, with its position in the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPrompt {
    pub index: usize,
    pub prompt: String,
}

/// Drops blank prompts and trims the rest. Fails if nothing is left.
pub fn validate_submit_request(req: &SubmitJobsRequest) -> Result<Vec<AcceptedPrompt>, AppError> {
    let prompts = req
        .prompts
        .as_ref()
        .ok_or_else(|| AppError::bad_request("INVALID_PROMPTS", "prompts is required"))?;
    if prompts.len() > MAX_PROMPTS_PER_SUBMISSION {
        return Err(AppError::bad_request(
            "TOO_MANY_PROMPTS",
            format!("at most {MAX_PROMPTS_PER_SUBMISSION} prompts per request"),
        ));
    }

    let accepted: Vec<AcceptedPrompt> = prompts
        .iter()
        .enumerate()
        .filter_map(|(index, prompt)| {
            let trimmed = prompt.trim();
            (!trimmed.is_empty()).then(|| AcceptedPrompt {
                index,
                prompt: trimmed.to_string(),
            })
        })
        .collect();
    if accepted.is_empty() {
        return Err(AppError::bad_request(
            "INVALID_PROMPTS",
            "at least one non-empty prompt is required",
        ));
    }
    if let Some(long) = accepted
        .iter()
        .find(|p| p.prompt.chars().count() > MAX_PROMPT_CHARS)
    {
        return Err(AppError::bad_request(
            "PROMPT_TOO_LONG",
            format!(
                "prompt {} exceeds {MAX_PROMPT_CHARS} characters",
                long.index
            ),
        ));
    }
    Ok(accepted)
}

/// Trims ids, drops blanks and duplicates, keeps request order.
pub fn validate_status_request(req: &JobStatusRequest) -> Result<Vec<String>, AppError> {
    let ids = req
        .job_ids
        .as_ref()
        .ok_or_else(|| AppError::bad_request("INVALID_JOB_IDS", "jobIds is required"))?;
    if ids.len() > MAX_STATUS_IDS {
        return Err(AppError::bad_request(
            "TOO_MANY_JOB_IDS",
            format!("at most {MAX_STATUS_IDS} job ids per request"),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    Ok(ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(prompts: Option<Vec<&str>>) -> SubmitJobsRequest {
        SubmitJobsRequest {
            prompts: prompts.map(|p| p.into_iter().map(str::to_string).collect()),
        }
    }

    #[test]
    fn blank_prompts_are_dropped_but_indices_are_kept() {
        let accepted = validate_submit_request(&submit(Some(vec!["  ", " A cat ", "", "dog"])))
            .unwrap();
        assert_eq!(
            accepted,
            vec![
                AcceptedPrompt {
                    index: 1,
                    prompt: "A cat".to_string()
                },
                AcceptedPrompt {
                    index: 3,
                    prompt: "dog".to_string()
                },
            ]
        );
    }

    #[test]
    fn missing_or_all_blank_prompts_are_rejected() {
        for req in [submit(None), submit(Some(vec![])), submit(Some(vec![" ", "\n"]))] {
            let err = validate_submit_request(&req).unwrap_err();
            assert_eq!(err.code, "INVALID_PROMPTS");
        }
    }

    #[test]
    fn status_ids_are_deduplicated_in_order() {
        let req = JobStatusRequest {
            job_ids: Some(vec![
                "b".to_string(),
                " a ".to_string(),
                "b".to_string(),
                "".to_string(),
            ]),
        };
        assert_eq!(validate_status_request(&req).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn status_ids_are_bounded_per_request() {
        let ids = |n: usize| JobStatusRequest {
            job_ids: Some((0..n).map(|i| format!("job-{i}")).collect()),
        };
        assert_eq!(
            validate_status_request(&ids(MAX_STATUS_IDS)).unwrap().len(),
            MAX_STATUS_IDS
        );
        let err = validate_status_request(&ids(MAX_STATUS_IDS + 1)).unwrap_err();
        assert_eq!(err.code, "TOO_MANY_JOB_IDS");
    }

    #[test]
    fn missing_status_ids_are_rejected() {
        let err = validate_status_request(&JobStatusRequest { job_ids: None }).unwrap_err();
        assert_eq!(err.code, "INVALID_JOB_IDS");
    }
}
