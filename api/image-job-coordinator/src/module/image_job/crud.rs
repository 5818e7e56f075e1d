use super::error::AppError;
use super::model::{CACHE_HIT_MARKER, ImageJobRecord, QueueMessage};
use super::schema::{
    JobStatus, JobStatusRequest, JobStatusResponse, JobStatusView, ProcessJobResponse, PromptResult,
    SubmitJobsRequest, SubmitJobsResponse,
};
use super::store::batch_get_chunked;
use crate::app::AppState;
use crate::service::fingerprint_service::fingerprint;
use crate::service::metrics_service;
use crate::service::validation_service::{validate_status_request, validate_submit_request};
use crate::service::worker_service::{self, CycleOutcome};
use chrono::Utc;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

const NO_PENDING_JOBS: &str = "No pending jobs";

#[derive(Debug, Clone, PartialEq, Eq)]
struct SubmittedJob {
    job_id: String,
    cached: bool,
}

/// Creates one job per non-blank prompt. Prompts are handled concurrently and
/// independently: a failed prompt is reported in `results` and leaves the
/// others untouched.
pub async fn submit_jobs(
    state: &AppState,
    user_id: &str,
    req: SubmitJobsRequest,
) -> Result<SubmitJobsResponse, AppError> {
    let accepted = validate_submit_request(&req)?;

    let handles: Vec<_> = accepted
        .into_iter()
        .map(|item| {
            let state = state.clone();
            let user_id = user_id.to_string();
            let handle =
                tokio::spawn(async move { submit_prompt(&state, &user_id, item.prompt).await });
            (item.index, handle)
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (prompt_index, handle) in handles {
        let outcome = handle.await.unwrap_or_else(|e| {
            Err(AppError::internal(
                "SUBMISSION_TASK_FAILED",
                format!("prompt task aborted: {e}"),
            ))
        });
        results.push(match outcome {
            Ok(job) => PromptResult {
                prompt_index,
                job_id: Some(job.job_id),
                cached: job.cached,
                error_code: None,
                reason: None,
            },
            Err(err) => {
                warn!(prompt_index, error_code = err.code, reason = %err.message, "prompt submission failed");
                PromptResult {
                    prompt_index,
                    job_id: None,
                    cached: false,
                    error_code: Some(err.code.to_string()),
                    reason: Some(err.message),
                }
            }
        });
    }

    let job_ids: Vec<String> = results.iter().filter_map(|r| r.job_id.clone()).collect();
    if results.iter().any(|r| r.job_id.is_some() && !r.cached) {
        state.worker_signal.notify_one();
    }

    let failed = results.len() - job_ids.len();
    let (error_code, reason) = match (job_ids.len(), failed) {
        (_, 0) => (None, "image jobs accepted".to_string()),
        (0, _) => (
            results.iter().find_map(|r| r.error_code.clone()),
            "no image job could be created".to_string(),
        ),
        (_, failed) => (
            Some("PARTIAL_SUBMISSION".to_string()),
            format!("{failed} prompt(s) could not be submitted"),
        ),
    };
    Ok(SubmitJobsResponse {
        job_ids,
        results,
        error_code,
        reason,
    })
}

async fn submit_prompt(
    state: &AppState,
    user_id: &str,
    prompt: String,
) -> Result<SubmittedJob, AppError> {
    let prompt_fingerprint = fingerprint(&prompt);
    let cached = match state.store.find_cached(&prompt_fingerprint).await {
        Ok(hit) => hit,
        Err(e) => {
            warn!(fingerprint = %prompt_fingerprint, error = %e, "cache lookup failed; treating as miss");
            None
        }
    };

    let now = Utc::now().timestamp_millis();
    let mut job = ImageJobRecord {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        prompt,
        prompt_fingerprint,
        status: JobStatus::Pending,
        image_result: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    };

    if let Some(source) = cached {
        job.status = JobStatus::Completed;
        job.image_result = source.image_result;
        job.error_message = Some(CACHE_HIT_MARKER.to_string());
        state.store.insert(&job).await?;
        metrics_service::inc_cache_hits();
        info!(job_id = %job.id, source_job_id = %source.id, "image job served from cache");
        return Ok(SubmittedJob {
            job_id: job.id,
            cached: true,
        });
    }

    state.store.insert(&job).await?;
    metrics_service::inc_jobs_submitted();

    let message = QueueMessage {
        job_id: job.id.clone(),
        prompt: job.prompt.clone(),
        user_id: job.user_id.clone(),
    };
    // The pending index still drives the workers, so a lost queue message only
    // delays pickup until the next poll tick.
    if let Err(e) = state.queue.enqueue(&message).await {
        warn!(job_id = %job.id, error = %e, "queue enqueue failed; job left for polling workers");
        metrics_service::set_last_error_ts(Utc::now().timestamp());
    }
    info!(job_id = %job.id, "image job queued");

    Ok(SubmittedJob {
        job_id: job.id,
        cached: false,
    })
}

/// Returns the caller's jobs among `job_ids`, in request order. Unknown ids
/// and ids owned by someone else are omitted.
pub async fn query_status(
    state: &AppState,
    user_id: &str,
    req: JobStatusRequest,
) -> Result<JobStatusResponse, AppError> {
    let job_ids = validate_status_request(&req)?;
    if job_ids.is_empty() {
        return Ok(JobStatusResponse {
            jobs: Vec::new(),
            error_code: None,
            reason: "no job ids requested".to_string(),
        });
    }

    let records = batch_get_chunked(state.store.as_ref(), &job_ids).await?;
    let mut owned: HashMap<String, ImageJobRecord> = records
        .into_iter()
        .filter(|job| job.user_id == user_id)
        .map(|job| (job.id.clone(), job))
        .collect();
    let jobs: Vec<JobStatusView> = job_ids
        .iter()
        .filter_map(|id| owned.remove(id))
        .map(|job| job.to_view())
        .collect();

    Ok(JobStatusResponse {
        reason: format!("{} of {} jobs found", jobs.len(), job_ids.len()),
        jobs,
        error_code: None,
    })
}

pub async fn process_next(state: &AppState) -> Result<ProcessJobResponse, AppError> {
    let outcome = worker_service::trigger(state)
        .await
        .map_err(|e| AppError::internal("WORKER_CLAIM_FAILED", e.to_string()))?;
    Ok(match outcome {
        CycleOutcome::Idle | CycleOutcome::Deferred => ProcessJobResponse {
            processed: None,
            message: Some(NO_PENDING_JOBS.to_string()),
            outcome: None,
            error_code: None,
        },
        other => ProcessJobResponse {
            processed: other.job_id().map(str::to_string),
            message: None,
            outcome: Some(other.label().to_string()),
            error_code: None,
        },
    })
}
