use super::schema::{JobStatus, JobStatusView};
use serde::{Deserialize, Serialize};

/// Annotation written to `error_message` on jobs satisfied from the cache.
pub const CACHE_HIT_MARKER: &str = "CACHE_HIT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageJobRecord {
    pub id: String,
    pub user_id: String,
    pub prompt: String,
    pub prompt_fingerprint: String,
    pub status: JobStatus,
    pub image_result: Option<String>,
    pub error_message: Option<String>,
    /// Unix milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl ImageJobRecord {
    pub fn is_cache_candidate(&self) -> bool {
        self.status == JobStatus::Completed
            && self
                .image_result
                .as_deref()
                .is_some_and(|image| !image.trim().is_empty())
    }

    pub fn to_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id.clone(),
            status: self.status,
            image_url: self.image_result.clone(),
            error_message: self.error_message.clone(),
        }
    }
}

/// Result applied to a PROCESSING job once the external call returns.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { image_result: String },
    Failed { message: String },
    Retry,
}

impl JobOutcome {
    pub fn target_status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
            Self::Retry => JobStatus::Pending,
        }
    }
}

/// Work item carried from submission to the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub job_id: String,
    pub prompt: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn bump(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }
}

pub fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    matches!(
        (from, to),
        (JobStatus::Pending, JobStatus::Processing)
            | (JobStatus::Processing, JobStatus::Completed)
            | (JobStatus::Processing, JobStatus::Failed)
            | (JobStatus::Processing, JobStatus::Pending)
    )
}
