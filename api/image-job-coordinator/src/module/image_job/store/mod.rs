//! Durable job records.
//!
//! Two interchangeable backends implement [`JobStore`]: an in-process store
//! used when no Redis URL is configured, and a Redis store for deployments
//! where several processes share one queue.

mod memory_store;
mod redis_store;

pub use memory_store::MemoryJobStore;
pub use redis_store::RedisJobStore;

use super::model::{ImageJobRecord, JobOutcome, StatusCounts};
use super::schema::JobStatus;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store unavailable: {0}")]
    Unavailable(String),

    #[error("job record decode failed: {0}")]
    Decode(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job id already exists: {0}")]
    Duplicate(String),

    #[error("cannot transition job {job_id} from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("job store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub(crate) fn invalid_transition(job_id: &str, from: JobStatus, to: JobStatus) -> Self {
        Self::InvalidTransition {
            job_id: job_id.to_string(),
            from: from.as_str(),
            to: to.as_str(),
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Short backend name reported by the health endpoint.
    fn backend(&self) -> &'static str;

    /// Maximum number of ids one `batch_get` round-trip may carry.
    fn batch_limit(&self) -> usize;

    async fn insert(&self, job: &ImageJobRecord) -> Result<(), StoreError>;

    async fn get(&self, job_id: &str) -> Result<Option<ImageJobRecord>, StoreError>;

    /// Most recently created COMPLETED job with a non-empty image for `fingerprint`.
    async fn find_cached(&self, fingerprint: &str) -> Result<Option<ImageJobRecord>, StoreError>;

    /// Exclusively claims the oldest PENDING job and moves it to PROCESSING.
    ///
    /// Concurrent callers never receive the same job.
    async fn claim_next_pending(&self) -> Result<Option<ImageJobRecord>, StoreError>;

    /// Applies an outcome to a PROCESSING job.
    async fn finish(&self, job_id: &str, outcome: JobOutcome)
        -> Result<ImageJobRecord, StoreError>;

    /// Reads up to `batch_limit` jobs. Unknown ids are skipped.
    async fn batch_get(&self, job_ids: &[String]) -> Result<Vec<ImageJobRecord>, StoreError>;

    async fn status_counts(&self) -> Result<StatusCounts, StoreError>;
}

/// Reads any number of ids by splitting them into `batch_limit` sized calls.
pub async fn batch_get_chunked(
    store: &dyn JobStore,
    job_ids: &[String],
) -> Result<Vec<ImageJobRecord>, StoreError> {
    let limit = store.batch_limit().max(1);
    let mut jobs = Vec::with_capacity(job_ids.len());
    for chunk in job_ids.chunks(limit) {
        jobs.extend(store.batch_get(chunk).await?);
    }
    Ok(jobs)
}

/// Applies `outcome` to `job` in place, enforcing the state machine.
pub(crate) fn apply_outcome(
    job: &mut ImageJobRecord,
    outcome: JobOutcome,
    now: i64,
) -> Result<(), StoreError> {
    let target = outcome.target_status();
    if !super::model::is_valid_transition(job.status, target) {
        return Err(StoreError::invalid_transition(&job.id, job.status, target));
    }
    match outcome {
        JobOutcome::Completed { image_result } => {
            job.image_result = Some(image_result);
            job.error_message = None;
        }
        JobOutcome::Failed { message } => {
            job.image_result = None;
            job.error_message = Some(message);
        }
        JobOutcome::Retry => {}
    }
    job.status = target;
    job.updated_at = now;
    Ok(())
}
