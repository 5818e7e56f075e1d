use super::{JobStore, StoreError, apply_outcome};
use crate::module::image_job::model::{ImageJobRecord, JobOutcome, StatusCounts};
use crate::module::image_job::schema::JobStatus;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

const MEMORY_BATCH_LIMIT: usize = 100;

#[derive(Debug)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryJobStoreInner>,
    batch_limit: usize,
}

#[derive(Debug, Default)]
struct MemoryJobStoreInner {
    jobs_by_id: HashMap<String, ImageJobRecord>,
    // (created_at, insertion sequence, job id); oldest first.
    pending: BTreeSet<(i64, u64, String)>,
    sequence_by_id: HashMap<String, u64>,
    completed_by_fingerprint: HashMap<String, Vec<String>>,
    next_sequence: u64,
}

impl MemoryJobStoreInner {
    fn index(&mut self, job: &ImageJobRecord) {
        let Some(seq) = self.sequence_by_id.get(&job.id).copied() else {
            return;
        };
        match job.status {
            JobStatus::Pending => {
                self.pending.insert((job.created_at, seq, job.id.clone()));
            }
            JobStatus::Completed if job.is_cache_candidate() => {
                self.completed_by_fingerprint
                    .entry(job.prompt_fingerprint.clone())
                    .or_default()
                    .push(job.id.clone());
            }
            _ => {}
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::with_batch_limit(MEMORY_BATCH_LIMIT)
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryJobStoreInner::default()),
            batch_limit: batch_limit.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryJobStoreInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn insert(&self, job: &ImageJobRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.jobs_by_id.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id.clone()));
        }
        let seq = inner.next_sequence;
        inner.next_sequence += 1;
        inner.sequence_by_id.insert(job.id.clone(), seq);
        inner.jobs_by_id.insert(job.id.clone(), job.clone());
        inner.index(job);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<ImageJobRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.jobs_by_id.get(job_id).cloned())
    }

    async fn find_cached(&self, fingerprint: &str) -> Result<Option<ImageJobRecord>, StoreError> {
        let inner = self.lock()?;
        let Some(ids) = inner.completed_by_fingerprint.get(fingerprint) else {
            return Ok(None);
        };
        let best = ids
            .iter()
            .filter_map(|id| {
                let job = inner.jobs_by_id.get(id)?;
                let seq = inner.sequence_by_id.get(id)?;
                job.is_cache_candidate().then_some((job.created_at, *seq, job))
            })
            .max_by_key(|(created_at, seq, _)| (*created_at, *seq))
            .map(|(_, _, job)| job.clone());
        Ok(best)
    }

    async fn claim_next_pending(&self) -> Result<Option<ImageJobRecord>, StoreError> {
        let mut inner = self.lock()?;
        while let Some(entry) = inner.pending.pop_first() {
            let now = Utc::now().timestamp_millis();
            let Some(job) = inner.jobs_by_id.get_mut(&entry.2) else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }
            job.status = JobStatus::Processing;
            job.updated_at = now;
            return Ok(Some(job.clone()));
        }
        Ok(None)
    }

    async fn finish(
        &self,
        job_id: &str,
        outcome: JobOutcome,
    ) -> Result<ImageJobRecord, StoreError> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs_by_id
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        apply_outcome(job, outcome, Utc::now().timestamp_millis())?;
        let job = job.clone();
        inner.index(&job);
        Ok(job)
    }

    async fn batch_get(&self, job_ids: &[String]) -> Result<Vec<ImageJobRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(job_ids
            .iter()
            .filter_map(|id| inner.jobs_by_id.get(id).cloned())
            .collect())
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let inner = self.lock()?;
        let mut counts = StatusCounts::default();
        for job in inner.jobs_by_id.values() {
            counts.bump(job.status);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn job(id: &str, status: JobStatus, created_at: i64) -> ImageJobRecord {
        ImageJobRecord {
            id: id.to_string(),
            user_id: "user-a".to_string(),
            prompt: "A cat".to_string(),
            prompt_fingerprint: "fp-cat".to_string(),
            status,
            image_result: (status == JobStatus::Completed)
                .then(|| format!("data:image/png;base64,{id}")),
            error_message: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn claims_oldest_pending_first() {
        let store = MemoryJobStore::new();
        store.insert(&job("newer", JobStatus::Pending, 20)).await.unwrap();
        store.insert(&job("older", JobStatus::Pending, 10)).await.unwrap();

        let first = store.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(first.id, "older");
        assert_eq!(first.status, JobStatus::Processing);
        let second = store.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(second.id, "newer");
        assert!(store.claim_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_hand_out_a_job_once() {
        let store = Arc::new(MemoryJobStore::new());
        store.insert(&job("only", JobStatus::Pending, 1)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.claim_next_pending().await.unwrap()
            }));
        }
        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn terminal_jobs_reject_further_outcomes() {
        let store = MemoryJobStore::new();
        store.insert(&job("j1", JobStatus::Pending, 1)).await.unwrap();
        store.claim_next_pending().await.unwrap();
        store
            .finish("j1", JobOutcome::Failed { message: "boom".to_string() })
            .await
            .unwrap();

        let err = store.finish("j1", JobOutcome::Retry).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert!(store.claim_next_pending().await.unwrap().is_none());

        let stored = store.get("j1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert!(stored.image_result.is_none());
    }

    #[tokio::test]
    async fn retry_returns_job_to_the_pending_index() {
        let store = MemoryJobStore::new();
        store.insert(&job("j1", JobStatus::Pending, 1)).await.unwrap();
        store.claim_next_pending().await.unwrap();

        let requeued = store.finish("j1", JobOutcome::Retry).await.unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);

        let reclaimed = store.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(reclaimed.id, "j1");
    }

    #[tokio::test]
    async fn pending_job_cannot_be_finished_without_a_claim() {
        let store = MemoryJobStore::new();
        store.insert(&job("j1", JobStatus::Pending, 1)).await.unwrap();
        let err = store
            .finish(
                "j1",
                JobOutcome::Completed {
                    image_result: "data:image/png;base64,AA==".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn find_cached_prefers_most_recent_completed_job() {
        let store = MemoryJobStore::new();
        store.insert(&job("old", JobStatus::Completed, 10)).await.unwrap();
        store.insert(&job("new", JobStatus::Completed, 30)).await.unwrap();
        store.insert(&job("pending", JobStatus::Pending, 40)).await.unwrap();

        let hit = store.find_cached("fp-cat").await.unwrap().unwrap();
        assert_eq!(hit.id, "new");
        assert!(store.find_cached("fp-dog").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completion_makes_job_a_cache_candidate() {
        let store = MemoryJobStore::new();
        store.insert(&job("j1", JobStatus::Pending, 1)).await.unwrap();
        assert!(store.find_cached("fp-cat").await.unwrap().is_none());

        store.claim_next_pending().await.unwrap();
        store
            .finish(
                "j1",
                JobOutcome::Completed {
                    image_result: "data:image/png;base64,AA==".to_string(),
                },
            )
            .await
            .unwrap();
        let hit = store.find_cached("fp-cat").await.unwrap().unwrap();
        assert_eq!(hit.id, "j1");
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = MemoryJobStore::new();
        store.insert(&job("j1", JobStatus::Pending, 1)).await.unwrap();
        let err = store.insert(&job("j1", JobStatus::Pending, 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn batch_get_skips_unknown_ids() {
        let store = MemoryJobStore::new();
        store.insert(&job("y", JobStatus::Pending, 1)).await.unwrap();
        let found = store
            .batch_get(&["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "y");

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.pending, 1);
    }
}
