use super::{JobStore, StoreError, apply_outcome};
use crate::config::db::RedisConfig;
use crate::module::image_job::model::{ImageJobRecord, JobOutcome, StatusCounts};
use crate::module::image_job::schema::JobStatus;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client as RedisClient, Script};
use std::collections::HashMap;

const JOB_KEY_PREFIX: &str = "image_jobs:job:";
const FINGERPRINT_KEY_PREFIX: &str = "image_jobs:fp:";
const PENDING_KEY: &str = "image_jobs:pending";
const COUNTS_KEY: &str = "image_jobs:counts";
const CACHE_SCAN_WINDOW: isize = 8;
const FINISH_CAS_ATTEMPTS: usize = 3;

// Pops pending ids oldest first until one still decodes as PENDING, then
// flips it to PROCESSING. Runs atomically, so two workers never see the same id.
const CLAIM_SCRIPT: &str = r#"
while true do
  local popped = redis.call('ZPOPMIN', KEYS[1])
  if #popped == 0 then
    return false
  end
  local key = ARGV[1] .. popped[1]
  local raw = redis.call('GET', key)
  if raw then
    local job = cjson.decode(raw)
    if job.status == 'PENDING' then
      job.status = 'PROCESSING'
      job.updatedAt = tonumber(ARGV[2])
      local encoded = cjson.encode(job)
      redis.call('SET', key, encoded)
      redis.call('HINCRBY', KEYS[2], 'PENDING', -1)
      redis.call('HINCRBY', KEYS[2], 'PROCESSING', 1)
      return encoded
    end
  end
end
"#;

// Writes a new record together with its status count and index entry.
// KEYS: job, counts, index. ARGV: record, status, job id, score, index flag.
const INSERT_SCRIPT: &str = r#"
if not redis.call('SET', KEYS[1], ARGV[1], 'NX') then
  return 0
end
redis.call('HINCRBY', KEYS[2], ARGV[2], 1)
if ARGV[5] == '1' then
  redis.call('ZADD', KEYS[3], ARGV[4], ARGV[3])
end
return 1
"#;

// Compare-and-set on the raw record, moving the status count and index entry
// in the same step.
// KEYS: job, counts, index. ARGV: expected, replacement, previous status,
// next status, job id, score, index flag.
const SWAP_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('HINCRBY', KEYS[2], ARGV[3], -1)
redis.call('HINCRBY', KEYS[2], ARGV[4], 1)
if ARGV[7] == '1' then
  redis.call('ZADD', KEYS[3], ARGV[6], ARGV[5])
end
return 1
"#;

#[derive(Debug, Clone)]
pub struct RedisJobStore {
    client: RedisClient,
    batch_limit: usize,
}

impl RedisJobStore {
    pub fn open(config: &RedisConfig, batch_limit: usize) -> Result<Self, StoreError> {
        let client = RedisClient::open(config.url.clone())
            .map_err(|e| StoreError::Unavailable(format!("redis init failed: {e}")))?;
        Ok(Self {
            client,
            batch_limit: batch_limit.max(1),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Unavailable(format!("redis connect failed: {e}")))
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn insert(&self, job: &ImageJobRecord) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let (index_key, indexed) = index_target(job);
        let created: i64 = Script::new(INSERT_SCRIPT)
            .key(job_key(&job.id))
            .key(COUNTS_KEY)
            .key(index_key)
            .arg(encode(job)?)
            .arg(job.status.as_str())
            .arg(&job.id)
            .arg(job.created_at)
            .arg(if indexed { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable("job write failed"))?;
        if created == 0 {
            return Err(StoreError::Duplicate(job.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<ImageJobRecord>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(job_key(job_id))
            .await
            .map_err(unavailable("job read failed"))?;
        raw.as_deref().map(decode).transpose()
    }

    async fn find_cached(&self, fingerprint: &str) -> Result<Option<ImageJobRecord>, StoreError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn
            .zrevrange(fingerprint_key(fingerprint), 0, CACHE_SCAN_WINDOW - 1)
            .await
            .map_err(unavailable("fingerprint index read failed"))?;
        if ids.is_empty() {
            return Ok(None);
        }
        let jobs = mget(&mut conn, &ids).await?;
        Ok(jobs.into_iter().find(ImageJobRecord::is_cache_candidate))
    }

    async fn claim_next_pending(&self) -> Result<Option<ImageJobRecord>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = Script::new(CLAIM_SCRIPT)
            .key(PENDING_KEY)
            .key(COUNTS_KEY)
            .arg(JOB_KEY_PREFIX)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable("claim failed"))?;
        raw.as_deref().map(decode).transpose()
    }

    async fn finish(
        &self,
        job_id: &str,
        outcome: JobOutcome,
    ) -> Result<ImageJobRecord, StoreError> {
        let mut conn = self.connection().await?;
        let key = job_key(job_id);
        let swap = Script::new(SWAP_SCRIPT);

        for _ in 0..FINISH_CAS_ATTEMPTS {
            let current: Option<String> = conn
                .get(&key)
                .await
                .map_err(unavailable("job read failed"))?;
            let current = current.ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
            let mut job = decode(&current)?;
            let previous = job.status;
            apply_outcome(&mut job, outcome.clone(), Utc::now().timestamp_millis())?;

            let (index_key, indexed) = index_target(&job);
            let swapped: i64 = swap
                .key(&key)
                .key(COUNTS_KEY)
                .key(index_key)
                .arg(&current)
                .arg(encode(&job)?)
                .arg(previous.as_str())
                .arg(job.status.as_str())
                .arg(&job.id)
                .arg(job.created_at)
                .arg(if indexed { "1" } else { "0" })
                .invoke_async(&mut conn)
                .await
                .map_err(unavailable("job write failed"))?;
            if swapped == 1 {
                return Ok(job);
            }
        }

        Err(StoreError::Unavailable(format!(
            "job {job_id} kept changing during update"
        )))
    }

    async fn batch_get(&self, job_ids: &[String]) -> Result<Vec<ImageJobRecord>, StoreError> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        mget(&mut conn, job_ids).await
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let mut conn = self.connection().await?;
        let raw: HashMap<String, i64> = conn
            .hgetall(COUNTS_KEY)
            .await
            .map_err(unavailable("status count read failed"))?;
        Ok(counts_from_hash(&raw))
    }
}

async fn mget(
    conn: &mut MultiplexedConnection,
    job_ids: &[String],
) -> Result<Vec<ImageJobRecord>, StoreError> {
    let keys: Vec<String> = job_ids.iter().map(|id| job_key(id)).collect();
    let raws: Vec<Option<String>> = redis::cmd("MGET")
        .arg(&keys)
        .query_async(conn)
        .await
        .map_err(unavailable("batch read failed"))?;
    raws.iter().flatten().map(|raw| decode(raw)).collect()
}

fn counts_from_hash(raw: &HashMap<String, i64>) -> StatusCounts {
    let read = |status: JobStatus| raw.get(status.as_str()).copied().unwrap_or(0).max(0) as u64;
    StatusCounts {
        pending: read(JobStatus::Pending),
        processing: read(JobStatus::Processing),
        completed: read(JobStatus::Completed),
        failed: read(JobStatus::Failed),
    }
}

/// Sorted set a record belongs to after a write, and whether it is indexed
/// at all. Unindexed records still pass a key so the scripts see a fixed
/// key count.
fn index_target(job: &ImageJobRecord) -> (String, bool) {
    match job.status {
        JobStatus::Pending => (PENDING_KEY.to_string(), true),
        JobStatus::Completed if job.is_cache_candidate() => {
            (fingerprint_key(&job.prompt_fingerprint), true)
        }
        _ => (PENDING_KEY.to_string(), false),
    }
}

fn job_key(job_id: &str) -> String {
    format!("{JOB_KEY_PREFIX}{job_id}")
}

fn fingerprint_key(fingerprint: &str) -> String {
    format!("{FINGERPRINT_KEY_PREFIX}{fingerprint}")
}

fn encode(job: &ImageJobRecord) -> Result<String, StoreError> {
    serde_json::to_string(job).map_err(|e| StoreError::Decode(e.to_string()))
}

fn decode(raw: &str) -> Result<ImageJobRecord, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Decode(e.to_string()))
}

fn unavailable(context: &'static str) -> impl Fn(redis::RedisError) -> StoreError {
    move |e| StoreError::Unavailable(format!("{context}: {e}"))
}
