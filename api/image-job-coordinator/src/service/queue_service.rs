use crate::config::db::RedisConfig;
use crate::module::image_job::model::QueueMessage;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client as RedisClient};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

const QUEUE_KEY: &str = "image_jobs:queue";
const IN_FLIGHT_KEY: &str = "image_jobs:inflight";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("work queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue message encode failed: {0}")]
    Encode(String),

    #[error("malformed queue message: {0}")]
    Malformed(String),

    #[error("work queue lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: u64,
    pub in_flight: u64,
}

/// A received message. It stays in flight until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub body: String,
}

impl Delivery {
    pub fn message(&self) -> Result<QueueMessage, QueueError> {
        decode_message(&self.body)
    }
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn enqueue(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Takes the oldest message without blocking.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

pub fn encode_message(message: &QueueMessage) -> Result<String, QueueError> {
    serde_json::to_string(message).map_err(|e| QueueError::Encode(e.to_string()))
}

pub fn decode_message(body: &str) -> Result<QueueMessage, QueueError> {
    let message: QueueMessage =
        serde_json::from_str(body).map_err(|e| QueueError::Malformed(e.to_string()))?;
    if message.job_id.trim().is_empty() {
        return Err(QueueError::Malformed("jobId is empty".to_string()));
    }
    if message.prompt.trim().is_empty() {
        return Err(QueueError::Malformed("prompt is empty".to_string()));
    }
    Ok(message)
}

#[derive(Debug, Default)]
pub struct MemoryWorkQueue {
    inner: Mutex<MemoryWorkQueueInner>,
}

#[derive(Debug, Default)]
struct MemoryWorkQueueInner {
    queued: VecDeque<String>,
    in_flight: Vec<String>,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a raw body, bypassing encoding.
    pub fn push_raw(&self, body: impl Into<String>) -> Result<(), QueueError> {
        self.lock()?.queued.push_back(body.into());
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryWorkQueueInner>, QueueError> {
        self.inner.lock().map_err(|_| QueueError::LockPoisoned)
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn enqueue(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let body = encode_message(message)?;
        self.lock()?.queued.push_back(body);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut inner = self.lock()?;
        let Some(body) = inner.queued.pop_front() else {
            return Ok(None);
        };
        inner.in_flight.push(body.clone());
        Ok(Some(Delivery { body }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        if let Some(pos) = inner.in_flight.iter().position(|b| *b == delivery.body) {
            inner.in_flight.remove(pos);
        }
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let inner = self.lock()?;
        Ok(QueueStats {
            queued: inner.queued.len() as u64,
            in_flight: inner.in_flight.len() as u64,
        })
    }
}

/// Redis list queue: `LPUSH` to enqueue, `RPOPLPUSH` into an in-flight list to
/// receive, `LREM` to acknowledge.
#[derive(Debug, Clone)]
pub struct RedisWorkQueue {
    client: RedisClient,
}

impl RedisWorkQueue {
    pub fn open(config: &RedisConfig) -> Result<Self, QueueError> {
        let client = RedisClient::open(config.url.clone())
            .map_err(|e| QueueError::Unavailable(format!("redis init failed: {e}")))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Unavailable(format!("redis connect failed: {e}")))
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn enqueue(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let body = encode_message(message)?;
        let mut conn = self.connection().await?;
        let _: usize = conn
            .lpush(QUEUE_KEY, body)
            .await
            .map_err(|e| QueueError::Unavailable(format!("queue push failed: {e}")))?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let body: Option<String> = redis::cmd("RPOPLPUSH")
            .arg(QUEUE_KEY)
            .arg(IN_FLIGHT_KEY)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Unavailable(format!("queue pull failed: {e}")))?;
        Ok(body.map(|body| Delivery { body }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: usize = conn
            .lrem(IN_FLIGHT_KEY, 1, &delivery.body)
            .await
            .map_err(|e| QueueError::Unavailable(format!("in-flight cleanup failed: {e}")))?;
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.connection().await?;
        let queued: u64 = conn
            .llen(QUEUE_KEY)
            .await
            .map_err(|e| QueueError::Unavailable(format!("queue len failed: {e}")))?;
        let in_flight: u64 = conn
            .llen(IN_FLIGHT_KEY)
            .await
            .map_err(|e| QueueError::Unavailable(format!("in-flight len failed: {e}")))?;
        Ok(QueueStats { queued, in_flight })
    }
}
