use crate::config::db::RedisConfig;
use crate::config::environment::AppConfig;
use crate::module::image_job::store::{JobStore, MemoryJobStore, RedisJobStore};
use crate::service::queue_service::{MemoryWorkQueue, RedisWorkQueue, WorkQueue};
use std::sync::Arc;

/// Job store and work queue backends selected from configuration.
#[derive(Clone)]
pub struct InfraClients {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
}

impl InfraClients {
    pub fn in_memory(batch_limit: usize) -> Self {
        Self {
            store: Arc::new(MemoryJobStore::with_batch_limit(batch_limit)),
            queue: Arc::new(MemoryWorkQueue::new()),
        }
    }
}

pub fn init_infra(config: &AppConfig) -> Result<InfraClients, String> {
    let store: Arc<dyn JobStore> = match RedisConfig::store_from_app(config) {
        Some(redis) => Arc::new(
            RedisJobStore::open(&redis, config.status_batch_limit)
                .map_err(|e| format!("job store init failed: {e}"))?,
        ),
        None => Arc::new(MemoryJobStore::with_batch_limit(config.status_batch_limit)),
    };
    let queue: Arc<dyn WorkQueue> = match RedisConfig::queue_from_app(config) {
        Some(redis) => Arc::new(
            RedisWorkQueue::open(&redis).map_err(|e| format!("work queue init failed: {e}"))?,
        ),
        None => Arc::new(MemoryWorkQueue::new()),
    };
    Ok(InfraClients { store, queue })
}
