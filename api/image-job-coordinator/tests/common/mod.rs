#![allow(dead_code)]

use async_trait::async_trait;
use image_job_coordinator::app::AppState;
use image_job_coordinator::config::environment::AppConfig;
use image_job_coordinator::infra::InfraClients;
use image_job_coordinator::module::image_job::model::{ImageJobRecord, JobOutcome, QueueMessage, StatusCounts};
use image_job_coordinator::module::image_job::store::{JobStore, MemoryJobStore, StoreError};
use image_job_coordinator::service::auth_service::issue_access_token;
use image_job_coordinator::service::image_service::{
    GeneratedImage, GenerationError, ImageGenerator,
};
use image_job_coordinator::service::queue_service::{
    Delivery, MemoryWorkQueue, QueueError, QueueStats, WorkQueue,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const JWT_SECRET: &str = "test-secret";
pub const IMAGE_X: &str = "aW1hZ2UteA==";

pub fn test_config() -> AppConfig {
    AppConfig {
        rust_env: "test".to_string(),
        api_host: "127.0.0.1".to_string(),
        api_port: 0,
        redis_url: None,
        queue_endpoint: None,
        image_api_endpoint: None,
        image_api_token: None,
        image_api_timeout_ms: 2_000,
        rate_limit_cooldown_ms: 0,
        steady_state_throttle_ms: 0,
        worker_enabled: false,
        worker_concurrency: 1,
        worker_poll_seconds: 1,
        worker_drain_ceiling_seconds: 5,
        status_batch_limit: 2,
        auth_jwt_secret: Some(JWT_SECRET.to_string()),
    }
}

pub fn token_for(user_id: &str) -> String {
    issue_access_token(user_id, JWT_SECRET, 3600)
        .expect("issue token")
        .0
}

pub fn state_with(config: AppConfig, generator: Arc<ScriptedGenerator>) -> AppState {
    let infra = InfraClients::in_memory(config.status_batch_limit);
    AppState::new(config, infra).with_generator(generator)
}

pub fn test_state(generator: Arc<ScriptedGenerator>) -> AppState {
    state_with(test_config(), generator)
}

pub fn state_with_backends(
    config: AppConfig,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    generator: Arc<ScriptedGenerator>,
) -> AppState {
    AppState::new(config, InfraClients { store, queue }).with_generator(generator)
}

pub fn image(payload: &str) -> GeneratedImage {
    GeneratedImage {
        mime_type: "image/png".to_string(),
        base64_payload: payload.to_string(),
    }
}

pub enum Step {
    Image(GeneratedImage),
    Error(GenerationError),
    Stall(Duration),
}

/// Image generator that replays scripted steps, then returns `IMAGE_X`.
#[derive(Default)]
pub struct ScriptedGenerator {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        let step = self.steps.lock().expect("steps lock").pop_front();
        match step {
            Some(Step::Image(image)) => Ok(image),
            Some(Step::Error(err)) => Err(err),
            Some(Step::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(image(IMAGE_X))
            }
            None => Ok(image(IMAGE_X)),
        }
    }
}

fn unavailable(op: &str) -> StoreError {
    StoreError::Unavailable(format!("{op} refused"))
}

/// Memory store that can be told to fail cache lookups, inserts of given
/// prompts, or outcome writes.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryJobStore,
    pub fail_find_cached: AtomicBool,
    pub fail_finish: AtomicBool,
    fail_insert_prompts: Mutex<Vec<String>>,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_insert_for(&self, prompt: &str) {
        self.fail_insert_prompts
            .lock()
            .expect("insert faults lock")
            .push(prompt.to_string());
    }
}

#[async_trait]
impl JobStore for FaultyStore {
    fn backend(&self) -> &'static str {
        "faulty"
    }

    fn batch_limit(&self) -> usize {
        self.inner.batch_limit()
    }

    async fn insert(&self, job: &ImageJobRecord) -> Result<(), StoreError> {
        let refused = self
            .fail_insert_prompts
            .lock()
            .expect("insert faults lock")
            .contains(&job.prompt);
        if refused {
            return Err(unavailable("insert"));
        }
        self.inner.insert(job).await
    }

    async fn get(&self, job_id: &str) -> Result<Option<ImageJobRecord>, StoreError> {
        self.inner.get(job_id).await
    }

    async fn find_cached(&self, fingerprint: &str) -> Result<Option<ImageJobRecord>, StoreError> {
        if self.fail_find_cached.load(Ordering::SeqCst) {
            return Err(unavailable("cache lookup"));
        }
        self.inner.find_cached(fingerprint).await
    }

    async fn claim_next_pending(&self) -> Result<Option<ImageJobRecord>, StoreError> {
        self.inner.claim_next_pending().await
    }

    async fn finish(
        &self,
        job_id: &str,
        outcome: JobOutcome,
    ) -> Result<ImageJobRecord, StoreError> {
        if self.fail_finish.load(Ordering::SeqCst) {
            return Err(unavailable("finish"));
        }
        self.inner.finish(job_id, outcome).await
    }

    async fn batch_get(&self, job_ids: &[String]) -> Result<Vec<ImageJobRecord>, StoreError> {
        self.inner.batch_get(job_ids).await
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        self.inner.status_counts().await
    }
}

/// Memory queue that counts `receive` calls.
#[derive(Default)]
pub struct CountingQueue {
    inner: MemoryWorkQueue,
    receives: AtomicUsize,
}

impl CountingQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn receives(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkQueue for CountingQueue {
    fn backend(&self) -> &'static str {
        "counting"
    }

    async fn enqueue(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.inner.enqueue(message).await
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        self.inner.receive().await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.inner.ack(delivery).await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.inner.stats().await
    }
}
