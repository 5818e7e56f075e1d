use crate::config::environment::AppConfig;
use crate::config::worker::WorkerConfig;
use crate::infra::InfraClients;
use crate::module::image_job::route::register_routes;
use crate::module::image_job::store::JobStore;
use crate::service::image_service::{HttpImageGenerator, ImageGenerator};
use crate::service::queue_service::WorkQueue;
use crate::service::worker_service::ClaimPacer;
use axum::Router;
use axum::http::{HeaderValue, Method};
use std::sync::Arc;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub worker_config: WorkerConfig,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub generator: Arc<dyn ImageGenerator>,
    /// Wakes an idle worker after a submission.
    pub worker_signal: Arc<Notify>,
    pub pacer: Arc<ClaimPacer>,
}

impl AppState {
    pub fn new(config: AppConfig, infra: InfraClients) -> Self {
        let generator = Arc::new(HttpImageGenerator::new(
            config.image_api_endpoint.clone(),
            config.image_api_token.clone(),
        ));
        Self {
            worker_config: WorkerConfig::from_app(&config),
            config,
            store: infra.store,
            queue: infra.queue,
            generator,
            worker_signal: Arc::new(Notify::new()),
            pacer: Arc::new(ClaimPacer::new()),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn ImageGenerator>) -> Self {
        self.generator = generator;
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    register_routes(state).layer(cors)
}
