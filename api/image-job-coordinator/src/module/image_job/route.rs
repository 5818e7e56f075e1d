use super::controller;
use crate::app::AppState;
use axum::Router;
use axum::routing::{get, post};

pub fn register_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/image-jobs", post(controller::submit_image_jobs))
        .route("/v1/image-jobs/status", post(controller::get_image_job_status))
        .route("/v1/image-jobs/process", post(controller::process_image_job))
        .route("/v1/image-jobs/health", get(controller::health))
        .with_state(state)
}
