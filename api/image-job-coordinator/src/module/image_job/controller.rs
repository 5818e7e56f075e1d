use super::crud;
use super::error::AppError;
use super::schema::{
    HealthMetricsView, HealthResponse, JobStatusRequest, JobStatusResponse, ProcessJobResponse,
    QueueStatsResponse, StoreStatsView, SubmitJobsRequest, SubmitJobsResponse,
};
use crate::app::AppState;
use crate::service::auth_service::{bearer_token, verify_access_token};
use crate::service::metrics_service;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use tracing::{error, info};

pub async fn submit_image_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SubmitJobsRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user_id = match authenticate(&state, &headers) {
        Ok(user_id) => user_id,
        Err(err) => return error_submit(err),
    };
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return error_submit(invalid_json(rejection)),
    };

    match crud::submit_jobs(&state, &user_id, req).await {
        Ok(resp) if resp.job_ids.is_empty() => {
            error!(user_id = %user_id, reason = %resp.reason, "image job submission failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(resp))
        }
        Ok(resp) => {
            info!(user_id = %user_id, jobs = resp.job_ids.len(), "image jobs accepted");
            (StatusCode::CREATED, Json(resp))
        }
        Err(err) => error_submit(err),
    }
}

pub async fn get_image_job_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<JobStatusRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user_id = match authenticate(&state, &headers) {
        Ok(user_id) => user_id,
        Err(err) => return error_status(err),
    };
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return error_status(invalid_json(rejection)),
    };

    match crud::query_status(&state, &user_id, req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(err) => error_status(err),
    }
}

pub async fn process_image_job(State(state): State<AppState>) -> impl IntoResponse {
    match crud::process_next(&state).await {
        Ok(resp) => {
            if let Some(job_id) = &resp.processed {
                info!(job_id = %job_id, outcome = ?resp.outcome, "worker trigger processed job");
            }
            (StatusCode::OK, Json(resp))
        }
        Err(err) => {
            error!(error_code = err.code, reason = %err.message, "worker trigger failed");
            (
                err.status,
                Json(ProcessJobResponse {
                    processed: None,
                    message: Some(err.message),
                    outcome: None,
                    error_code: Some(err.code.to_string()),
                }),
            )
        }
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let queue = match state.queue.stats().await {
        Ok(stats) => QueueStatsResponse {
            available: true,
            queued: stats.queued,
            in_flight: stats.in_flight,
            error_code: None,
            reason: "queue stats available".to_string(),
        },
        Err(e) => QueueStatsResponse {
            available: false,
            error_code: Some("QUEUE_UNAVAILABLE".to_string()),
            reason: e.to_string(),
            ..QueueStatsResponse::default()
        },
    };
    let store = match state.store.status_counts().await {
        Ok(counts) => StoreStatsView {
            available: true,
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
        },
        Err(e) => {
            error!(error = %e, "store status counts unavailable");
            StoreStatsView::default()
        }
    };

    let m = metrics_service::snapshot();
    let metrics = HealthMetricsView {
        jobs_submitted: m.jobs_submitted,
        cache_hits: m.cache_hits,
        jobs_completed: m.jobs_completed,
        jobs_failed: m.jobs_failed,
        rate_limit_requeues: m.rate_limit_requeues,
        generation_count: m.generation_count,
        generation_avg_ms: m.generation_avg_ms,
        queue_latency_count: m.queue_latency_count,
        queue_latency_avg_ms: m.queue_latency_avg_ms,
        last_error_ts: m.last_error_ts,
    };
    let ok = store.available && queue.available;

    (
        StatusCode::OK,
        Json(HealthResponse {
            ok,
            store_backend: state.store.backend().to_string(),
            queue_backend: state.queue.backend().to_string(),
            worker_enabled: state.config.worker_enabled,
            queue,
            store,
            metrics,
            reason: if ok {
                "healthy".to_string()
            } else {
                "job store or work queue unavailable".to_string()
            },
        }),
    )
}

/// Resolves the caller's user id from `Authorization: Bearer <jwt>`.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    let secret = state
        .config
        .auth_jwt_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::internal("AUTH_CONFIG_ERROR", "auth jwt secret missing"))?;
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("AUTH_MISSING_TOKEN", "missing bearer token"))?;
    let token = bearer_token(value)
        .ok_or_else(|| AppError::unauthorized("AUTH_MISSING_TOKEN", "missing bearer token"))?;
    let claims = verify_access_token(token, secret)
        .map_err(|e| AppError::unauthorized("AUTH_INVALID_TOKEN", e))?;
    Ok(claims.sub)
}

fn invalid_json(rejection: JsonRejection) -> AppError {
    AppError::bad_request("INVALID_JSON", rejection.body_text())
}

fn error_submit(err: AppError) -> (StatusCode, Json<SubmitJobsResponse>) {
    error!(error_code = err.code, reason = %err.message, "image job submission rejected");
    (
        err.status,
        Json(SubmitJobsResponse {
            job_ids: Vec::new(),
            results: Vec::new(),
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}

fn error_status(err: AppError) -> (StatusCode, Json<JobStatusResponse>) {
    error!(error_code = err.code, reason = %err.message, "image job status query rejected");
    (
        err.status,
        Json(JobStatusResponse {
            jobs: Vec::new(),
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}
