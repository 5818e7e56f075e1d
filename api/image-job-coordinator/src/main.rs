use image_job_coordinator::app::{AppState, build_router};
use image_job_coordinator::config::environment::AppConfig;
use image_job_coordinator::infra::{InfraClients, init_infra};
use image_job_coordinator::service::worker_service;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    init_logging();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "config error");
            std::process::exit(1);
        }
    };

    let bind_addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind_addr = %bind_addr, "server bind error");
            std::process::exit(1);
        }
    };

    let infra = match init_infra(&config) {
        Ok(i) => i,
        Err(e) => {
            warn!(error = %e, "infra init failed; falling back to in-memory backends");
            InfraClients::in_memory(config.status_batch_limit)
        }
    };
    let state = AppState::new(config, infra);

    info!(
        env = %state.config.rust_env,
        host = %state.config.api_host,
        port = state.config.api_port,
        store = state.store.backend(),
        queue = state.queue.backend(),
        image_api_configured = state.config.image_api_endpoint.is_some(),
        "image-job-coordinator started"
    );
    if state.config.image_api_endpoint.is_none() {
        warn!("IMAGE_API_ENDPOINT not set; claimed jobs will fail");
    }

    if state.config.worker_enabled {
        for worker_id in 0..state.worker_config.concurrency {
            let worker_state = state.clone();
            tokio::spawn(worker_service::run_worker(worker_state, worker_id));
        }
    }

    let app = build_router(state);
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server runtime error");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
