//! Submits a batch of prompts read from stdin as `{"prompts": [...]}`, follows
//! the jobs until they settle and prints the final slide states as JSON.

use image_job_coordinator::client::{CoordinatorClient, JobPoller, SlideState};
use serde::{Deserialize, Serialize};
use std::env;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct BatchInput {
    prompts: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SlideOutput {
    slide: usize,
    #[serde(flatten)]
    state: SlideState,
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(e) = run().await {
        error!(error = %e, "carousel batch failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    for path in [".env", "../.env", "../../.env"] {
        let _ = dotenvy::from_path_override(path);
    }
    let base_url =
        env::var("COORDINATOR_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let token = env::var("COORDINATOR_TOKEN")
        .map_err(|_| "missing required env var: COORDINATOR_TOKEN".to_string())?;

    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .map_err(|e| format!("stdin read failed: {e}"))?;
    let input: BatchInput =
        serde_json::from_str(&raw).map_err(|e| format!("invalid batch input: {e}"))?;

    let client = CoordinatorClient::new(base_url, token);
    let submitted = client
        .submit(input.prompts)
        .await
        .map_err(|e| e.to_string())?;
    for failed in submitted.results.iter().filter(|r| r.job_id.is_none()) {
        warn!(
            prompt_index = failed.prompt_index,
            error_code = ?failed.error_code,
            reason = ?failed.reason,
            "prompt was not submitted"
        );
    }
    let slides: Vec<(usize, String)> = submitted
        .results
        .iter()
        .filter_map(|r| r.job_id.clone().map(|id| (r.prompt_index, id)))
        .collect();
    info!(jobs = slides.len(), "batch submitted");

    if let Err(e) = client.trigger_worker().await {
        warn!(error = %e, "worker trigger failed; relying on background workers");
    }

    let mut poller = JobPoller::with_slides(client, slides);
    let progress = poller
        .run_with(|p| info!(settled = p.settled(), total = p.total, failed = p.failed, "progress"))
        .await;
    info!(
        completed = progress.completed,
        failed = progress.failed,
        total = progress.total,
        "batch settled"
    );

    let output: Vec<SlideOutput> = poller
        .slides()
        .into_iter()
        .map(|(slide, state)| SlideOutput { slide, state })
        .collect();
    let rendered = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
    println!("{rendered}");
    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
