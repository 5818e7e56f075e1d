//! Worker loop: claim one PENDING job, call the image provider, record the
//! outcome, repeat until the store has nothing left to claim.
//!
//! Workers in one process share a [`ClaimPacer`] so the steady-state throttle
//! and the rate-limit cooldown apply to the process as a whole.

use crate::app::AppState;
use crate::module::image_job::model::JobOutcome;
use crate::module::image_job::store::StoreError;
use crate::service::image_service::GenerationError;
use crate::service::metrics_service;
use crate::service::queue_service::{Delivery, QueueError};
use chrono::Utc;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, error, info, warn};

const MAX_DELIVERIES_PER_WAKE: usize = 64;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("claim failed: {0}")]
    Claim(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No PENDING job was available.
    Idle,
    Completed { job_id: String },
    Failed { job_id: String, message: String },
    /// Rate limited; the job is PENDING again.
    Requeued { job_id: String },
    /// The provider call finished but the result could not be written.
    /// The job stays PROCESSING.
    PersistFailed { job_id: String },
    /// The pacing window opens after the drain deadline; nothing was claimed.
    Deferred,
}

impl CycleOutcome {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Completed { job_id }
            | Self::Failed { job_id, .. }
            | Self::Requeued { job_id }
            | Self::PersistFailed { job_id } => Some(job_id),
            Self::Idle | Self::Deferred => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Requeued { .. } => "requeued",
            Self::PersistFailed { .. } => "persist_failed",
            Self::Deferred => "deferred",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: u64,
    pub failed: u64,
    pub requeued: u64,
    pub persist_failures: u64,
    pub ceiling_reached: bool,
}

impl DrainReport {
    pub fn processed(&self) -> u64 {
        self.completed + self.failed + self.requeued + self.persist_failures
    }

    fn record(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Completed { .. } => self.completed += 1,
            CycleOutcome::Failed { .. } => self.failed += 1,
            CycleOutcome::Requeued { .. } => self.requeued += 1,
            CycleOutcome::PersistFailed { .. } => self.persist_failures += 1,
            CycleOutcome::Idle | CycleOutcome::Deferred => {}
        }
    }
}

/// Earliest instant the next claim may happen.
#[derive(Debug, Default)]
pub struct ClaimPacer {
    next_claim_at: Mutex<Option<Instant>>,
}

impl ClaimPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_at(&self) -> Option<Instant> {
        match self.next_claim_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Pushes the next claim out by `delay`. Never pulls it closer.
    pub fn delay_next_claim(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let candidate = Instant::now() + delay;
        let mut guard = match self.next_claim_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if (*guard).map_or(true, |current| current < candidate) {
            *guard = Some(candidate);
        }
    }

    async fn wait(&self) {
        if let Some(at) = self.ready_at() {
            sleep_until(at).await;
        }
    }
}

/// Runs one claim-process cycle, honouring the shared pacing window.
pub async fn run_cycle(state: &AppState) -> Result<CycleOutcome, WorkerError> {
    run_cycle_before(state, None).await
}

async fn run_cycle_before(
    state: &AppState,
    deadline: Option<Instant>,
) -> Result<CycleOutcome, WorkerError> {
    if let (Some(deadline), Some(ready_at)) = (deadline, state.pacer.ready_at()) {
        if ready_at > deadline {
            return Ok(CycleOutcome::Deferred);
        }
    }
    state.pacer.wait().await;

    let Some(job) = state.store.claim_next_pending().await? else {
        return Ok(CycleOutcome::Idle);
    };
    let claimed_at = Utc::now().timestamp_millis();
    if claimed_at > job.created_at {
        metrics_service::record_queue_latency_ms((claimed_at - job.created_at) as u64);
    }
    info!(job_id = %job.id, user_id = %job.user_id, "image job claimed");

    let limit = state.worker_config.image_api_timeout;
    let started = Instant::now();
    let result = match timeout(limit, state.generator.generate(&job.prompt)).await {
        Ok(result) => result,
        Err(_) => Err(GenerationError::Timeout(limit)),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;
    metrics_service::record_generation_ms(elapsed_ms);

    let (outcome, cycle) = match result {
        Ok(image) => {
            state
                .pacer
                .delay_next_claim(state.worker_config.steady_state_throttle);
            (
                JobOutcome::Completed {
                    image_result: image.to_data_url(),
                },
                CycleOutcome::Completed {
                    job_id: job.id.clone(),
                },
            )
        }
        Err(err) if err.is_rate_limited() => {
            state
                .pacer
                .delay_next_claim(state.worker_config.rate_limit_cooldown);
            warn!(
                job_id = %job.id,
                error = %err,
                cooldown_ms = state.worker_config.rate_limit_cooldown.as_millis() as u64,
                "image provider rate limited; job requeued"
            );
            (
                JobOutcome::Retry,
                CycleOutcome::Requeued {
                    job_id: job.id.clone(),
                },
            )
        }
        Err(err) => {
            warn!(job_id = %job.id, error = %err, "image generation failed");
            let message = err.to_string();
            (
                JobOutcome::Failed {
                    message: message.clone(),
                },
                CycleOutcome::Failed {
                    job_id: job.id.clone(),
                    message,
                },
            )
        }
    };

    if let Err(err) = state.store.finish(&job.id, outcome).await {
        error!(
            job_id = %job.id,
            intended = cycle.label(),
            error = %err,
            "job outcome not persisted; job may remain PROCESSING"
        );
        metrics_service::set_last_error_ts(Utc::now().timestamp());
        return Ok(CycleOutcome::PersistFailed { job_id: job.id });
    }

    match &cycle {
        CycleOutcome::Completed { job_id } => {
            metrics_service::inc_jobs_completed();
            info!(job_id = %job_id, elapsed_ms, "image job completed");
        }
        CycleOutcome::Failed { .. } => {
            metrics_service::inc_jobs_failed();
            metrics_service::set_last_error_ts(Utc::now().timestamp());
        }
        CycleOutcome::Requeued { .. } => metrics_service::inc_rate_limit_requeues(),
        _ => {}
    }
    Ok(cycle)
}

/// Repeats cycles until no PENDING job is left or `ceiling` has elapsed.
pub async fn drain(state: &AppState, ceiling: Duration) -> Result<DrainReport, WorkerError> {
    let deadline = Instant::now() + ceiling;
    let mut report = DrainReport::default();
    loop {
        if Instant::now() >= deadline {
            report.ceiling_reached = true;
            break;
        }
        let outcome = run_cycle_before(state, Some(deadline)).await?;
        match outcome {
            CycleOutcome::Idle => break,
            CycleOutcome::Deferred => {
                report.ceiling_reached = true;
                break;
            }
            other => report.record(&other),
        }
    }
    if report.processed() > 0 {
        info!(
            completed = report.completed,
            failed = report.failed,
            requeued = report.requeued,
            persist_failures = report.persist_failures,
            ceiling_reached = report.ceiling_reached,
            "drain finished"
        );
    } else if report.ceiling_reached {
        debug!("drain deferred until the pacing window opens");
    }
    Ok(report)
}

/// Runs one cycle for the trigger endpoint, then wakes the background
/// workers so the rest of the queue keeps draining.
pub async fn trigger(state: &AppState) -> Result<CycleOutcome, WorkerError> {
    let outcome = run_cycle(state).await;
    state.worker_signal.notify_one();
    outcome
}

/// Persistent consumer loop. Wakes on the submission signal or the poll tick,
/// takes pending queue deliveries, drains the store, then acknowledges.
pub async fn run_worker(state: AppState, worker_id: usize) {
    info!(worker_id, queue = state.queue.backend(), "image worker started");
    loop {
        let deliveries = take_deliveries(&state).await;
        let ceiling_reached = match drain(&state, state.worker_config.drain_ceiling).await {
            Ok(report) => report.ceiling_reached,
            Err(err) => {
                error!(worker_id, error = %err, "drain aborted");
                metrics_service::set_last_error_ts(Utc::now().timestamp());
                false
            }
        };
        for delivery in &deliveries {
            if let Err(err) = state.queue.ack(delivery).await {
                warn!(worker_id, error = %err, "queue ack failed");
            }
        }
        if ceiling_reached {
            // A deferred drain means the pacing window opens past the deadline.
            if let Some(ready_at) = state.pacer.ready_at().filter(|at| *at > Instant::now()) {
                debug!(worker_id, "waiting for the pacing window before the next drain");
                sleep_until(ready_at).await;
            }
            continue;
        }

        tokio::select! {
            _ = state.worker_signal.notified() => {}
            _ = sleep(state.worker_config.poll_interval) => {}
        }
    }
}

async fn take_deliveries(state: &AppState) -> Vec<Delivery> {
    let mut deliveries = Vec::new();
    while deliveries.len() < MAX_DELIVERIES_PER_WAKE {
        let delivery = match state.queue.receive().await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "queue receive failed");
                break;
            }
        };
        match delivery.message() {
            Ok(message) => {
                debug!(job_id = %message.job_id, "queue delivery received");
                deliveries.push(delivery);
            }
            Err(err) => {
                warn!(error = %err, body = %delivery.body, "dropping malformed queue message");
                if let Err(err) = state.queue.ack(&delivery).await {
                    warn!(error = %err, "queue ack failed");
                }
            }
        }
    }
    deliveries
}
