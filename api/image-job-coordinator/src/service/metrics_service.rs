use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static JOBS_SUBMITTED: AtomicU64 = AtomicU64::new(0);
static CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static JOBS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static JOBS_FAILED: AtomicU64 = AtomicU64::new(0);
static RATE_LIMIT_REQUEUES: AtomicU64 = AtomicU64::new(0);

static GENERATION_COUNT: AtomicU64 = AtomicU64::new(0);
static GENERATION_TOTAL_MS: AtomicU64 = AtomicU64::new(0);

static QUEUE_LATENCY_COUNT: AtomicU64 = AtomicU64::new(0);
static QUEUE_LATENCY_TOTAL_MS: AtomicU64 = AtomicU64::new(0);

static LAST_ERROR_TS: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub cache_hits: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub rate_limit_requeues: u64,
    pub generation_count: u64,
    pub generation_avg_ms: u64,
    pub queue_latency_count: u64,
    pub queue_latency_avg_ms: u64,
    pub last_error_ts: i64,
}

pub fn inc_jobs_submitted() {
    JOBS_SUBMITTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_cache_hits() {
    CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_jobs_completed() {
    JOBS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_jobs_failed() {
    JOBS_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_rate_limit_requeues() {
    RATE_LIMIT_REQUEUES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_generation_ms(duration_ms: u64) {
    GENERATION_COUNT.fetch_add(1, Ordering::Relaxed);
    GENERATION_TOTAL_MS.fetch_add(duration_ms, Ordering::Relaxed);
}

/// Time from job creation to claim.
pub fn record_queue_latency_ms(duration_ms: u64) {
    QUEUE_LATENCY_COUNT.fetch_add(1, Ordering::Relaxed);
    QUEUE_LATENCY_TOTAL_MS.fetch_add(duration_ms, Ordering::Relaxed);
}

pub fn set_last_error_ts(ts: i64) {
    LAST_ERROR_TS.store(ts, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    let generation_count = GENERATION_COUNT.load(Ordering::Relaxed);
    let queue_count = QUEUE_LATENCY_COUNT.load(Ordering::Relaxed);

    MetricsSnapshot {
        jobs_submitted: JOBS_SUBMITTED.load(Ordering::Relaxed),
        cache_hits: CACHE_HITS.load(Ordering::Relaxed),
        jobs_completed: JOBS_COMPLETED.load(Ordering::Relaxed),
        jobs_failed: JOBS_FAILED.load(Ordering::Relaxed),
        rate_limit_requeues: RATE_LIMIT_REQUEUES.load(Ordering::Relaxed),
        generation_count,
        generation_avg_ms: average(GENERATION_TOTAL_MS.load(Ordering::Relaxed), generation_count),
        queue_latency_count: queue_count,
        queue_latency_avg_ms: average(QUEUE_LATENCY_TOTAL_MS.load(Ordering::Relaxed), queue_count),
        last_error_ts: LAST_ERROR_TS.load(Ordering::Relaxed),
    }
}

fn average(total: u64, count: u64) -> u64 {
    if count > 0 {
        total / count
    } else {
        0
    }
}
