use crate::config::environment::AppConfig;
use std::time::Duration;

/// Settings handed to the worker loop and the submission service at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub image_api_endpoint: Option<String>,
    pub image_api_timeout: Duration,
    pub queue_endpoint: Option<String>,
    pub rate_limit_cooldown: Duration,
    pub steady_state_throttle: Duration,
    pub drain_ceiling: Duration,
    pub poll_interval: Duration,
    pub concurrency: usize,
}

impl WorkerConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            image_api_endpoint: app.image_api_endpoint.clone(),
            image_api_timeout: Duration::from_millis(app.image_api_timeout_ms.max(1)),
            queue_endpoint: app.queue_endpoint.clone(),
            rate_limit_cooldown: Duration::from_millis(app.rate_limit_cooldown_ms),
            steady_state_throttle: Duration::from_millis(app.steady_state_throttle_ms),
            drain_ceiling: Duration::from_secs(app.worker_drain_ceiling_seconds.max(1)),
            poll_interval: Duration::from_secs(app.worker_poll_seconds.max(1)),
            concurrency: app.worker_concurrency.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_config() -> AppConfig {
        AppConfig {
            rust_env: "test".to_string(),
            api_host: "127.0.0.1".to_string(),
            api_port: 0,
            redis_url: None,
            queue_endpoint: Some("redis://127.0.0.1:6379".to_string()),
            image_api_endpoint: Some("http://127.0.0.1:9000/predict".to_string()),
            image_api_token: None,
            image_api_timeout_ms: 0,
            rate_limit_cooldown_ms: 20_000,
            steady_state_throttle_ms: 12_000,
            worker_enabled: true,
            worker_concurrency: 0,
            worker_poll_seconds: 0,
            worker_drain_ceiling_seconds: 60,
            status_batch_limit: 100,
            auth_jwt_secret: None,
        }
    }

    #[test]
    fn zero_values_are_clamped_to_usable_minimums() {
        let cfg = WorkerConfig::from_app(&app_config());
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.image_api_timeout, Duration::from_millis(1));
    }

    #[test]
    fn delays_are_carried_in_milliseconds() {
        let cfg = WorkerConfig::from_app(&app_config());
        assert_eq!(cfg.rate_limit_cooldown, Duration::from_secs(20));
        assert_eq!(cfg.steady_state_throttle, Duration::from_secs(12));
        assert_eq!(cfg.drain_ceiling, Duration::from_secs(60));
        assert_eq!(
            cfg.queue_endpoint.as_deref(),
            Some("redis://127.0.0.1:6379")
        );
    }
}
