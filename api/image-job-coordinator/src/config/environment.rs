use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rust_env: String,
    pub api_host: String,
    pub api_port: u16,
    pub redis_url: Option<String>,
    pub queue_endpoint: Option<String>,
    pub image_api_endpoint: Option<String>,
    pub image_api_token: Option<String>,
    pub image_api_timeout_ms: u64,
    pub rate_limit_cooldown_ms: u64,
    pub steady_state_throttle_ms: u64,
    pub worker_enabled: bool,
    pub worker_concurrency: usize,
    pub worker_poll_seconds: u64,
    pub worker_drain_ceiling_seconds: u64,
    pub status_batch_limit: usize,
    pub auth_jwt_secret: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        load_dotenv_layers();
        let redis_url = env::var("REDIS_URL").ok();
        Ok(Self {
            rust_env: read_var("RUST_ENV")?,
            api_host: read_var("API_HOST")?,
            api_port: read_var("API_PORT")?
                .parse::<u16>()
                .map_err(|e| format!("invalid API_PORT: {e}"))?,
            queue_endpoint: env::var("QUEUE_ENDPOINT").ok().or_else(|| redis_url.clone()),
            redis_url,
            image_api_endpoint: env::var("IMAGE_API_ENDPOINT").ok(),
            image_api_token: env::var("IMAGE_API_TOKEN").ok(),
            image_api_timeout_ms: read_optional_u64("IMAGE_API_TIMEOUT_MS", 45_000)?,
            rate_limit_cooldown_ms: read_optional_u64("RATE_LIMIT_COOLDOWN_MS", 20_000)?,
            steady_state_throttle_ms: read_optional_u64("STEADY_STATE_THROTTLE_MS", 12_000)?,
            worker_enabled: read_optional_bool("WORKER_ENABLED", true),
            worker_concurrency: read_optional_u64("WORKER_CONCURRENCY", 1)? as usize,
            worker_poll_seconds: read_optional_u64("WORKER_POLL_SECONDS", 2)?,
            worker_drain_ceiling_seconds: read_optional_u64("WORKER_DRAIN_CEILING_SECONDS", 60)?,
            status_batch_limit: read_optional_u64("STATUS_BATCH_LIMIT", 100)? as usize,
            auth_jwt_secret: env::var("AUTH_JWT_SECRET").ok(),
        })
    }
}

fn read_var(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("missing required env var: {key}"))
}

fn read_optional_u64(key: &str, default: u64) -> Result<u64, String> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn read_optional_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn load_dotenv_layers() {
    for path in [".env", "../.env", "../../.env"] {
        let _ = dotenvy::from_path_override(path);
    }
}
