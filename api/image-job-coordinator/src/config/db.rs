use crate::config::environment::AppConfig;

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    /// Connection settings for the job store. `None` selects the in-memory store.
    pub fn store_from_app(app: &AppConfig) -> Option<Self> {
        app.redis_url.clone().map(|url| Self { url })
    }

    /// Connection settings for the work queue. `None` selects the in-memory queue.
    pub fn queue_from_app(app: &AppConfig) -> Option<Self> {
        app.queue_endpoint.clone().map(|url| Self { url })
    }
}
