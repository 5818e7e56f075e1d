pub mod auth_service;
pub mod fingerprint_service;
pub mod image_service;
pub mod metrics_service;
pub mod queue_service;
pub mod validation_service;
pub mod worker_service;
