//! Client side of the job protocol: an HTTP client for the coordinator and a
//! poller that follows one submission until every job is terminal.

pub mod api_client;
pub mod poller;

use crate::module::image_job::schema::JobStatusView;
use async_trait::async_trait;
use thiserror::Error;

pub use api_client::CoordinatorClient;
pub use poller::{JobPoller, Progress, SlideState};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("coordinator request failed: {0}")]
    Transport(String),

    #[error("coordinator response decode failed: {0}")]
    Decode(String),

    #[error("coordinator returned {status}: {reason}")]
    Http {
        status: u16,
        code: Option<String>,
        reason: String,
    },
}

/// Anything that can answer a batch status query for the current user.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, job_ids: &[String]) -> Result<Vec<JobStatusView>, ClientError>;
}
