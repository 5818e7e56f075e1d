use super::{ClientError, StatusSource};
use crate::module::image_job::schema::{
    JobStatusRequest, JobStatusResponse, JobStatusView, ProcessJobResponse, SubmitJobsRequest,
    SubmitJobsResponse,
};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Submits prompts. Partial failures come back in `results`.
    pub async fn submit(&self, prompts: Vec<String>) -> Result<SubmitJobsResponse, ClientError> {
        let req = SubmitJobsRequest {
            prompts: Some(prompts),
        };
        let builder = self.http.post(self.url("/v1/image-jobs")).json(&req);
        self.send(builder).await
    }

    pub async fn trigger_worker(&self) -> Result<ProcessJobResponse, ClientError> {
        let builder = self.http.post(self.url("/v1/image-jobs/process"));
        self.send(builder).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = builder
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        decode_response(response).await
    }
}

#[async_trait]
impl StatusSource for CoordinatorClient {
    async fn fetch_status(&self, job_ids: &[String]) -> Result<Vec<JobStatusView>, ClientError> {
        let req = JobStatusRequest {
            job_ids: Some(job_ids.to_vec()),
        };
        let builder = self.http.post(self.url("/v1/image-jobs/status")).json(&req);
        let resp: JobStatusResponse = self.send(builder).await?;
        Ok(resp.jobs)
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    if !status.is_success() {
        let parsed: Option<serde_json::Value> = serde_json::from_slice(&body).ok();
        let field = |name: &str| {
            parsed
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        return Err(ClientError::Http {
            status: status.as_u16(),
            code: field("errorCode"),
            reason: field("reason").unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned()),
        });
    }
    serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
}
