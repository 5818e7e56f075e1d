//! Client for the external image-generation API.
//!
//! The provider takes `{instances: [{prompt}], parameters: {sampleCount: 1}}`
//! and answers with `predictions[0].bytesBase64Encoded`. Everything the worker
//! needs to know about a failure is folded into [`GenerationError`], in
//! particular whether it was the provider's rate limit.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MIME_TYPE: &str = "image/png";
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("image provider rate limited: {0}")]
    RateLimited(String),

    #[error("image provider returned {status}: {body}")]
    ProviderStatus { status: u16, body: String },

    #[error("image provider request failed: {0}")]
    Transport(String),

    #[error("image generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("image provider response invalid: {0}")]
    InvalidResponse(String),

    #[error("image provider endpoint is not configured")]
    NotConfigured,
}

impl GenerationError {
    /// True when the provider signalled its rate limit or quota. These jobs
    /// go back to PENDING instead of failing.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::ProviderStatus { status: 429, .. } => true,
            Self::ProviderStatus { body, .. } => is_rate_limit_signature(body),
            Self::Transport(message) | Self::InvalidResponse(message) => {
                is_rate_limit_signature(message)
            }
            Self::Timeout(_) | Self::NotConfigured => false,
        }
    }
}

pub fn is_rate_limit_signature(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    ["429", "quota", "resource_exhausted", "rate limit"]
        .iter()
        .any(|needle| lowered.contains(needle))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub base64_payload: String,
}

impl GeneratedImage {
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_payload)
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct HttpImageGenerator {
    client: reqwest::Client,
    endpoint: Option<String>,
    token: Option<String>,
}

impl HttpImageGenerator {
    pub fn new(endpoint: Option<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.filter(|v| !v.trim().is_empty()),
            token: token.filter(|v| !v.trim().is_empty()),
        }
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, GenerationError> {
        let endpoint = self.endpoint.as_deref().ok_or(GenerationError::NotConfigured)?;
        let mut request = self
            .client
            .post(endpoint)
            .header("content-type", "application/json")
            .json(&json!({
                "instances": [{ "prompt": prompt }],
                "parameters": { "sampleCount": 1 }
            }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = truncate(&body, ERROR_BODY_LIMIT);
            if status.as_u16() == 429 {
                return Err(GenerationError::RateLimited(body));
            }
            return Err(GenerationError::ProviderStatus {
                status: status.as_u16(),
                body,
            });
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|e| GenerationError::InvalidResponse(format!("body decode failed: {e}")))?;
        parse_prediction(&payload)
    }
}

/// Pulls the first prediction out of a provider response.
pub fn parse_prediction(payload: &Value) -> Result<GeneratedImage, GenerationError> {
    let prediction = payload
        .get("predictions")
        .and_then(Value::as_array)
        .and_then(|predictions| predictions.first())
        .ok_or_else(|| GenerationError::InvalidResponse("no image returned".to_string()))?;
    let encoded = prediction
        .get("bytesBase64Encoded")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GenerationError::InvalidResponse("prediction has no image data".to_string()))?;
    STANDARD
        .decode(encoded)
        .map_err(|e| GenerationError::InvalidResponse(format!("image data is not base64: {e}")))?;
    let mime_type = prediction
        .get("mimeType")
        .and_then(Value::as_str)
        .filter(|v| v.starts_with("image/"))
        .unwrap_or(DEFAULT_MIME_TYPE);

    Ok(GeneratedImage {
        mime_type: mime_type.to_string(),
        base64_payload: encoded.to_string(),
    })
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_signatures_are_recognized() {
        assert!(GenerationError::RateLimited("slow down".to_string()).is_rate_limited());
        assert!(GenerationError::ProviderStatus {
            status: 429,
            body: String::new()
        }
        .is_rate_limited());
        assert!(GenerationError::ProviderStatus {
            status: 400,
            body: "RESOURCE_EXHAUSTED: try later".to_string()
        }
        .is_rate_limited());
        assert!(GenerationError::Transport("Quota exceeded for project".to_string())
            .is_rate_limited());
    }

    #[test]
    fn other_failures_are_permanent() {
        assert!(!GenerationError::ProviderStatus {
            status: 500,
            body: "internal".to_string()
        }
        .is_rate_limited());
        assert!(!GenerationError::Timeout(Duration::from_millis(4290)).is_rate_limited());
        assert!(!GenerationError::NotConfigured.is_rate_limited());
        assert!(!GenerationError::InvalidResponse("no image returned".to_string())
            .is_rate_limited());
    }

    #[test]
    fn prediction_becomes_a_png_data_url_by_default() {
        let payload = json!({ "predictions": [{ "bytesBase64Encoded": "aGVsbG8=" }] });
        let image = parse_prediction(&payload).unwrap();
        assert_eq!(image.to_data_url(), "data:image/png;base64,aGVsbG8=");
    }

    #[test]
    fn prediction_mime_type_is_kept() {
        let payload = json!({
            "predictions": [{ "bytesBase64Encoded": "aGVsbG8=", "mimeType": "image/jpeg" }]
        });
        let image = parse_prediction(&payload).unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
    }

    #[test]
    fn malformed_predictions_are_invalid() {
        for payload in [
            json!({}),
            json!({ "predictions": [] }),
            json!({ "predictions": [{ "bytesBase64Encoded": "" }] }),
            json!({ "predictions": [{ "bytesBase64Encoded": "not base64!" }] }),
        ] {
            let err = parse_prediction(&payload).unwrap_err();
            assert!(matches!(err, GenerationError::InvalidResponse(_)), "{payload}");
        }
    }

    #[tokio::test]
    async fn missing_endpoint_fails_without_a_request() {
        let generator = HttpImageGenerator::new(None, None);
        let err = generator.generate("a cat").await.unwrap_err();
        assert!(matches!(err, GenerationError::NotConfigured));
    }
}
