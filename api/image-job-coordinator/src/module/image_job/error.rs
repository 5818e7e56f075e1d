use super::store::StoreError;
use axum::http::StatusCode;

#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code,
            message: message.into(),
        }
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code,
            message: message.into(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound(_) => Self::not_found("JOB_NOT_FOUND", err.to_string()),
            StoreError::Duplicate(_) => Self::conflict("DUPLICATE_JOB_ID", err.to_string()),
            StoreError::InvalidTransition { .. } => {
                Self::conflict("INVALID_STATE_TRANSITION", err.to_string())
            }
            StoreError::Unavailable(_) => Self::internal("STORE_UNAVAILABLE", err.to_string()),
            StoreError::Decode(_) => Self::internal("STORE_DECODE_FAILED", err.to_string()),
            StoreError::LockPoisoned => Self::internal("STORE_LOCK_ERROR", err.to_string()),
        }
    }
}
