use thiserror::Error;

use crate::error::{ErrorCode, OpsError};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Permission error: {0}")]
    PermissionError(String),

    #[error("Rate limit error: {0}")]
    RateLimitError(String),

    #[error("Model overloaded: {0}")]
    OverloadedError(String),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Malformed completion: {0}")]
    MalformedResponse(String),
}

impl From<LlmError> for OpsError {
    fn from(err: LlmError) -> Self {
        let code = match &err {
            LlmError::AuthenticationError(_) => ErrorCode::AuthFailed,
            LlmError::PermissionError(_) => ErrorCode::PermissionDenied,
            LlmError::RateLimitError(_) => ErrorCode::RateLimited,
            LlmError::OverloadedError(_) | LlmError::RequestError(_) => {
                ErrorCode::UpstreamUnavailable
            }
            LlmError::MalformedResponse(_) => ErrorCode::InternalError,
        };
        OpsError::new(code, err.to_string())
    }
}
