use thiserror::Error;

use crate::error::{ErrorCode, OpsError};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source asset not found: {0}")]
    SourceNotFound(String),

    #[error("Malformed source spec '{0}': {1}")]
    MalformedSpec(String, String),

    #[error("Credential resolution failed for {0}")]
    CredentialError(String),

    #[error("Connection failed: {0}")]
    ConnectionError(String),

    #[error("Acquire timed out for source '{0}'")]
    AcquireTimeout(String),

    #[error("Write statement rejected on read-only connection")]
    WriteRejected,

    #[error("Source '{source_name}' does not support {operation}")]
    UnsupportedOperation { source_name: String, operation: String },

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl From<SourceError> for OpsError {
    fn from(err: SourceError) -> Self {
        let code = match &err {
            SourceError::SourceNotFound(_) => ErrorCode::NotFound,
            SourceError::MalformedSpec(_, _) | SourceError::CredentialError(_) => {
                ErrorCode::ConfigurationError
            }
            SourceError::ConnectionError(_) | SourceError::AcquireTimeout(_) => {
                ErrorCode::ConnectionError
            }
            SourceError::WriteRejected => ErrorCode::SqlBlocked,
            SourceError::UnsupportedOperation { .. } => ErrorCode::ToolBadRequest,
            SourceError::Upstream(_) => ErrorCode::UpstreamUnavailable,
        };
        OpsError::new(code, err.to_string())
    }
}
