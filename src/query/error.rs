use thiserror::Error;

use crate::error::{ErrorCode, OpsError};

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Query asset not found: {0}")]
    QueryNotFound(String),

    #[error("Statement blocked: {0:?}")]
    SqlBlocked(Vec<String>),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Malformed query asset '{0}': {1}")]
    MalformedAsset(String, String),

    #[error("Registry error: {0}")]
    RegistryError(#[from] crate::registry::RegistryError),
}

impl From<QueryError> for OpsError {
    fn from(err: QueryError) -> Self {
        let code = match &err {
            QueryError::QueryNotFound(_) => ErrorCode::NotFound,
            QueryError::SqlBlocked(_) => ErrorCode::SqlBlocked,
            QueryError::InvalidParams(_) => ErrorCode::InvalidParams,
            QueryError::MalformedAsset(_, _) => ErrorCode::ConfigurationError,
            QueryError::RegistryError(inner) => {
                return OpsError::new(
                    ErrorCode::ConfigurationError,
                    format!("query resolution failed: {inner}"),
                )
            }
        };
        OpsError::new(code, err.to_string())
    }
}
