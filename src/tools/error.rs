use thiserror::Error;

use crate::error::{ErrorCode, OpsError};

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool '{tool}' does not serve tenant '{tenant}'")]
    TenantMismatch { tool: String, tenant: String },

    #[error("Tool '{tool}' lacks capability: {capability}")]
    CapabilityMissing { tool: String, capability: String },

    #[error("Input rejected for '{tool}': {reason}")]
    BadRequest { tool: String, reason: String },

    #[error("Circuit open for '{0}'")]
    CircuitOpen(String),

    #[error("Rate limited: '{0}'")]
    RateLimited(String),

    #[error("Tool '{0}' timed out after {1}ms")]
    Timeout(String, u64),

    #[error("Malformed tool asset '{0}': {1}")]
    MalformedAsset(String, String),

    #[error(transparent)]
    Ops(#[from] OpsError),
}

impl From<ToolError> for OpsError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::ToolNotFound(name) => {
                OpsError::new(ErrorCode::ToolNotFound, format!("tool not found: {name}"))
            }
            ToolError::TenantMismatch { .. } => {
                OpsError::new(ErrorCode::TenantMismatch, err.to_string())
            }
            ToolError::CapabilityMissing { .. } | ToolError::BadRequest { .. } => {
                OpsError::new(ErrorCode::ToolBadRequest, err.to_string())
            }
            ToolError::CircuitOpen(_) => OpsError::new(ErrorCode::CircuitOpen, err.to_string()),
            ToolError::RateLimited(_) => OpsError::new(ErrorCode::RateLimited, err.to_string()),
            ToolError::Timeout(_, _) => OpsError::new(ErrorCode::ToolTimeout, err.to_string()),
            ToolError::MalformedAsset(_, _) => {
                OpsError::new(ErrorCode::ConfigurationError, err.to_string())
            }
            ToolError::Ops(inner) => inner,
        }
    }
}
