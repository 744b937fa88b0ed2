use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error codes surfaced to clients. This is the complete taxonomy; every
/// failure that crosses a component boundary is tagged with one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PolicyDeny,
    RateLimited,
    CircuitOpen,
    ToolTimeout,
    ToolBadRequest,
    ToolNotFound,
    UpstreamUnavailable,
    InternalError,
    PlanInvalid,
    PlanTimeout,
    ExecuteTimeout,
    ComposeTimeout,
    SqlBlocked,
    TenantMismatch,
    AuthFailed,
    PermissionDenied,
    DataNotFound,
    InvalidParams,
    MaxRowsExceeded,
    ConnectionError,
    ValidationError,
    ConfigurationError,
    Conflict,
    NotFound,
}

impl ErrorCode {
    /// Whether a failure with this code may succeed on retry (against the
    /// same tool or a declared fallback).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimited
                | ErrorCode::ToolTimeout
                | ErrorCode::UpstreamUnavailable
                | ErrorCode::ExecuteTimeout
                | ErrorCode::ConnectionError
                | ErrorCode::CircuitOpen
        )
    }

    /// Codes that must never be routed to a fallback tool: the request
    /// itself is at fault, retrying elsewhere would bypass a safety check.
    pub fn blocks_fallback(&self) -> bool {
        matches!(
            self,
            ErrorCode::PolicyDeny | ErrorCode::ToolBadRequest | ErrorCode::SqlBlocked
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PolicyDeny => "POLICY_DENY",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::ToolTimeout => "TOOL_TIMEOUT",
            ErrorCode::ToolBadRequest => "TOOL_BAD_REQUEST",
            ErrorCode::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::PlanInvalid => "PLAN_INVALID",
            ErrorCode::PlanTimeout => "PLAN_TIMEOUT",
            ErrorCode::ExecuteTimeout => "EXECUTE_TIMEOUT",
            ErrorCode::ComposeTimeout => "COMPOSE_TIMEOUT",
            ErrorCode::SqlBlocked => "SQL_BLOCKED",
            ErrorCode::TenantMismatch => "TENANT_MISMATCH",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::DataNotFound => "DATA_NOT_FOUND",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::MaxRowsExceeded => "MAX_ROWS_EXCEEDED",
            ErrorCode::ConnectionError => "CONNECTION_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::NotFound => "NOT_FOUND",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error record carried across component boundaries. Internal detail
/// (connection strings, stack context) stays in `details` and is stripped
/// before anything reaches a client.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct OpsError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl OpsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.is_retryable(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Overrides the default retryable classification for this code.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// The client-facing shape: code and message only.
    pub fn public(&self) -> Value {
        serde_json::json!({
            "error_code": self.code,
            "message": self.message,
        })
    }
}
