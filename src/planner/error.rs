use thiserror::Error;

use crate::error::{ErrorCode, OpsError};

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Planning failed: {0}")]
    PlanningError(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] crate::llm::LlmError),

    #[error("Registry error: {0}")]
    RegistryError(#[from] crate::registry::RegistryError),
}

impl From<PlannerError> for OpsError {
    fn from(err: PlannerError) -> Self {
        match err {
            PlannerError::PlanningError(reason) => OpsError::new(ErrorCode::PlanInvalid, reason),
            PlannerError::LlmError(inner) => inner.into(),
            PlannerError::RegistryError(inner) => inner.into(),
        }
    }
}
