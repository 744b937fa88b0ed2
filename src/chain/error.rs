use thiserror::Error;

use crate::error::{ErrorCode, OpsError};

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Plan invalid: {0}")]
    PlanInvalid(String),

    #[error("Chain deadline exceeded after {0}ms")]
    DeadlineExceeded(u64),

    #[error(transparent)]
    Ops(#[from] OpsError),
}

impl From<ChainError> for OpsError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::PlanInvalid(reason) => OpsError::new(ErrorCode::PlanInvalid, reason),
            ChainError::DeadlineExceeded(ms) => OpsError::new(
                ErrorCode::ExecuteTimeout,
                format!("chain deadline exceeded after {ms}ms"),
            ),
            ChainError::Ops(inner) => inner,
        }
    }
}
