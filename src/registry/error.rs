use thiserror::Error;

use crate::error::{ErrorCode, OpsError};
use crate::schemas::AssetIdentity;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Required system asset missing: {0}")]
    MissingSystemAsset(String),

    #[error("Asset conflict: {0}")]
    Conflict(String),

    #[error("Asset {0} is not a draft")]
    NotADraft(String),

    #[error("System asset {0} cannot be deleted")]
    SystemAssetProtected(String),

    #[error("Publication blocked for {identity}: {reasons:?}")]
    PublicationBlocked {
        identity: AssetIdentity,
        reasons: Vec<String>,
    },

    #[error("Version {version} not found in history of {identity}")]
    VersionNotFound {
        identity: AssetIdentity,
        version: i64,
    },

    #[error("Malformed asset content for {0}: {1}")]
    MalformedContent(String, String),

    #[error("Store error: {0}")]
    StoreError(String),
}

impl From<RegistryError> for OpsError {
    fn from(err: RegistryError) -> Self {
        let code = match &err {
            RegistryError::NotFound(_) | RegistryError::VersionNotFound { .. } => {
                ErrorCode::NotFound
            }
            RegistryError::MissingSystemAsset(_) | RegistryError::MalformedContent(_, _) => {
                ErrorCode::ConfigurationError
            }
            RegistryError::Conflict(_) => ErrorCode::Conflict,
            RegistryError::NotADraft(_)
            | RegistryError::SystemAssetProtected(_)
            | RegistryError::PublicationBlocked { .. } => ErrorCode::ValidationError,
            RegistryError::StoreError(_) => ErrorCode::InternalError,
        };
        OpsError::new(code, err.to_string())
    }
}
