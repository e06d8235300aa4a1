use std::fmt::{Display, Formatter};
use std::path::Path;

use thiserror::Error;

/// How a caller should treat a [`VaultError::RelocationRequested`]: a permanent relocation is
///  declared by the artifact's POM, a temporary one points a floating snapshot at its current
///  timestamped build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    Permanent,
    Temporary,
}
impl Display for RelocationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RelocationKind::Permanent => write!(f, "permanent"),
            RelocationKind::Temporary => write!(f, "temporary"),
        }
    }
}

/// Errors surfaced by the content-resolution core to the protocol layer on top of it.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("not a valid path in a Maven 2 repository: '{path}'")]
    MalformedPath { path: String },

    #[error("not a valid artifact path in a Maven 2 repository, filename '{file_name}' {reason}")]
    InvalidArtifactId { file_name: String, reason: String },

    #[error("storage failure: {0}")]
    StorageRuntime(String),

    #[error("metadata not found: {0}")]
    MetadataNotFound(String),

    #[error("invalid metadata in {path}: {reason}")]
    MetadataInvalid { path: String, reason: String },

    #[error("artifact mislocated: {path} declares {found}, expected {expected}")]
    ArtifactMislocated { path: String, expected: String, found: String },

    #[error("unable to resolve model {coordinate}: {reason}")]
    UnresolvableModel { coordinate: String, reason: String },

    #[error("{kind} relocation requested to {path}")]
    RelocationRequested { path: String, kind: RelocationKind },
}

pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    pub fn invalid_artifact_id(file_name: &str, reason: impl Into<String>) -> VaultError {
        VaultError::InvalidArtifactId {
            file_name: file_name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn storage(path: &Path, e: impl Display) -> VaultError {
        VaultError::StorageRuntime(format!("{}: {}", path.display(), e))
    }

    pub fn metadata_invalid(path: &Path, e: impl Display) -> VaultError {
        VaultError::MetadataInvalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }
}
