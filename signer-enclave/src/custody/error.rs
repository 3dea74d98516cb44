use thiserror::Error;

use super::store::{ArtifactKind, StoreError};
use crate::{identity::IdentityError, kms::KmsError, nsm::NsmError};

/// Fatal errors while resolving the custody key
#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("Failed to read enclave measurement: {0}")]
    Measurement(#[from] NsmError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    /// A cached artifact failed signature or measurement validation
    #[error("Cached {kind} artifact is stale or tampered: {reason}")]
    StaleOrTamperedArtifact { kind: ArtifactKind, reason: String },

    #[error("Failed to resolve caller identity: {0}")]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Kms(#[from] KmsError),

    #[error("Unsupported custody key type: {0}")]
    UnsupportedKeyType(String),

    /// KMS state was provisioned but the matching artifact could not be stored
    #[error("Failed to persist {kind} artifact after provisioning, operator intervention required: {reason}")]
    PersistFailed { kind: ArtifactKind, reason: String },
}
