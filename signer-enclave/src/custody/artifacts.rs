use std::sync::Arc;

use attestation_verifier::{AttestationDocument, AttestationVerifier};

use super::{
    error::CustodyError,
    store::{ArtifactKind, ArtifactStore},
};
use crate::nsm::SecureModule;

/// A cached artifact that passed validation
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    /// Raw COSE Sign1 bytes as stored
    pub raw: Vec<u8>,
    pub document: AttestationDocument,
}

/// An [`ArtifactStore`] whose entries are self-issued attestation documents.
///
/// Reads verify the document signature and require its PCR0 to equal the live
/// PCR0. Writes wrap the payload in a fresh attestation document.
pub struct AttestedArtifacts {
    store: Arc<dyn ArtifactStore>,
    secure_module: Arc<dyn SecureModule>,
    verifier: Arc<dyn AttestationVerifier>,
}

impl AttestedArtifacts {
    #[must_use]
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        secure_module: Arc<dyn SecureModule>,
        verifier: Arc<dyn AttestationVerifier>,
    ) -> Self {
        Self {
            store,
            secure_module,
            verifier,
        }
    }

    /// PCR0 of the running enclave
    ///
    /// # Errors
    /// Returns `Measurement` if the secure module cannot be queried.
    pub fn live_pcr0(&self) -> Result<Vec<u8>, CustodyError> {
        Ok(self.secure_module.describe_pcr(0)?.value)
    }

    /// Reads and validates the artifact of `kind`, `None` if it was never written
    ///
    /// # Errors
    /// Returns `Storage` if the artifact exists but cannot be read and
    /// `StaleOrTamperedArtifact` if it fails validation.
    pub async fn load(&self, kind: ArtifactKind) -> Result<Option<LoadedArtifact>, CustodyError> {
        let Some(raw) = self.store.get(kind).await? else {
            return Ok(None);
        };

        let document =
            self.verifier
                .verify(&raw)
                .map_err(|e| CustodyError::StaleOrTamperedArtifact {
                    kind,
                    reason: e.to_string(),
                })?;

        let live_pcr0 = self.live_pcr0()?;
        if document.pcr(0) != Some(live_pcr0.as_slice()) {
            return Err(CustodyError::StaleOrTamperedArtifact {
                kind,
                reason: "PCR0 does not match the running enclave".to_string(),
            });
        }

        Ok(Some(LoadedArtifact { raw, document }))
    }

    /// Attests `user_data` and `public_key` and stores the document as `kind`
    ///
    /// # Errors
    /// Returns `Measurement` if the document cannot be issued and
    /// `PersistFailed` if it cannot be stored.
    pub async fn persist(
        &self,
        kind: ArtifactKind,
        user_data: Option<&[u8]>,
        public_key: Option<&[u8]>,
    ) -> Result<Vec<u8>, CustodyError> {
        let raw = self.secure_module.attest(None, user_data, public_key)?;

        self.store
            .put(kind, &raw)
            .await
            .map_err(|e| CustodyError::PersistFailed {
                kind,
                reason: e.to_string(),
            })?;

        Ok(raw)
    }
}
