//! Measurement-bound custody of the signing key.
//!
//! The custody key lives in KMS. Locally only self-attested artifacts are kept:
//! the KMS key id, the encrypted private key and a public key record. Every
//! artifact is checked against the live PCR0 before use, and a mismatch is
//! fatal. A missing artifact is provisioned and persisted.

mod artifacts;
mod error;
pub mod policy;
mod store;

use std::sync::Arc;

use k256::{
    ecdsa::SigningKey,
    pkcs8::{DecodePrivateKey, ObjectIdentifier, PrivateKeyInfo},
};
use tokio::sync::OnceCell;
use tracing::{error, info};

pub use artifacts::{AttestedArtifacts, LoadedArtifact};
pub use error::CustodyError;
pub use store::{ArtifactKind, ArtifactStore, FileArtifactStore, MemoryArtifactStore, StoreError};

use crate::{identity::IdentityResolver, kms::KeyManagement, signer::Signer};

/// `id-ecPublicKey`
const EC_PUBLIC_KEY_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
/// `secp256k1`
const SECP256K1_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.10");

/// Resolves the custody key from cached artifacts, provisioning what is missing
pub struct KeyCustodian {
    artifacts: AttestedArtifacts,
    kms: Arc<dyn KeyManagement>,
    identity: Arc<dyn IdentityResolver>,
}

impl KeyCustodian {
    #[must_use]
    pub fn new(
        artifacts: AttestedArtifacts,
        kms: Arc<dyn KeyManagement>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            artifacts,
            kms,
            identity,
        }
    }

    /// Runs the full cache-or-create protocol
    ///
    /// # Errors
    /// Any failure is fatal. Nothing is retried and a failed validation never
    /// falls back to provisioning.
    pub async fn bootstrap(&self) -> Result<Signer, CustodyError> {
        let key_id = self.resolve_key_id().await?;
        let (signing_key, provisioned) = self.resolve_private_key(&key_id).await?;

        let signer = Signer::new(signing_key, key_id);
        let identity_document = self.resolve_public_key(&signer, provisioned).await?;

        info!(
            address = %signer.address(),
            key_id = signer.key_id(),
            "Custody key ready"
        );

        Ok(signer.with_identity_document(identity_document))
    }

    async fn resolve_key_id(&self) -> Result<String, CustodyError> {
        const KIND: ArtifactKind = ArtifactKind::KmsKeyId;

        if let Some(artifact) = self.artifacts.load(KIND).await? {
            let key_id = artifact
                .document
                .user_data()
                .and_then(|data| String::from_utf8(data.to_vec()).ok())
                .filter(|key_id| !key_id.is_empty())
                .ok_or_else(|| CustodyError::StaleOrTamperedArtifact {
                    kind: KIND,
                    reason: "user data does not hold a KMS key id".to_string(),
                })?;

            info!(artifact = %KIND, "Cache hit");
            return Ok(key_id);
        }

        info!(artifact = %KIND, "Cache miss, creating KMS key");

        let pcr0 = self.artifacts.live_pcr0()?;
        let identity = self.identity.caller_identity().await?;
        let policy = policy::key_policy(&identity, &[(0, pcr0.as_slice())]);
        let key_id = self.kms.create_key(&policy).await?;

        self.artifacts
            .persist(KIND, Some(key_id.as_bytes()), None)
            .await?;
        info!(artifact = %KIND, key_id = %key_id, "Persisted");

        Ok(key_id)
    }

    /// Returns the key and whether it was freshly provisioned
    async fn resolve_private_key(&self, key_id: &str) -> Result<(SigningKey, bool), CustodyError> {
        const KIND: ArtifactKind = ArtifactKind::PrivateKey;

        if let Some(artifact) = self.artifacts.load(KIND).await? {
            let ciphertext = artifact
                .document
                .user_data()
                .filter(|data| !data.is_empty())
                .ok_or_else(|| CustodyError::StaleOrTamperedArtifact {
                    kind: KIND,
                    reason: "user data does not hold a private key ciphertext".to_string(),
                })?;

            info!(artifact = %KIND, "Cache hit, decrypting");
            let plaintext = self.kms.decrypt(key_id, ciphertext).await?;
            return Ok((decode_private_key(&plaintext)?, false));
        }

        info!(artifact = %KIND, "Cache miss, generating data key pair");

        let key_pair = self.kms.generate_data_key_pair(key_id).await?;
        let signing_key = decode_private_key(&key_pair.private_key_plaintext)?;

        self.artifacts
            .persist(KIND, Some(&key_pair.private_key_ciphertext), None)
            .await?;
        info!(artifact = %KIND, "Persisted");

        Ok((signing_key, true))
    }

    /// Returns the raw public key artifact, writing it when missing or outdated
    async fn resolve_public_key(
        &self,
        signer: &Signer,
        provisioned: bool,
    ) -> Result<Vec<u8>, CustodyError> {
        const KIND: ArtifactKind = ArtifactKind::PublicKey;

        if !provisioned {
            if let Some(artifact) = self.artifacts.load(KIND).await? {
                let document = &artifact.document;
                if document.public_key() != Some(signer.public_key())
                    || document.user_data() != Some(signer.address().as_slice())
                {
                    return Err(CustodyError::StaleOrTamperedArtifact {
                        kind: KIND,
                        reason: "public key does not match the custody key".to_string(),
                    });
                }

                info!(artifact = %KIND, "Cache hit");
                return Ok(artifact.raw);
            }
        }

        let raw = self
            .artifacts
            .persist(
                KIND,
                Some(signer.address().as_slice()),
                Some(signer.public_key()),
            )
            .await?;
        info!(artifact = %KIND, address = %signer.address(), "Persisted");

        Ok(raw)
    }
}

/// Decodes a PKCS#8 DER private key, accepting only secp256k1 EC keys
///
/// # Errors
/// Returns `UnsupportedKeyType` for any other algorithm or curve, or undecodable input.
pub fn decode_private_key(der: &[u8]) -> Result<SigningKey, CustodyError> {
    let info = PrivateKeyInfo::try_from(der)
        .map_err(|e| CustodyError::UnsupportedKeyType(format!("invalid PKCS#8 key: {e}")))?;

    if info.algorithm.oid != EC_PUBLIC_KEY_OID {
        return Err(CustodyError::UnsupportedKeyType(format!(
            "algorithm {} is not an EC key",
            info.algorithm.oid
        )));
    }

    let curve = info
        .algorithm
        .parameters_oid()
        .map_err(|e| CustodyError::UnsupportedKeyType(format!("missing curve: {e}")))?;
    if curve != SECP256K1_OID {
        return Err(CustodyError::UnsupportedKeyType(format!(
            "curve {curve} is not secp256k1"
        )));
    }

    SigningKey::from_pkcs8_der(der)
        .map_err(|e| CustodyError::UnsupportedKeyType(format!("invalid secp256k1 key: {e}")))
}

/// Single-flight access to the custody [`Signer`].
///
/// The first caller runs the bootstrap, concurrent callers wait for it, and
/// every caller observes the same result. A failure is kept for the lifetime
/// of the process.
pub struct Custody {
    custodian: KeyCustodian,
    signer: OnceCell<Result<Arc<Signer>, Arc<CustodyError>>>,
}

impl Custody {
    #[must_use]
    pub fn new(custodian: KeyCustodian) -> Self {
        Self {
            custodian,
            signer: OnceCell::new(),
        }
    }

    /// Resolves the signer, bootstrapping on first use
    ///
    /// # Errors
    /// Returns the bootstrap error, the same one on every call.
    pub async fn signer(&self) -> Result<Arc<Signer>, Arc<CustodyError>> {
        self.signer
            .get_or_init(|| async {
                self.custodian
                    .bootstrap()
                    .await
                    .map(Arc::new)
                    .map_err(|e| {
                        error!("Custody bootstrap failed: {e}");
                        Arc::new(e)
                    })
            })
            .await
            .clone()
    }
}
