//! The custody key capability.
//!
//! [`Signer`] is the only holder of the decrypted custody key once bootstrap
//! has finished. It exposes a single signing operation over 32 byte digests.

use alloy_primitives::{Address, B256};
use k256::ecdsa::SigningKey;
use thiserror::Error;

/// Length of an `r || s || v` signature
pub const SIGNATURE_LENGTH: usize = 65;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Failed to sign digest: {0}")]
    Signing(String),
}

pub struct Signer {
    signing_key: SigningKey,
    key_id: String,
    public_key: Vec<u8>,
    address: Address,
    identity_document: Vec<u8>,
}

impl Signer {
    #[must_use]
    pub fn new(signing_key: SigningKey, key_id: String) -> Self {
        let verifying_key = signing_key.verifying_key();
        let public_key = verifying_key.to_encoded_point(false).as_bytes().to_vec();
        let address = Address::from_public_key(verifying_key);

        Self {
            signing_key,
            key_id,
            public_key,
            address,
            identity_document: Vec::new(),
        }
    }

    /// Attaches the self-attested document binding this key to the enclave measurement
    #[must_use]
    pub fn with_identity_document(mut self, document: Vec<u8>) -> Self {
        self.identity_document = document;
        self
    }

    /// Signs a 32 byte digest, returning `r || s || v` with `v` in {0, 1}
    ///
    /// # Errors
    /// Returns an error if the underlying ECDSA operation fails.
    pub fn sign(&self, digest: &B256) -> Result<[u8; SIGNATURE_LENGTH], SignerError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| SignerError::Signing(e.to_string()))?;

        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();
        Ok(bytes)
    }

    /// Address derived from the custody public key
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Uncompressed SEC1 public key (65 bytes, `0x04` prefix)
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Id of the KMS key the private key is encrypted under
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Raw COSE Sign1 document binding the public key and address to PCR0
    #[must_use]
    pub fn identity_document(&self) -> &[u8] {
        &self.identity_document
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("key_id", &self.key_id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
