//! Enclave attestation document types and data structures.
//!
//! This module contains the core types produced by attestation document
//! verification. An [`AttestationDocument`] can only be obtained from a
//! verifier, so holding one means its signature has already been checked.

use std::collections::BTreeMap;

use aws_nitro_enclaves_nsm_api::api::AttestationDoc;
use thiserror::Error;

use crate::constants::{digest_name, get_expected_pcr_length, PCR_COUNT};

/// Represents errors that can occur during enclave attestation verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestationError {
    /// The document is not a well-formed COSE Sign1 attestation document
    #[error("Malformed attestation document: {0}")]
    MalformedDocument(String),

    /// The certificate chain or the COSE signature did not validate
    #[error("Invalid attestation signature: {0}")]
    InvalidSignature(String),

    /// The configured root certificate could not be loaded
    #[error("Invalid trust anchor: {0}")]
    InvalidTrustAnchor(String),
}

/// Result type for enclave attestation operations
pub type AttestationResult<T, E = AttestationError> = Result<T, E>;

/// A signature-verified Nitro attestation document.
///
/// Immutable once constructed. The raw PCR map is keyed by PCR index (0..31).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationDocument {
    module_id: String,
    digest: &'static str,
    timestamp: u64,
    pcrs: BTreeMap<usize, Vec<u8>>,
    certificate: Vec<u8>,
    cabundle: Vec<Vec<u8>>,
    public_key: Option<Vec<u8>>,
    user_data: Option<Vec<u8>>,
    nonce: Option<Vec<u8>>,
}

impl AttestationDocument {
    /// Builds the verified view of a decoded document.
    ///
    /// Only called after the COSE signature has been validated.
    pub(crate) fn from_verified(doc: AttestationDoc) -> AttestationResult<Self> {
        let expected_pcr_length = get_expected_pcr_length(doc.digest);

        let mut pcrs = BTreeMap::new();
        for (index, value) in doc.pcrs {
            if index >= PCR_COUNT {
                return Err(AttestationError::MalformedDocument(format!(
                    "PCR index {index} out of range"
                )));
            }
            if value.len() != expected_pcr_length {
                return Err(AttestationError::MalformedDocument(format!(
                    "Invalid PCR{index} length: {}, expected: {expected_pcr_length}",
                    value.len()
                )));
            }
            pcrs.insert(index, value.into_vec());
        }

        Ok(Self {
            module_id: doc.module_id,
            digest: digest_name(doc.digest),
            timestamp: doc.timestamp,
            pcrs,
            certificate: doc.certificate.into_vec(),
            cabundle: doc.cabundle.into_iter().map(|cert| cert.into_vec()).collect(),
            public_key: doc.public_key.map(|key| key.into_vec()),
            user_data: doc.user_data.map(|data| data.into_vec()),
            nonce: doc.nonce.map(|nonce| nonce.into_vec()),
        })
    }

    /// Identifier of the module that issued the document
    #[must_use]
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Digest algorithm used for the PCR measurements (e.g. `SHA384`)
    #[must_use]
    pub const fn digest(&self) -> &'static str {
        self.digest
    }

    /// Collection time in milliseconds since the Unix epoch
    #[must_use]
    pub const fn timestamp_millis(&self) -> u64 {
        self.timestamp
    }

    /// Collection time in whole seconds since the Unix epoch
    #[must_use]
    pub const fn timestamp_secs(&self) -> u64 {
        self.timestamp / 1000
    }

    /// Value of the PCR at `index`, if the document carries it
    #[must_use]
    pub fn pcr(&self, index: usize) -> Option<&[u8]> {
        self.pcrs.get(&index).map(Vec::as_slice)
    }

    /// All PCR measurements carried by the document
    #[must_use]
    pub const fn pcrs(&self) -> &BTreeMap<usize, Vec<u8>> {
        &self.pcrs
    }

    /// DER-encoded leaf certificate that signed the document
    #[must_use]
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// DER-encoded CA bundle, root first
    #[must_use]
    pub fn cabundle(&self) -> &[Vec<u8>] {
        &self.cabundle
    }

    /// Public key embedded by the requester, if any
    #[must_use]
    pub fn public_key(&self) -> Option<&[u8]> {
        self.public_key.as_deref()
    }

    /// Opaque user data embedded by the requester, if any
    #[must_use]
    pub fn user_data(&self) -> Option<&[u8]> {
        self.user_data.as_deref()
    }

    /// Nonce embedded by the requester, if any
    #[must_use]
    pub fn nonce(&self) -> Option<&[u8]> {
        self.nonce.as_deref()
    }
}
