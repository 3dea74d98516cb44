//! Verification of AWS Nitro Enclave attestation documents.

/// Constants for enclave verification
pub mod constants;

/// COSE Sign1 envelope handling
pub mod cose;

/// Types for enclave verification
pub mod types;

mod attestation_verifier;

#[cfg(feature = "test-utils")]
pub mod testing;

pub use attestation_verifier::NitroAttestationVerifier;
pub use types::{AttestationDocument, AttestationError, AttestationResult};

/// Turns raw attestation bytes into a signature-verified document.
///
/// Implementations must only return documents whose signature chains to a
/// trusted authority.
pub trait AttestationVerifier: Send + Sync {
    /// Verifies `document` and returns its parsed contents
    ///
    /// # Errors
    /// Returns `MalformedDocument` for bytes that are not an attestation document and
    /// `InvalidSignature` when the signature or certificate chain does not validate.
    fn verify(&self, document: &[u8]) -> AttestationResult<AttestationDocument>;
}
