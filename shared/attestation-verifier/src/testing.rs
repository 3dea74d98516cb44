//! Test doubles for code that consumes attestation documents.
//!
//! [`TestAttestationAuthority`] plays the role of the Nitro hypervisor: it
//! signs documents with a throwaway P-384 key. [`PinnedKeyVerifier`] accepts
//! exactly the documents that authority signed, without a certificate chain.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use aws_nitro_enclaves_nsm_api::api::{AttestationDoc, Digest};
use coset::{iana::Algorithm, CborSerializable, CoseSign1Builder, HeaderBuilder};
use p384::ecdsa::{signature::Signer as _, Signature, SigningKey, VerifyingKey};
use serde_bytes::ByteBuf;

use crate::cose::{decode_payload, parse_cose_sign1, verify_cose_signature};
use crate::types::{AttestationDocument, AttestationResult};
use crate::AttestationVerifier;

/// Fields a test wants embedded in an issued document
#[derive(Debug, Clone, Default)]
pub struct AttestationClaims {
    pub pcrs: BTreeMap<usize, Vec<u8>>,
    pub public_key: Option<Vec<u8>>,
    pub user_data: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
    /// Milliseconds since the epoch, defaults to now
    pub timestamp: Option<u64>,
}

/// Issues COSE Sign1 attestation documents signed by an in-memory key
#[derive(Clone)]
pub struct TestAttestationAuthority {
    signing_key: SigningKey,
}

impl Default for TestAttestationAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAttestationAuthority {
    #[must_use]
    pub fn new() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Returns a verifier pinned to this authority's key
    #[must_use]
    pub fn verifier(&self) -> PinnedKeyVerifier {
        PinnedKeyVerifier {
            verifying_key: *self.signing_key.verifying_key(),
        }
    }

    /// Signs a document carrying `claims`
    ///
    /// # Panics
    /// Panics if the COSE structure cannot be serialized, which only happens on
    /// allocation failure.
    #[must_use]
    pub fn issue(&self, claims: AttestationClaims) -> Vec<u8> {
        self.issue_with_algorithm(claims, Algorithm::ES384)
    }

    fn issue_with_algorithm(&self, claims: AttestationClaims, algorithm: Algorithm) -> Vec<u8> {
        let timestamp = claims.timestamp.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or_default()
        });

        let doc = AttestationDoc {
            module_id: "i-test-enc0123456789abcdef".to_string(),
            digest: Digest::SHA384,
            timestamp,
            pcrs: claims
                .pcrs
                .into_iter()
                .map(|(index, value)| (index, ByteBuf::from(value)))
                .collect(),
            certificate: ByteBuf::from(vec![0u8; 8]),
            cabundle: vec![],
            public_key: claims.public_key.map(ByteBuf::from),
            user_data: claims.user_data.map(ByteBuf::from),
            nonce: claims.nonce.map(ByteBuf::from),
        };

        let headers = HeaderBuilder::new().algorithm(algorithm).build();

        CoseSign1Builder::new()
            .protected(headers)
            .payload(doc.to_binary())
            .create_signature(b"", |bytes| {
                let signature: Signature = self.signing_key.sign(bytes);
                signature.to_bytes().to_vec()
            })
            .build()
            .to_vec()
            .expect("COSE Sign1 serialization should not fail")
    }
}

/// Verifies documents against a single pinned P-384 key
#[derive(Debug, Clone)]
pub struct PinnedKeyVerifier {
    verifying_key: VerifyingKey,
}

impl AttestationVerifier for PinnedKeyVerifier {
    fn verify(&self, document: &[u8]) -> AttestationResult<AttestationDocument> {
        let cose_sign1 = parse_cose_sign1(document)?;
        let attestation = decode_payload(&cose_sign1)?;
        verify_cose_signature(&cose_sign1, &self.verifying_key)?;
        AttestationDocument::from_verified(attestation)
    }
}

/// A SHA-384 sized PCR value filled with `byte`
#[must_use]
pub fn pcr_value(byte: u8) -> Vec<u8> {
    vec![byte; 48]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::AttestationError;

    fn claims() -> AttestationClaims {
        AttestationClaims {
            pcrs: BTreeMap::from([(0, pcr_value(0xaa)), (8, pcr_value(0x08))]),
            public_key: Some(vec![4u8; 65]),
            user_data: Some(b"key-id".to_vec()),
            nonce: None,
            timestamp: Some(1_700_000_123_456),
        }
    }

    #[test]
    fn test_issued_document_verifies() {
        let authority = TestAttestationAuthority::new();
        let doc = authority.verifier().verify(&authority.issue(claims())).unwrap();

        assert_eq!(doc.pcr(0), Some(pcr_value(0xaa).as_slice()));
        assert_eq!(doc.pcr(8), Some(pcr_value(0x08).as_slice()));
        assert_eq!(doc.pcr(1), None);
        assert_eq!(doc.user_data(), Some(b"key-id".as_slice()));
        assert_eq!(doc.public_key(), Some([4u8; 65].as_slice()));
        assert_eq!(doc.nonce(), None);
        assert_eq!(doc.digest(), "SHA384");
        assert_eq!(doc.timestamp_secs(), 1_700_000_123);
    }

    #[test]
    fn test_foreign_authority_is_rejected() {
        let authority = TestAttestationAuthority::new();
        let impostor = TestAttestationAuthority::new();

        let result = authority.verifier().verify(&impostor.issue(claims()));
        assert!(matches!(result, Err(AttestationError::InvalidSignature(_))));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let authority = TestAttestationAuthority::new();
        let mut bytes = authority.issue(claims());
        // Flip a byte inside the user data
        let position = bytes
            .windows(6)
            .position(|window| window == b"key-id")
            .unwrap();
        bytes[position] ^= 0x01;

        let result = authority.verifier().verify(&bytes);
        assert!(matches!(result, Err(AttestationError::InvalidSignature(_))));
    }

    #[test]
    fn test_non_es384_algorithm_is_rejected() {
        let authority = TestAttestationAuthority::new();
        // Valid P-384 signature, but the header claims ES256
        let bytes = authority.issue_with_algorithm(claims(), Algorithm::ES256);

        let Err(AttestationError::InvalidSignature(message)) = authority.verifier().verify(&bytes)
        else {
            panic!("a non-ES384 document must be rejected");
        };
        assert!(message.contains("expected ES384"), "{message}");
    }

    #[test]
    fn test_garbage_is_malformed() {
        let authority = TestAttestationAuthority::new();

        for bytes in [&b""[..], b"\x01\x02\x03", b"not cbor at all"] {
            let result = authority.verifier().verify(bytes);
            assert!(
                matches!(result, Err(AttestationError::MalformedDocument(_))),
                "expected malformed for {bytes:?}"
            );
        }
    }

    #[test]
    fn test_wrong_pcr_length_is_malformed() {
        let authority = TestAttestationAuthority::new();
        let mut bad = claims();
        bad.pcrs.insert(3, vec![0u8; 47]);

        let result = authority.verifier().verify(&authority.issue(bad));
        assert!(matches!(result, Err(AttestationError::MalformedDocument(_))));
    }
}
