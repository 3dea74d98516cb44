use coset::CoseSign1;
use p384::ecdsa::VerifyingKey;
use webpki::{EndEntityCert, TrustAnchor};
use x509_cert::der::{Decode, DecodePem, Encode};
use x509_cert::Certificate;

use aws_nitro_enclaves_nsm_api::api::AttestationDoc;

use crate::constants::AWS_NITRO_ROOT_CERT;
use crate::cose::{decode_payload, parse_cose_sign1, verify_cose_signature};
use crate::types::{AttestationDocument, AttestationError, AttestationResult};
use crate::AttestationVerifier;

/// Verifies AWS Nitro Enclave attestation documents
///
/// Verification covers:
/// - COSE Sign1 structure parsing
/// - Certificate chain validation against the AWS Nitro root certificate
/// - ES384 signature verification with the leaf certificate key
///
/// The chain is validated at the document's own collection time, so documents
/// persisted by the enclave itself stay verifiable after the short-lived leaf
/// certificate has expired.
#[derive(Debug, Clone)]
pub struct NitroAttestationVerifier {
    root_certificate: Vec<u8>,
}

impl NitroAttestationVerifier {
    /// Creates a verifier anchored at the given root certificate (PEM or DER).
    ///
    /// # Errors
    /// Returns `InvalidTrustAnchor` if the certificate cannot be decoded.
    pub fn new(root_certificate: &[u8]) -> AttestationResult<Self> {
        let root_certificate = if root_certificate.starts_with(b"-----BEGIN") {
            Certificate::from_pem(root_certificate)
                .and_then(|certificate| certificate.to_der())
                .map_err(|e| {
                    AttestationError::InvalidTrustAnchor(format!(
                        "Failed to decode PEM root certificate: {e}"
                    ))
                })?
        } else {
            Certificate::from_der(root_certificate).map_err(|e| {
                AttestationError::InvalidTrustAnchor(format!(
                    "Failed to decode DER root certificate: {e}"
                ))
            })?;
            root_certificate.to_vec()
        };

        TrustAnchor::try_from_cert_der(&root_certificate).map_err(|e| {
            AttestationError::InvalidTrustAnchor(format!(
                "Failed to create trust anchor from root certificate: {e}"
            ))
        })?;

        Ok(Self { root_certificate })
    }

    /// Creates a verifier anchored at the embedded AWS Nitro Enclaves root
    ///
    /// # Errors
    /// Returns `InvalidTrustAnchor` if the embedded certificate cannot be used,
    /// which would indicate a corrupted build.
    pub fn aws() -> AttestationResult<Self> {
        Self::new(AWS_NITRO_ROOT_CERT)
    }

    /// Follows the AWS Nitro Enclave Attestation Document Specification:
    /// <https://docs.aws.amazon.com/enclaves/latest/user/nitro-enclave-attestation-document.html>
    fn verify_document(&self, bytes: &[u8]) -> AttestationResult<AttestationDocument> {
        // 1. Syntactical validation
        let cose_sign1 = parse_cose_sign1(bytes)?;
        let attestation = decode_payload(&cose_sign1)?;

        // 2. Semantic validation
        let leaf_cert = self.verify_certificate_chain(&attestation)?;

        // 3. Cryptographic validation
        Self::verify_leaf_signature(&cose_sign1, &leaf_cert)?;

        AttestationDocument::from_verified(attestation)
    }

    fn verify_certificate_chain(
        &self,
        attestation: &AttestationDoc,
    ) -> AttestationResult<Certificate> {
        let trust_anchor =
            TrustAnchor::try_from_cert_der(&self.root_certificate).map_err(|e| {
                AttestationError::InvalidTrustAnchor(format!(
                    "Failed to create trust anchor from root certificate: {e}"
                ))
            })?;

        // The first cabundle entry is the root itself
        let intermediate_certs: Vec<&[u8]> = attestation
            .cabundle
            .iter()
            .skip(1)
            .map(|cert| cert.as_slice())
            .collect();

        let validation_time =
            webpki::Time::from_seconds_since_unix_epoch(attestation.timestamp / 1000);

        let end_entity_cert =
            EndEntityCert::try_from(attestation.certificate.as_slice()).map_err(|e| {
                AttestationError::InvalidSignature(format!("Failed to parse leaf certificate: {e}"))
            })?;

        end_entity_cert
            .verify_is_valid_tls_server_cert(
                &[&webpki::ECDSA_P384_SHA384],
                &webpki::TlsServerTrustAnchors(&[trust_anchor]),
                &intermediate_certs,
                validation_time,
            )
            .map_err(|e| {
                AttestationError::InvalidSignature(format!(
                    "Certificate chain validation failed: {e}"
                ))
            })?;

        Certificate::from_der(&attestation.certificate).map_err(|e| {
            AttestationError::MalformedDocument(format!("Failed to decode leaf certificate: {e}"))
        })
    }

    fn verify_leaf_signature(
        cose_sign1: &CoseSign1,
        leaf_cert: &Certificate,
    ) -> AttestationResult<()> {
        let spki = &leaf_cert.tbs_certificate.subject_public_key_info;
        let public_key_bytes = spki.subject_public_key.as_bytes().ok_or_else(|| {
            AttestationError::InvalidSignature("Failed to extract public key bytes".to_string())
        })?;

        let verifying_key = VerifyingKey::from_sec1_bytes(public_key_bytes).map_err(|e| {
            AttestationError::InvalidSignature(format!("Failed to parse P-384 public key: {e}"))
        })?;

        verify_cose_signature(cose_sign1, &verifying_key)
    }
}

impl AttestationVerifier for NitroAttestationVerifier {
    fn verify(&self, document: &[u8]) -> AttestationResult<AttestationDocument> {
        self.verify_document(document)
    }
}
