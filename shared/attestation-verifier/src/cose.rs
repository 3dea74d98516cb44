//! COSE Sign1 envelope handling shared by every verifier.

use aws_nitro_enclaves_nsm_api::api::AttestationDoc;
use coset::{iana::Algorithm, AsCborValue, CoseSign1, RegisteredLabelWithPrivate};
use p384::ecdsa::{signature::Verifier as _, Signature, VerifyingKey};

use crate::constants::ES384_SIGNATURE_LENGTH;
use crate::types::{AttestationError, AttestationResult};

/// Parses the outer COSE Sign1 structure of an attestation document.
///
/// # Errors
/// Returns `MalformedDocument` if the bytes are not an untagged CBOR array
/// holding a COSE Sign1 structure.
pub fn parse_cose_sign1(bytes: &[u8]) -> AttestationResult<CoseSign1> {
    // Validate before loading into buffer
    let Some(&first_byte) = bytes.first() else {
        return Err(AttestationError::MalformedDocument(
            "Empty attestation document".to_string(),
        ));
    };

    if !(0x80..=0x97).contains(&first_byte) && first_byte != 0x9f {
        return Err(AttestationError::MalformedDocument(format!(
            "Invalid CBOR magic byte: expected array marker (0x80-0x97 or 0x9f), got 0x{first_byte:02x}"
        )));
    }

    let cbor_value: ciborium::Value = ciborium::from_reader(bytes).map_err(|e| {
        AttestationError::MalformedDocument(format!("Failed to parse CBOR: {e}"))
    })?;

    CoseSign1::from_cbor_value(cbor_value).map_err(|e| {
        AttestationError::MalformedDocument(format!("Failed to parse COSE Sign1: {e}"))
    })
}

/// Decodes the CBOR attestation payload carried by a COSE Sign1 structure.
///
/// # Errors
/// Returns `MalformedDocument` if the payload is missing or not a Nitro attestation document.
pub fn decode_payload(cose_sign1: &CoseSign1) -> AttestationResult<AttestationDoc> {
    let payload = cose_sign1.payload.as_ref().ok_or_else(|| {
        AttestationError::MalformedDocument("Missing payload in COSE Sign1".to_string())
    })?;

    ciborium::from_reader::<AttestationDoc, _>(payload.as_slice()).map_err(|e| {
        AttestationError::MalformedDocument(format!("Failed to parse attestation document: {e}"))
    })
}

/// Verifies the ES384 signature of a COSE Sign1 structure with the given key.
///
/// # Errors
/// Returns `InvalidSignature` if the protected header does not name ES384, or
/// if the signature has the wrong length or does not validate.
pub fn verify_cose_signature(
    cose_sign1: &CoseSign1,
    verifying_key: &VerifyingKey,
) -> AttestationResult<()> {
    if cose_sign1.payload.is_none() {
        return Err(AttestationError::MalformedDocument(
            "Missing payload in COSE Sign1".to_string(),
        ));
    }

    let algorithm = &cose_sign1.protected.header.alg;
    if *algorithm != Some(RegisteredLabelWithPrivate::Assigned(Algorithm::ES384)) {
        return Err(AttestationError::InvalidSignature(format!(
            "Unsupported COSE algorithm {algorithm:?}, expected ES384"
        )));
    }

    // Nitro uses P-384 signatures which should be exactly 96 bytes
    if cose_sign1.signature.len() != ES384_SIGNATURE_LENGTH {
        return Err(AttestationError::InvalidSignature(format!(
            "Invalid signature length: expected {ES384_SIGNATURE_LENGTH} bytes, got {}",
            cose_sign1.signature.len()
        )));
    }

    cose_sign1
        .verify_signature(b"", |signature, sig_structure| {
            let signature = Signature::try_from(signature)?;
            verifying_key.verify(sig_structure, &signature)
        })
        .map_err(|e| {
            AttestationError::InvalidSignature(format!("Signature verification failed: {e}"))
        })
}
