use std::{str::FromStr, sync::Arc};

use alloy_primitives::Address;
use attestation_verifier::{AttestationDocument, AttestationVerifier};
use axum::{Extension, Json};
use base64::{engine::general_purpose::STANDARD, Engine};
use signer_types::{
    SignAttestationRequest, SignAttestationResponse, VerifyAttestationRequest,
    VerifyAttestationResponse,
};
use tracing::debug;

use crate::{
    custody::Custody,
    eip712::{self, Domain},
    projection,
    types::{AppError, JsonBody},
};

/// Sign attestation fields
///
/// Verifies the attestation document, projects the requested fields into an
/// EIP-712 message and signs it with the custody key.
pub async fn sign(
    Extension(custody): Extension<Arc<Custody>>,
    Extension(verifier): Extension<Arc<dyn AttestationVerifier>>,
    JsonBody(request): JsonBody<SignAttestationRequest>,
) -> Result<Json<SignAttestationResponse>, AppError> {
    let document = verify_document(verifier.as_ref(), &request.attestation)?;
    let message = projection::project(
        &document,
        request.primary_type(),
        &request.fields_to_sign(),
    )?;
    let domain = Domain::try_from(&request.domain)?;

    let signer = custody.signer().await?;
    let (signature, hash) = eip712::sign_typed_data(&domain, &message, &signer)?;

    debug!(%hash, primary_type = message.primary_type(), "Signed attestation");

    Ok(Json(SignAttestationResponse {
        signature: STANDARD.encode(signature),
    }))
}

/// Verify an attestation signature
///
/// Rebuilds the message the same way as signing does and checks that the
/// signature recovers to the expected address, by default this enclave's.
pub async fn verify(
    Extension(custody): Extension<Arc<Custody>>,
    Extension(verifier): Extension<Arc<dyn AttestationVerifier>>,
    JsonBody(request): JsonBody<VerifyAttestationRequest>,
) -> Result<Json<VerifyAttestationResponse>, AppError> {
    let document = verify_document(verifier.as_ref(), &request.attestation)?;
    let message = projection::project(
        &document,
        request.primary_type(),
        &request.fields_to_sign(),
    )?;
    let domain = Domain::try_from(&request.domain)?;

    let signature = STANDARD
        .decode(&request.signature)
        .map_err(|_| AppError::bad_request("invalid_signature", "Signature is not valid base64"))?;

    let expected = match request.address.as_deref() {
        Some(address) => Address::from_str(address)
            .map_err(|_| AppError::bad_request("invalid_address", "Address is not a valid hex address"))?,
        None => custody.signer().await?.address(),
    };

    let hash = eip712::verify_typed_data(&domain, &message, &signature, expected)?;

    Ok(Json(VerifyAttestationResponse {
        address: expected.to_checksum(None),
        hash: format!("0x{}", hex::encode(hash)),
    }))
}

fn verify_document(
    verifier: &dyn AttestationVerifier,
    attestation: &str,
) -> Result<AttestationDocument, AppError> {
    let raw = STANDARD.decode(attestation).map_err(|_| {
        AppError::bad_request("malformed_attestation", "Attestation is not valid base64")
    })?;

    Ok(verifier.verify(&raw)?)
}
