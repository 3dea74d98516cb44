use std::sync::Arc;

use axum::{Extension, Json};
use base64::{engine::general_purpose::STANDARD, Engine};
use signer_types::SignerIdentityResponse;

use crate::{custody::Custody, types::AppError};

/// Custody identity of this enclave
///
/// The attestation binds the public key and address to the enclave's PCR0.
pub async fn handler(
    Extension(custody): Extension<Arc<Custody>>,
) -> Result<Json<SignerIdentityResponse>, AppError> {
    let signer = custody.signer().await?;

    Ok(Json(SignerIdentityResponse {
        address: signer.address().to_checksum(None),
        public_key: format!("0x{}", hex::encode(signer.public_key())),
        attestation: STANDARD.encode(signer.identity_document()),
    }))
}
