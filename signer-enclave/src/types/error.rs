//! Universal error handling for the API

use std::sync::Arc;

use aide::OperationOutput;
use attestation_verifier::AttestationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use schemars::JsonSchema;
use serde::Serialize;

use crate::{
    custody::CustodyError,
    eip712::{TypedDataError, VerifyError},
    projection::ProjectionError,
    signer::SignerError,
};

/// API error response envelope
#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    /// Whether the client should retry the request
    pub allow_retry: bool,
    /// Error details
    error: ErrorBody,
}

/// Error body containing code and message
#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    /// Machine-readable error code
    pub code: &'static str,
    /// Human-readable error message
    pub message: String,
}

/// Application error type that wraps the API error response
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    inner: ApiErrorResponse,
}

impl AppError {
    /// Create a new application error
    #[must_use]
    pub fn new(
        status: StatusCode,
        code: &'static str,
        msg: impl Into<String>,
        retry: bool,
    ) -> Self {
        Self {
            status,
            inner: ApiErrorResponse {
                allow_retry: retry,
                error: ErrorBody {
                    code,
                    message: msg.into(),
                },
            },
        }
    }

    /// A 400 for a request that can be fixed by the client
    #[must_use]
    pub fn bad_request(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, msg, false)
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.inner.error.code
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the error based on status code
        match self.status.as_u16() {
            400..=499 => tracing::warn!(
                "Client error: {} - {}",
                self.inner.error.code,
                self.inner.error.message
            ),
            500..=599 => tracing::error!(
                "Server error: {} - {}",
                self.inner.error.code,
                self.inner.error.message
            ),
            _ => {}
        }

        (self.status, Json(self.inner)).into_response()
    }
}

impl OperationOutput for AppError {
    type Inner = ApiErrorResponse;

    fn operation_response(
        ctx: &mut aide::generate::GenContext,
        operation: &mut aide::openapi::Operation,
    ) -> Option<aide::openapi::Response> {
        Json::<ApiErrorResponse>::operation_response(ctx, operation)
    }
}

impl From<AttestationError> for AppError {
    fn from(err: AttestationError) -> Self {
        match &err {
            AttestationError::MalformedDocument(_) => {
                Self::bad_request("malformed_attestation", err.to_string())
            }
            AttestationError::InvalidSignature(_) => {
                Self::bad_request("invalid_attestation_signature", err.to_string())
            }
            AttestationError::InvalidTrustAnchor(msg) => {
                tracing::error!("Attestation trust anchor error: {msg}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                    false,
                )
            }
        }
    }
}

impl From<ProjectionError> for AppError {
    fn from(err: ProjectionError) -> Self {
        let code = match &err {
            ProjectionError::InvalidField(_) => "invalid_field",
            ProjectionError::FieldAbsent(_) => "field_absent",
            ProjectionError::InvalidPrimaryType(_) => "invalid_primary_type",
        };
        Self::bad_request(code, err.to_string())
    }
}

impl From<TypedDataError> for AppError {
    fn from(err: TypedDataError) -> Self {
        Self::bad_request("invalid_domain", err.to_string())
    }
}

impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        match &err {
            VerifyError::BadSignatureLength(_) => {
                Self::bad_request("invalid_signature", err.to_string())
            }
            VerifyError::RecoveryFailed(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "signature_recovery_failed",
                err.to_string(),
                false,
            ),
            VerifyError::AddressMismatch { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "address_mismatch",
                err.to_string(),
                false,
            ),
        }
    }
}

/// Bootstrap failures are only resolved by restarting the enclave
impl From<Arc<CustodyError>> for AppError {
    fn from(err: Arc<CustodyError>) -> Self {
        tracing::error!("Custody key unavailable: {err}");
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "custody_unavailable",
            "Signing key is not available",
            false,
        )
    }
}

impl From<SignerError> for AppError {
    fn from(err: SignerError) -> Self {
        tracing::error!("Signing error: {err}");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "signing_failed",
            "Failed to sign message",
            true,
        )
    }
}
