//! HTTP client for the attestation signer.
//!
//! A client is bound to one EIP-712 domain and primary type, so callers only
//! hand over the attestation document and the fields to sign.

#![deny(clippy::all, clippy::pedantic, clippy::nursery, dead_code)]

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{header, Client, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use signer_types::{
    SignAttestationRequest, SignAttestationResponse, SignerIdentityResponse, TypedDataDomain,
    VerifyAttestationRequest, VerifyAttestationResponse, DEFAULT_PRIMARY_TYPE,
};
use thiserror::Error;

/// Default request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Maximum number of idle connections to maintain per host
const MAX_IDLE_CONNECTIONS_PER_HOST: usize = 10;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to create HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("Request to the signer failed: {0}")]
    Transport(#[from] reqwest_middleware::Error),

    #[error("Unreadable response from the signer: {0}")]
    Response(#[from] reqwest::Error),

    #[error("Failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The signer answered with its error envelope
    #[error("Signer returned {status}: {code} - {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        allow_retry: bool,
    },

    #[error("Signature in response is not valid base64: {0}")]
    InvalidSignature(#[from] base64::DecodeError),
}

/// Operations exposed by the attestation signer
#[async_trait::async_trait]
pub trait SignerApi: Send + Sync {
    /// Signs `fields` of a COSE Sign1 attestation document, returning the
    /// 65 byte `r || s || v` signature. An empty `fields` signs the defaults.
    ///
    /// # Errors
    /// Returns `Api` with the signer's error code when it rejects the request
    async fn sign_attestation_document(
        &self,
        document: &[u8],
        fields: &[&str],
    ) -> Result<Vec<u8>, ClientError>;

    /// Asks the signer to check a signature over the same projection.
    ///
    /// # Errors
    /// Returns `Api` with code `address_mismatch` when the signature does not
    /// recover to the expected address
    async fn verify_attestation_signature(
        &self,
        document: &[u8],
        fields: &[&str],
        signature: &[u8],
        address: Option<&str>,
    ) -> Result<VerifyAttestationResponse, ClientError>;

    /// Fetches the signer's address, public key and identity attestation
    ///
    /// # Errors
    /// Returns `Api` with code `custody_unavailable` when the signing key is not provisioned
    async fn signer_identity(&self) -> Result<SignerIdentityResponse, ClientError>;
}

pub struct SignerClient {
    base_url: String,
    domain: TypedDataDomain,
    primary_type: String,
    http_client: ClientWithMiddleware,
}

impl SignerClient {
    /// Creates a client for the signer at `base_url`, for example
    /// `http://127.0.0.1:8001`. A missing or empty `primary_type` means `Register`.
    ///
    /// # Errors
    /// Returns `Build` if the HTTP client cannot be created
    pub fn new(
        base_url: impl Into<String>,
        domain: TypedDataDomain,
        primary_type: Option<String>,
    ) -> Result<Self, ClientError> {
        let reqwest_client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS_PER_HOST)
            .build()
            .map_err(ClientError::Build)?;

        let http_client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();

        let primary_type = primary_type
            .filter(|primary_type| !primary_type.is_empty())
            .unwrap_or_else(|| DEFAULT_PRIMARY_TYPE.to_string());

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            domain,
            primary_type,
            http_client,
        })
    }

    #[must_use]
    pub fn primary_type(&self) -> &str {
        &self.primary_type
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        let response = self
            .http_client
            .post(format!("{}{path}", self.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_string(body)?)
            .send()
            .await?;

        decode(response).await
    }
}

#[async_trait::async_trait]
impl SignerApi for SignerClient {
    async fn sign_attestation_document(
        &self,
        document: &[u8],
        fields: &[&str],
    ) -> Result<Vec<u8>, ClientError> {
        let request = SignAttestationRequest {
            attestation: STANDARD.encode(document),
            domain: self.domain.clone(),
            primary_type: Some(self.primary_type.clone()),
            fields_to_sign: fields.iter().map(ToString::to_string).collect(),
        };

        let response: SignAttestationResponse = self.post("/v1/attestations", &request).await?;
        Ok(STANDARD.decode(response.signature)?)
    }

    async fn verify_attestation_signature(
        &self,
        document: &[u8],
        fields: &[&str],
        signature: &[u8],
        address: Option<&str>,
    ) -> Result<VerifyAttestationResponse, ClientError> {
        let request = VerifyAttestationRequest {
            attestation: STANDARD.encode(document),
            domain: self.domain.clone(),
            primary_type: Some(self.primary_type.clone()),
            fields_to_sign: fields.iter().map(ToString::to_string).collect(),
            signature: STANDARD.encode(signature),
            address: address.map(ToString::to_string),
        };

        self.post("/v1/attestations/verify", &request).await
    }

    async fn signer_identity(&self) -> Result<SignerIdentityResponse, ClientError> {
        let response = self
            .http_client
            .get(format!("{}/v1/signer", self.base_url))
            .send()
            .await?;

        decode(response).await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    #[serde(default)]
    allow_retry: bool,
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<R>().await?);
    }

    let body = response.text().await?;
    let error = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => ClientError::Api {
            status: status.as_u16(),
            code: envelope.error.code,
            message: envelope.error.message,
            allow_retry: envelope.allow_retry,
        },
        // Plain responses from outside the handlers, e.g. a 404 or a timeout layer
        Err(_) => ClientError::Api {
            status: status.as_u16(),
            code: "unexpected_response".to_string(),
            message: body,
            allow_retry: status.is_server_error(),
        },
    };
    Err(error)
}
