#![allow(dead_code)]

use std::sync::Arc;

use attestation_verifier::testing::{pcr_value, AttestationClaims};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use http_body_util::BodyExt;
use signer_enclave::{
    custody::{Custody, MemoryArtifactStore},
    server,
    testing::TestEnclave,
    types::Environment,
};
use tower::ServiceExt;

/// Router wired to in-memory collaborators, plus the enclave for assertions
pub fn test_app() -> (Router, TestEnclave) {
    let enclave = TestEnclave::new(Arc::new(MemoryArtifactStore::new()));
    let custody = Arc::new(Custody::new(enclave.custodian()));
    let router = server::router(Environment::Development, custody, enclave.verifier());

    (router, enclave)
}

/// Base64 attestation document from the enclave's authority for a peer node
pub fn peer_attestation(enclave: &TestEnclave, nonce: Option<&[u8]>) -> String {
    let document = enclave.secure_module.authority().issue(AttestationClaims {
        pcrs: [(0, pcr_value(0x10)), (1, pcr_value(0x11)), (2, pcr_value(0x12))].into(),
        public_key: Some(vec![0x04; 65]),
        user_data: Some(b"node-7".to_vec()),
        nonce: nonce.map(<[u8]>::to_vec),
        timestamp: Some(1_700_000_000_123),
    });
    STANDARD.encode(document)
}

pub async fn post_json(router: &Router, uri: &str, body: &serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    router.clone().oneshot(request).await.unwrap()
}

pub async fn get(router: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    router.clone().oneshot(request).await.unwrap()
}

/// Parse response body to JSON
pub async fn parse_response_body(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// Asserts an error envelope and returns its code
pub async fn error_code(response: Response, status: StatusCode) -> String {
    assert_eq!(response.status(), status);
    let body = parse_response_body(response).await;
    body["error"]["code"].as_str().unwrap().to_string()
}
