mod common;

use std::{str::FromStr, sync::Arc};

use alloy_primitives::Address;
use attestation_verifier::testing::{pcr_value, AttestationClaims, TestAttestationAuthority};
use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine};
use common::{error_code, get, parse_response_body, peer_attestation, post_json, test_app};
use pretty_assertions::assert_eq;
use serde_json::json;
use signer_enclave::{
    custody::{Custody, MemoryArtifactStore},
    eip712,
    eip712::Domain,
    projection, server,
    testing::TestEnclave,
    types::Environment,
};
use signer_types::TypedDataDomain;

fn registry_domain() -> serde_json::Value {
    json!({
        "name": "NodeRegistry",
        "version": "1",
        "chainId": 11_155_111,
        "verifyingContract": "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"
    })
}

#[tokio::test]
async fn test_health_does_not_need_custody() {
    let (router, enclave) = test_app();

    let response = get(&router, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(enclave.kms.create_key_calls(), 0);
}

#[tokio::test]
async fn test_signer_identity_is_attested() {
    let (router, enclave) = test_app();

    let response = get(&router, "/v1/signer").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;

    let address = Address::from_str(body["address"].as_str().unwrap()).unwrap();
    assert_eq!(body["address"], address.to_checksum(None));

    let attestation = STANDARD
        .decode(body["attestation"].as_str().unwrap())
        .unwrap();
    let document = enclave.verifier().verify(&attestation).unwrap();
    assert_eq!(document.user_data(), Some(address.as_slice()));
    assert_eq!(
        body["public_key"],
        format!("0x{}", hex::encode(document.public_key().unwrap()))
    );
}

#[tokio::test]
async fn test_sign_then_verify_round_trip() {
    let (router, enclave) = test_app();
    let attestation = peer_attestation(&enclave, None);
    let fields = ["pcr0", "public_key", "user_data", "timestamp"];

    let response = post_json(
        &router,
        "/v1/attestations",
        &json!({
            "attestation": attestation,
            "domain": registry_domain(),
            "primary_type": "Register",
            "fields_to_sign": fields,
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    let signature_b64 = body["signature"].as_str().unwrap().to_string();
    let signature = STANDARD.decode(&signature_b64).unwrap();

    assert_eq!(signature.len(), 65);
    assert!(matches!(signature[64], 27 | 28));

    // Recompute independently of the route
    let signer = get(&router, "/v1/signer").await;
    let signer = parse_response_body(signer).await;
    let expected = Address::from_str(signer["address"].as_str().unwrap()).unwrap();

    let document = enclave
        .verifier()
        .verify(&STANDARD.decode(&attestation).unwrap())
        .unwrap();
    let message = projection::project(&document, "Register", &fields).unwrap();
    let domain_json: TypedDataDomain = serde_json::from_value(registry_domain()).unwrap();
    let domain = Domain::try_from(&domain_json).unwrap();
    let hash = eip712::verify_typed_data(&domain, &message, &signature, expected).unwrap();

    let response = post_json(
        &router,
        "/v1/attestations/verify",
        &json!({
            "attestation": attestation,
            "domain": registry_domain(),
            "primary_type": "Register",
            "fields_to_sign": fields,
            "signature": signature_b64,
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["address"], expected.to_checksum(None));
    assert_eq!(body["hash"], format!("0x{}", hex::encode(hash)));
}

#[tokio::test]
async fn test_sign_uses_default_fields() {
    let (router, enclave) = test_app();
    let attestation = peer_attestation(&enclave, None);

    let response = post_json(
        &router,
        "/v1/attestations",
        &json!({ "attestation": attestation }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let signature = parse_response_body(response).await["signature"]
        .as_str()
        .unwrap()
        .to_string();

    // Explicit defaults produce the same message
    let response = post_json(
        &router,
        "/v1/attestations/verify",
        &json!({
            "attestation": attestation,
            "domain": {},
            "primary_type": "Register",
            "fields_to_sign": ["pcr0", "public_key"],
            "signature": signature,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_signing_is_deterministic() {
    let (router, enclave) = test_app();
    let attestation = peer_attestation(&enclave, Some(b"n-1"));
    let request = json!({
        "attestation": attestation,
        "domain": registry_domain(),
        "fields_to_sign": ["nonce", "pcr1"],
    });

    let first = parse_response_body(post_json(&router, "/v1/attestations", &request).await).await;
    let second = parse_response_body(post_json(&router, "/v1/attestations", &request).await).await;

    assert_eq!(first["signature"], second["signature"]);
    assert_eq!(enclave.kms.create_key_calls(), 1);
}

#[tokio::test]
async fn test_absent_field_is_rejected() {
    let (router, enclave) = test_app();

    let response = post_json(
        &router,
        "/v1/attestations",
        &json!({
            "attestation": peer_attestation(&enclave, None),
            "fields_to_sign": ["pcr0", "nonce"],
        }),
    )
    .await;

    assert_eq!(
        error_code(response, StatusCode::BAD_REQUEST).await,
        "field_absent"
    );
}

#[tokio::test]
async fn test_unknown_field_is_rejected() {
    let (router, enclave) = test_app();

    let response = post_json(
        &router,
        "/v1/attestations",
        &json!({
            "attestation": peer_attestation(&enclave, None),
            "fields_to_sign": ["pcr0", "pcr32"],
        }),
    )
    .await;

    assert_eq!(
        error_code(response, StatusCode::BAD_REQUEST).await,
        "invalid_field"
    );
}

#[tokio::test]
async fn test_invalid_primary_type_is_rejected() {
    let (router, enclave) = test_app();

    let response = post_json(
        &router,
        "/v1/attestations",
        &json!({
            "attestation": peer_attestation(&enclave, None),
            "primary_type": "EIP712Domain",
        }),
    )
    .await;

    assert_eq!(
        error_code(response, StatusCode::BAD_REQUEST).await,
        "invalid_primary_type"
    );
}

#[tokio::test]
async fn test_invalid_domain_is_rejected() {
    let (router, enclave) = test_app();

    let response = post_json(
        &router,
        "/v1/attestations",
        &json!({
            "attestation": peer_attestation(&enclave, None),
            "domain": { "chainId": "eleven" },
        }),
    )
    .await;

    assert_eq!(
        error_code(response, StatusCode::BAD_REQUEST).await,
        "invalid_domain"
    );
}

#[tokio::test]
async fn test_undecodable_attestation_is_rejected() {
    let (router, _enclave) = test_app();

    let response = post_json(
        &router,
        "/v1/attestations",
        &json!({ "attestation": "%%% not base64 %%%" }),
    )
    .await;

    assert_eq!(
        error_code(response, StatusCode::BAD_REQUEST).await,
        "malformed_attestation"
    );
}

#[tokio::test]
async fn test_attestation_from_unknown_authority_is_rejected() {
    let (router, enclave) = test_app();

    let forged = TestAttestationAuthority::new().issue(AttestationClaims {
        pcrs: [(0, pcr_value(0x10))].into(),
        ..Default::default()
    });

    let response = post_json(
        &router,
        "/v1/attestations",
        &json!({ "attestation": STANDARD.encode(forged) }),
    )
    .await;

    assert_eq!(
        error_code(response, StatusCode::BAD_REQUEST).await,
        "invalid_attestation_signature"
    );
    // Rejected before custody is touched
    assert_eq!(enclave.kms.create_key_calls(), 0);
}

#[tokio::test]
async fn test_missing_content_type_is_rejected() {
    let (router, _enclave) = test_app();

    let request = axum::http::Request::builder()
        .method(axum::http::Method::POST)
        .uri("/v1/attestations")
        .body(axum::body::Body::from("{}"))
        .unwrap();
    let response = tower::ServiceExt::oneshot(router, request).await.unwrap();

    assert_eq!(
        error_code(response, StatusCode::BAD_REQUEST).await,
        "invalid_content_type"
    );
}

#[tokio::test]
async fn test_verify_against_other_address_fails() {
    let (router, enclave) = test_app();
    let attestation = peer_attestation(&enclave, None);

    let response = post_json(
        &router,
        "/v1/attestations",
        &json!({ "attestation": attestation }),
    )
    .await;
    let signature = parse_response_body(response).await["signature"].clone();

    let response = post_json(
        &router,
        "/v1/attestations/verify",
        &json!({
            "attestation": attestation,
            "signature": signature,
            "address": "0x0000000000000000000000000000000000000001",
        }),
    )
    .await;

    assert_eq!(
        error_code(response, StatusCode::UNPROCESSABLE_ENTITY).await,
        "address_mismatch"
    );
}

#[tokio::test]
async fn test_verify_detects_changed_domain() {
    let (router, enclave) = test_app();
    let attestation = peer_attestation(&enclave, None);

    let response = post_json(
        &router,
        "/v1/attestations",
        &json!({ "attestation": attestation, "domain": registry_domain() }),
    )
    .await;
    let signature = parse_response_body(response).await["signature"].clone();

    let response = post_json(
        &router,
        "/v1/attestations/verify",
        &json!({
            "attestation": attestation,
            "domain": { "name": "NodeRegistry", "version": "2" },
            "signature": signature,
        }),
    )
    .await;

    assert_eq!(
        error_code(response, StatusCode::UNPROCESSABLE_ENTITY).await,
        "address_mismatch"
    );
}

#[tokio::test]
async fn test_verify_rejects_short_signature() {
    let (router, enclave) = test_app();

    let response = post_json(
        &router,
        "/v1/attestations/verify",
        &json!({
            "attestation": peer_attestation(&enclave, None),
            "signature": STANDARD.encode([0u8; 64]),
        }),
    )
    .await;

    assert_eq!(
        error_code(response, StatusCode::BAD_REQUEST).await,
        "invalid_signature"
    );
}

#[tokio::test]
async fn test_docs_are_served_in_development() {
    let (router, _enclave) = test_app();

    let response = get(&router, "/openapi.json").await;
    assert_eq!(response.status(), StatusCode::OK);
    let document = parse_response_body(response).await;
    assert!(document["paths"]["/v1/attestations"].is_object());
    assert!(document["paths"]["/v1/signer"].is_object());

    assert_eq!(get(&router, "/docs").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_docs_are_hidden_in_production() {
    let enclave = TestEnclave::new(Arc::new(MemoryArtifactStore::new()));
    let custody = Arc::new(Custody::new(enclave.custodian()));
    let router = server::router(Environment::Production, custody, enclave.verifier());

    assert_eq!(
        get(&router, "/openapi.json").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(get(&router, "/docs").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(get(&router, "/health").await.status(), StatusCode::OK);
}
