mod attestations;
mod health;
mod signer;

use aide::{
    axum::{
        routing::{get, post},
        ApiRouter,
    },
    openapi::OpenApi,
    scalar::Scalar,
};
use axum::{Extension, Json};

use crate::types::Environment;

/// Creates the router with all handler routes.
///
/// The OpenAPI document and its Scalar viewer are only mounted where
/// `show_api_docs` allows them.
pub fn handler(environment: &Environment) -> ApiRouter {
    let router = ApiRouter::new()
        .api_route("/health", get(health::handler))
        .api_route("/v1/attestations", post(attestations::sign))
        .api_route("/v1/attestations/verify", post(attestations::verify))
        .api_route("/v1/signer", get(signer::handler));

    if !environment.show_api_docs() {
        return router;
    }

    let scalar = Scalar::new("/openapi.json").with_title("Attestation Signer Docs");
    router
        .route("/docs", scalar.axum_route())
        .route("/openapi.json", axum::routing::get(openapi_document))
}

#[allow(clippy::unused_async)]
async fn openapi_document(Extension(openapi): Extension<OpenApi>) -> Json<OpenApi> {
    Json(openapi)
}
