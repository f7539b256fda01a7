use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use utoipa::OpenApi;

use crate::AppState;

/// Health probe.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "Meta",
    operation_id = "healthz_doc",
    description = "Service readiness probe.",
    responses(
        (status = 200, description = "Service healthy", body = crate::openapi::HealthOk)
    )
)]
pub async fn healthz() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

/// Service metadata and endpoint index.
#[utoipa::path(
    get,
    path = "/about",
    tag = "Meta",
    operation_id = "about_doc",
    description = "Service name, version, configured knowledge service and endpoints.",
    responses(
        (status = 200, description = "Service metadata", body = crate::openapi::AboutResponse)
    )
)]
pub async fn about(State(state): State<AppState>) -> impl IntoResponse {
    let service = state.controller().service().to_string();
    let knowledge_entries = state
        .kernel()
        .count_knowledge_async(Some(&service))
        .await
        .ok();
    let cfg = state.config();
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "http": {"bind": cfg.http.bind, "port": cfg.http.port},
        "default_service": service,
        "knowledge_entries": knowledge_entries,
        "endpoints": state.endpoints().as_slice(),
    }))
}

/// OpenAPI document generated from in-code annotations.
#[utoipa::path(
    get,
    path = "/spec/openapi.json",
    tag = "Specs",
    responses((status = 200, content_type = "application/json"))
)]
pub async fn spec_openapi() -> Response {
    match crate::openapi::ApiDoc::openapi().to_pretty_json() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("failed to render openapi: {err}");
            crate::responses::internal_error()
        }
    }
}
