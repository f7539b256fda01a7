use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::{error, warn};

use triage_core::{validate_error_text, TriageError, TriageRequest};

use crate::{identity, responses, AppState};

/// Pull `error_text` and `page_url` out of a request body.
fn parse_body(body: &[u8]) -> Result<(String, Option<String>), Response> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| responses::bad_request("request body must be a JSON object"))?;
    let Value::Object(map) = value else {
        return Err(responses::bad_request("request body must be a JSON object"));
    };
    let text = match map.get("error_text") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => {
            return Err(responses::unprocessable("error_text is required"));
        }
        Some(_) => return Err(responses::unprocessable("error_text must be a string")),
    };
    let page_url = match map.get("page_url") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::String(_)) | Some(Value::Null) | None => None,
        Some(_) => return Err(responses::unprocessable("page_url must be a string")),
    };
    Ok((text, page_url))
}

/// Triage one support message.
#[utoipa::path(
    post,
    path = "/help",
    tag = "Triage",
    operation_id = "help_doc",
    description = "Classify an error message and answer it from the knowledge base. Also served at /smart-assistant/help.",
    request_body = crate::openapi::HelpRequest,
    responses(
        (status = 200, description = "Triage outcome", body = crate::openapi::HelpResponse),
        (status = 400, description = "Malformed JSON"),
        (status = 422, description = "Missing, blank or oversized error_text"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn help(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let (text, page_url) = match parse_body(&body) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };
    let cfg = state.config();
    if let Err(TriageError::Validation(msg)) =
        validate_error_text(&text, cfg.limits.max_input_chars)
    {
        return responses::unprocessable(&msg);
    }

    let session = identity::session_from_headers(&headers, &cfg.session.cookie_name);
    let req = TriageRequest {
        raw_text: text,
        page_url,
        session_key: session.key.clone(),
        user_id: identity::user_from_headers(&headers, &cfg.identity.user_header),
    };

    let controller = state.controller();
    let outcome = match tokio::task::spawn_blocking(move || controller.handle(&req)).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("triage task failed: {err}");
            return responses::internal_error();
        }
    };

    let mut resp = match outcome {
        Ok(triage) => {
            state.metrics().record_outcome(triage.source.as_str());
            Json(triage).into_response()
        }
        Err(TriageError::Validation(msg)) => {
            warn!("late validation failure: {msg}");
            return responses::unprocessable(&msg);
        }
        Err(TriageError::Storage(err)) => {
            error!("triage storage failure: {err:#}");
            state.metrics().record_storage_failure();
            responses::storage_unavailable()
        }
    };
    if session.minted {
        if let Some(cookie) = identity::set_cookie(&cfg.session.cookie_name, &session) {
            resp.headers_mut().insert(header::SET_COOKIE, cookie);
        }
    }
    resp
}
