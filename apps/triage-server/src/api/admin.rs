use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::{responses, AppState};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

pub(crate) const ADMIN_HEADER: &str = "x-triage-admin";

/// Admin routes are open when no token is configured; startup refuses a
/// public bind in that case.
pub(crate) fn admin_ok(headers: &HeaderMap, token: Option<&str>) -> bool {
    let Some(expected) = token.filter(|t| !t.is_empty()) else {
        return true;
    };
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let presented = bearer.or_else(|| headers.get(ADMIN_HEADER).and_then(|h| h.to_str().ok()));
    presented.is_some_and(|p| ct_eq(p.trim().as_bytes(), expected.as_bytes()))
}

/// Constant-time equality for equal-length inputs.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// Most recent persisted conversations.
#[utoipa::path(
    get,
    path = "/admin/conversations",
    tag = "Admin",
    params(("limit" = Option<i64>, Query, description = "Maximum rows (1-500, default 50)")),
    responses(
        (status = 200, description = "Conversations, newest first", body = serde_json::Value),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn conversations_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> Response {
    if !admin_ok(&headers, state.config().admin.token.as_deref()) {
        return responses::unauthorized();
    }
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    match state.kernel().list_conversations_async(limit).await {
        Ok(items) => Json(json!({ "items": items })).into_response(),
        Err(err) => {
            error!("list conversations failed: {err:#}");
            responses::storage_unavailable()
        }
    }
}

/// One conversation with its messages.
#[utoipa::path(
    get,
    path = "/admin/conversations/{id}",
    tag = "Admin",
    params(("id" = i64, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Conversation and messages", body = serde_json::Value),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Unknown conversation"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn conversation_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if !admin_ok(&headers, state.config().admin.token.as_deref()) {
        return responses::unauthorized();
    }
    let kernel = state.kernel();
    let conversation = match kernel.get_conversation_async(id).await {
        Ok(Some(c)) => c,
        Ok(None) => return responses::not_found("conversation not found"),
        Err(err) => {
            error!(id, "get conversation failed: {err:#}");
            return responses::storage_unavailable();
        }
    };
    match kernel.list_messages_async(id).await {
        Ok(messages) => {
            Json(json!({ "conversation": conversation, "messages": messages })).into_response()
        }
        Err(err) => {
            error!(id, "list messages failed: {err:#}");
            responses::storage_unavailable()
        }
    }
}
