use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

/// RFC 7807 style problem body.
pub fn problem(status: StatusCode, title: &str, detail: Option<&str>) -> Response {
    let mut body = json!({"type": "about:blank", "title": title, "status": status.as_u16()});
    if let Some(d) = detail {
        body["detail"] = json!(d);
    }
    (status, Json(body)).into_response()
}

pub fn unauthorized() -> Response {
    problem(StatusCode::UNAUTHORIZED, "Unauthorized", None)
}

pub fn bad_request(detail: &str) -> Response {
    problem(StatusCode::BAD_REQUEST, "Bad Request", Some(detail))
}

pub fn unprocessable(detail: &str) -> Response {
    problem(StatusCode::UNPROCESSABLE_ENTITY, "Unprocessable Entity", Some(detail))
}

pub fn not_found(detail: &str) -> Response {
    problem(StatusCode::NOT_FOUND, "Not Found", Some(detail))
}

/// Storage is down; callers may retry. Details stay in the logs.
pub fn storage_unavailable() -> Response {
    problem(
        StatusCode::SERVICE_UNAVAILABLE,
        "Service Unavailable",
        Some("The help service is temporarily unavailable. Please try again shortly."),
    )
}

pub fn internal_error() -> Response {
    problem(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error",
        None,
    )
}
