//! Session and caller identity derived from request headers.

use axum::http::{header, HeaderMap, HeaderValue};
use uuid::Uuid;

const MAX_SESSION_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Session {
    pub key: String,
    /// True when the request carried no usable cookie and a new key was issued.
    pub minted: bool,
}

fn valid_session_value(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_SESSION_LEN
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|hv| hv.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim())
}

/// Session from the named cookie, or a freshly minted one.
pub(crate) fn session_from_headers(headers: &HeaderMap, cookie_name: &str) -> Session {
    match cookie_value(headers, cookie_name) {
        Some(v) if valid_session_value(v) => Session {
            key: v.to_string(),
            minted: false,
        },
        _ => Session {
            key: Uuid::new_v4().to_string(),
            minted: true,
        },
    }
}

pub(crate) fn set_cookie(cookie_name: &str, session: &Session) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        cookie_name, session.key
    ))
    .ok()
}

/// Numeric user id from the identity header; anonymous otherwise.
pub(crate) fn user_from_headers(headers: &HeaderMap, header_name: &str) -> Option<i64> {
    headers
        .get(header_name)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
}
