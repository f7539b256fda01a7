use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use once_cell::sync::Lazy;
use sha2::Digest as _;
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Clone, Debug)]
struct Cfg {
    enabled: bool,
    ua_hash: bool,
    trust_forward: bool,
}

static CFG: Lazy<Cfg> = Lazy::new(|| Cfg {
    enabled: std::env::var("TRIAGE_ACCESS_LOG").ok().as_deref() == Some("1"),
    ua_hash: std::env::var("TRIAGE_ACCESS_UA_HASH").ok().as_deref() == Some("1"),
    trust_forward: std::env::var("TRIAGE_TRUST_FORWARD_HEADERS").ok().as_deref() == Some("1"),
});

fn first_forwarded_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let v = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok())?;
    let ip = v.split(',').next().unwrap_or("").trim();
    (!ip.is_empty()).then(|| ip.to_string())
}

/// One JSON line per request on the `http.access` target.
///
/// Session cookies and request bodies are never logged.
pub async fn access_log_mw(req: Request<axum::body::Body>, next: Next) -> Response {
    if !CFG.enabled {
        return next.run(req).await;
    }
    let started = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let connect_ip = req
        .extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip().to_string());
    let remote = if CFG.trust_forward {
        first_forwarded_ip(req.headers()).or(connect_ip)
    } else {
        connect_ip
    };
    let ua_hash = if CFG.ua_hash {
        req.headers()
            .get(axum::http::header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(|ua| hex::encode(sha2::Sha256::digest(ua.as_bytes())))
    } else {
        None
    };
    let res = next.run(req).await;
    let mut obj = serde_json::json!({
        "ts": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "method": method.as_str(),
        "path": path,
        "status": res.status().as_u16(),
        "dur_ms": started.elapsed().as_millis() as u64,
    });
    if let Some(ip) = remote {
        obj["remote"] = serde_json::Value::String(ip);
    }
    if let Some(h) = ua_hash {
        obj["ua_hash"] = serde_json::Value::String(h);
    }
    tracing::info!(
        target: "http.access",
        "{}",
        serde_json::to_string(&obj).unwrap_or_else(|_| "{}".into())
    );
    res
}
