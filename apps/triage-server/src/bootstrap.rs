use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use tracing::{info, warn};
use triage_core::{Config, InMemorySessionStore, TriageController, TriageStore};
use triage_kernel::Kernel;
use utoipa::OpenApi;

use crate::{access_log, router, AppState};

pub(crate) struct BootstrapOutput {
    pub router: axum::Router<AppState>,
    pub state: AppState,
}

/// Open storage and assemble the pipeline for `config`.
pub(crate) fn build(config: Config) -> anyhow::Result<BootstrapOutput> {
    let kernel = Kernel::open(Path::new(&config.storage.state_dir))?;
    let store: Arc<dyn TriageStore> = Arc::new(kernel.clone());
    Ok(build_with_store(config, kernel, store))
}

/// Like [`build`] but with an explicit triage store, which may differ from the
/// kernel serving admin reads.
pub(crate) fn build_with_store(
    config: Config,
    kernel: Kernel,
    store: Arc<dyn TriageStore>,
) -> BootstrapOutput {
    let sessions = Arc::new(InMemorySessionStore::new(
        Some(Duration::from_secs(config.session.idle_ttl_secs)),
        config.session.max_entries,
    ));
    let controller = Arc::new(TriageController::new(&config.triage, store, sessions));
    match kernel.count_knowledge(Some(controller.service())) {
        Ok(0) => warn!(
            service = controller.service(),
            "knowledge base is empty; every answer will be the fallback"
        ),
        Ok(n) => info!(service = controller.service(), entries = n, "knowledge base ready"),
        Err(err) => warn!("could not count knowledge entries: {err:#}"),
    }
    let (router, endpoints) = router::build_router();
    let state = AppState::new(controller, kernel, Arc::new(config), endpoints);
    BootstrapOutput { router, state }
}

pub(crate) fn attach_stateful_layers(
    router: axum::Router<AppState>,
    state: AppState,
) -> axum::Router<()> {
    router
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::metrics::track_http,
        ))
        .with_state::<()>(state)
}

pub(crate) fn attach_http_layers(
    router: axum::Router<()>,
    concurrency_limit: usize,
    cors_origins: &[String],
) -> axum::Router<()> {
    use tower::limit::ConcurrencyLimitLayer;
    use tower_http::trace::TraceLayer;

    let router = match cors_layer(cors_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };
    router
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
}

fn cors_layer(origins: &[String]) -> Option<tower_http::cors::CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return None;
    }
    Some(
        tower_http::cors::CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE])
            .allow_credentials(true),
    )
}

pub(crate) fn attach_global_layers(router: axum::Router<()>) -> axum::Router<()> {
    router.layer(axum::middleware::from_fn(access_log::access_log_mw))
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpConfigError {
    #[error("invalid concurrency limit: {0}")]
    InvalidConcurrency(usize),
    #[error("invalid bind address: {0}")]
    InvalidBind(String),
    #[error("bind {bind} is public and no admin token is configured; refusing to start")]
    MissingAdminToken { bind: String },
}

pub(crate) struct HttpConfig {
    pub addr: std::net::SocketAddr,
    pub concurrency_limit: usize,
}

pub(crate) fn http_config(config: &Config) -> Result<HttpConfig, HttpConfigError> {
    let http = &config.http;
    if http.concurrency_limit == 0 {
        return Err(HttpConfigError::InvalidConcurrency(http.concurrency_limit));
    }
    enforce_admin_token_guard(&http.bind, config.admin.token.as_deref())?;
    let host = http.bind.trim();
    let addr = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, http.port)
    } else {
        format!("{}:{}", host, http.port)
    };
    let addr = addr
        .parse()
        .map_err(|_| HttpConfigError::InvalidBind(http.bind.clone()))?;
    Ok(HttpConfig {
        addr,
        concurrency_limit: http.concurrency_limit,
    })
}

fn enforce_admin_token_guard(bind: &str, token: Option<&str>) -> Result<(), HttpConfigError> {
    let token_set = token.is_some_and(|t| !t.is_empty());
    let bind_lower = bind.trim().to_ascii_lowercase();
    let is_loopback = matches!(
        bind_lower.as_str(),
        "127.0.0.1" | "::1" | "[::1]" | "localhost"
    );
    if !is_loopback && !token_set {
        return Err(HttpConfigError::MissingAdminToken {
            bind: bind.to_string(),
        });
    }
    Ok(())
}

/// Write the OpenAPI document to `OPENAPI_OUT` when set; the caller exits afterwards.
pub(crate) fn ensure_openapi_export() -> Result<Option<String>, std::io::Error> {
    if let Ok(path) = std::env::var("OPENAPI_OUT") {
        if let Some(parent) = Path::new(&path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = crate::openapi::ApiDoc::openapi()
            .to_pretty_json()
            .map_err(std::io::Error::other)?;
        std::fs::write(&path, json)?;
        return Ok(Some(path));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforce_admin_token_loopback_allowed_without_token() {
        assert!(enforce_admin_token_guard("127.0.0.1", None).is_ok());
        assert!(enforce_admin_token_guard("localhost", Some("")).is_ok());
    }

    #[test]
    fn enforce_admin_token_requires_token_for_public_bind() {
        let err = enforce_admin_token_guard("0.0.0.0", None).unwrap_err();
        assert!(matches!(err, HttpConfigError::MissingAdminToken { .. }));
        assert!(enforce_admin_token_guard("0.0.0.0", Some("token")).is_ok());
    }

    #[test]
    fn http_config_parses_hosts() {
        let mut cfg = Config::default();
        let http = http_config(&cfg).unwrap();
        assert_eq!(http.addr.to_string(), "127.0.0.1:8095");

        cfg.http.bind = "::1".into();
        cfg.http.port = 9000;
        assert_eq!(http_config(&cfg).unwrap().addr.to_string(), "[::1]:9000");

        cfg.http.bind = "not a host".into();
        cfg.admin.token = Some("t".into());
        assert!(matches!(
            http_config(&cfg),
            Err(HttpConfigError::InvalidBind(_))
        ));

        cfg.http.concurrency_limit = 0;
        assert!(matches!(
            http_config(&cfg),
            Err(HttpConfigError::InvalidConcurrency(0))
        ));
    }

    #[test]
    fn cors_layer_only_with_origins() {
        assert!(cors_layer(&[]).is_none());
        assert!(cors_layer(&["https://portal.example.com".to_string()]).is_some());
    }
}
