use std::net::SocketAddr;
use tracing::{error, info};

mod access_log;
mod api;
mod app_state;
mod bootstrap;
mod identity;
mod metrics;
mod openapi;
mod responses;
mod router;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    match bootstrap::ensure_openapi_export() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(err) => {
            eprintln!("error: failed to write generated OPENAPI_OUT: {err}");
            std::process::exit(2);
        }
    }

    triage_otel::init();

    let (config, config_path) = match triage_core::load_effective_config() {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    match &config_path {
        Some(path) => info!(path = %path.display(), "loaded config"),
        None => info!("no config file found; using defaults"),
    }

    let http_cfg = match bootstrap::http_config(&config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    let cors_origins = config.http.cors_origins.clone();

    let bootstrap::BootstrapOutput { router, state } = match bootstrap::build(config) {
        Ok(out) => out,
        Err(err) => {
            eprintln!("error: failed to open storage: {err:#}");
            std::process::exit(2);
        }
    };

    let app = bootstrap::attach_global_layers(bootstrap::attach_http_layers(
        bootstrap::attach_stateful_layers(router, state),
        http_cfg.concurrency_limit,
        &cors_origins,
    ));

    let listener = match tokio::net::TcpListener::bind(http_cfg.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("error: failed to bind {}: {err}", http_cfg.addr);
            std::process::exit(2);
        }
    };
    info!(addr = %http_cfg.addr, "triage server listening");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }
    info!("server stopped");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod http_tests {
    use super::*;
    use crate::router::paths;
    use axum::{
        body::Body,
        http::{header, HeaderMap, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::{path::Path, sync::Arc};
    use tempfile::tempdir;
    use tower::util::ServiceExt;
    use triage_core::{Config, KnowledgeEntry, NewTurn, TriageStore};
    use triage_kernel::{Kernel, KnowledgeUpsert};

    fn test_config(dir: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.storage.state_dir = dir.display().to_string();
        cfg
    }

    fn finish(out: bootstrap::BootstrapOutput) -> Router {
        bootstrap::attach_global_layers(bootstrap::attach_http_layers(
            bootstrap::attach_stateful_layers(out.router, out.state),
            16,
            &[],
        ))
    }

    fn seeded_app(cfg: Config) -> (Router, Kernel) {
        let out = bootstrap::build(cfg).expect("bootstrap");
        let kernel = out.state.kernel().clone();
        kernel
            .upsert_knowledge(&KnowledgeUpsert {
                service: "AEPS".into(),
                key_phrase: "fingerprint mismatch".into(),
                answer_primary: "Clean the scanner and retry.".into(),
                answer_secondary: Some("स्कैनर साफ करें।".into()),
                ..Default::default()
            })
            .expect("seed");
        (finish(out), kernel)
    }

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    impl Reply {
        fn session_cookie(&self) -> Option<String> {
            self.headers
                .get(header::SET_COOKIE)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(';').next())
                .map(str::to_string)
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> Reply {
        let resp = app.clone().oneshot(req).await.expect("response");
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            headers,
            body,
        }
    }

    async fn post(app: &Router, path: &str, body: &str, headers: &[(&str, &str)]) -> Reply {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        send(app, builder.body(Body::from(body.to_string())).unwrap()).await
    }

    async fn get(app: &Router, path: &str, headers: &[(&str, &str)]) -> Reply {
        let mut builder = Request::builder().method("GET").uri(path);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        send(app, builder.body(Body::empty()).unwrap()).await
    }

    #[tokio::test]
    async fn healthz_and_about() {
        let dir = tempdir().unwrap();
        let (app, _) = seeded_app(test_config(dir.path()));
        let health = get(&app, paths::HEALTHZ, &[]).await;
        assert_eq!(health.status, StatusCode::OK);
        assert_eq!(health.body, json!({"ok": true}));

        let about = get(&app, paths::ABOUT, &[]).await;
        assert_eq!(about.status, StatusCode::OK);
        assert_eq!(about.body["default_service"], "AEPS");
        assert_eq!(about.body["knowledge_entries"], 1);
        let endpoints = about.body["endpoints"].as_array().unwrap();
        assert!(endpoints.contains(&json!("POST /help")));
    }

    #[tokio::test]
    async fn known_error_is_answered_and_recorded() {
        let dir = tempdir().unwrap();
        let (app, kernel) = seeded_app(test_config(dir.path()));
        let reply = post(
            &app,
            paths::HELP,
            r#"{"error_text":"AEPS Fingerprint Mismatch","page_url":"/aeps"}"#,
            &[("x-triage-user", "42")],
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["source"], "kb");
        assert_eq!(reply.body["category"], "AEPS");
        assert!(reply.body["answer_en"]
            .as_str()
            .unwrap()
            .contains("Clean the scanner and retry."));
        assert!(reply.session_cookie().unwrap().starts_with("triage_session="));

        let id = reply.body["conversation_id"].as_i64().expect("conversation id");
        let conv = kernel.get_conversation(id).unwrap().expect("stored");
        assert_eq!(conv.user_id, Some(42));
        assert_eq!(conv.page_url.as_deref(), Some("/aeps"));
        assert_eq!(kernel.list_messages(id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn session_cookie_drives_loop_exit() {
        let dir = tempdir().unwrap();
        let (app, kernel) = seeded_app(test_config(dir.path()));
        let first = post(&app, paths::HELP, r#"{"error_text":"hello"}"#, &[]).await;
        assert_eq!(first.body["input_type"], "greeting");
        assert!(first.body["conversation_id"].is_null());
        let cookie = first.session_cookie().expect("minted cookie");

        let second = post(
            &app,
            paths::WIDGET_HELP,
            r#"{"error_text":"hello"}"#,
            &[("cookie", cookie.as_str())],
        )
        .await;
        assert_eq!(second.body["source"], "exit");
        assert_eq!(second.body["input_type"], "loop_exit");
        assert!(second.headers.get(header::SET_COOKIE).is_none());

        // a request without the cookie is a new session
        let fresh = post(&app, paths::HELP, r#"{"error_text":"hello"}"#, &[]).await;
        assert_eq!(fresh.body["input_type"], "greeting");
        assert!(kernel.list_conversations(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_bodies_are_rejected_without_side_effects() {
        let dir = tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.limits.max_input_chars = 20;
        let (app, kernel) = seeded_app(cfg);
        let cases = [
            ("{broken", StatusCode::BAD_REQUEST),
            ("{}", StatusCode::UNPROCESSABLE_ENTITY),
            (r#"{"error_text":null}"#, StatusCode::UNPROCESSABLE_ENTITY),
            (r#"{"error_text":123}"#, StatusCode::UNPROCESSABLE_ENTITY),
            (r#"{"error_text":"   "}"#, StatusCode::UNPROCESSABLE_ENTITY),
            (
                r#"{"error_text":"fingerprint mismatch at terminal 7"}"#,
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (body, expected) in cases {
            let reply = post(&app, paths::HELP, body, &[]).await;
            assert_eq!(reply.status, expected, "{body}");
            assert_eq!(reply.body["status"], expected.as_u16());
            assert_eq!(reply.body["type"], "about:blank");
        }
        assert!(kernel.list_conversations(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn escalation_and_unknown_answers() {
        let dir = tempdir().unwrap();
        let (app, kernel) = seeded_app(test_config(dir.path()));
        let esc = post(&app, paths::HELP, r#"{"error_text":"talk to a human"}"#, &[]).await;
        assert_eq!(esc.body["source"], "escalation");
        assert!(esc.body["answer_hi"].is_string());
        assert!(kernel.list_conversations(10).unwrap().is_empty());

        let unknown = post(
            &app,
            paths::HELP,
            r#"{"error_text":"xyz-unmapped-code-99"}"#,
            &[],
        )
        .await;
        assert_eq!(unknown.body["source"], "unknown");
        assert!(unknown.body["conversation_id"].is_i64());
        assert_eq!(kernel.list_conversations(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn admin_routes_honour_token() {
        let dir = tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.admin.token = Some("s3cret".into());
        let (app, _) = seeded_app(cfg);
        let reply = post(&app, paths::HELP, r#"{"error_text":"fingerprint mismatch"}"#, &[]).await;
        let id = reply.body["conversation_id"].as_i64().unwrap();

        let denied = get(&app, paths::ADMIN_CONVERSATIONS, &[]).await;
        assert_eq!(denied.status, StatusCode::UNAUTHORIZED);

        let auth = [("x-triage-admin", "s3cret")];
        let list = get(&app, "/admin/conversations?limit=5", &auth).await;
        assert_eq!(list.status, StatusCode::OK);
        assert_eq!(list.body["items"][0]["id"], id);

        let detail = get(&app, &format!("/admin/conversations/{id}"), &auth).await;
        assert_eq!(detail.status, StatusCode::OK);
        assert_eq!(detail.body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(detail.body["messages"][1]["data"]["source"], "kb");

        let missing = get(&app, "/admin/conversations/9999", &auth).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    struct FailingStore;

    impl TriageStore for FailingStore {
        fn knowledge_for_service(&self, _service: &str) -> anyhow::Result<Vec<KnowledgeEntry>> {
            anyhow::bail!("database is locked")
        }

        fn record_turn(&self, _turn: &NewTurn) -> anyhow::Result<i64> {
            anyhow::bail!("database is locked")
        }
    }

    #[tokio::test]
    async fn storage_failure_is_503_with_generic_detail() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        let kernel = Kernel::open(dir.path()).unwrap();
        let app = finish(bootstrap::build_with_store(cfg, kernel, Arc::new(FailingStore)));
        let reply = post(&app, paths::HELP, r#"{"error_text":"E1001 at terminal"}"#, &[]).await;
        assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!reply.body["detail"].as_str().unwrap().contains("locked"));

        // deflections never reach storage
        let greeting = post(&app, paths::HELP, r#"{"error_text":"hello!"}"#, &[]).await;
        assert_eq!(greeting.status, StatusCode::OK);

        let (_, text) = get_text(&app, paths::METRICS).await;
        assert!(text.contains("triage_storage_failures_total 1\n"), "{text}");
    }

    async fn get_text(app: &Router, path: &str) -> (StatusCode, String) {
        let req = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.expect("response");
        let status = resp.status();
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn metrics_count_requests_and_outcomes() {
        let dir = tempdir().unwrap();
        let (app, _) = seeded_app(test_config(dir.path()));
        post(&app, paths::HELP, r#"{"error_text":"fingerprint mismatch"}"#, &[]).await;
        post(&app, paths::HELP, r#"{"error_text":"hello"}"#, &[]).await;
        post(&app, paths::HELP, "{}", &[]).await;

        let (status, text) = get_text(&app, paths::METRICS).await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("triage_http_requests_total{path=\"/help\"} 3\n"), "{text}");
        assert!(text.contains("triage_http_errors_total{path=\"/help\"} 1\n"), "{text}");
        assert!(text.contains("triage_outcomes_total{source=\"kb\"} 1\n"), "{text}");
        assert!(text.contains("triage_outcomes_total{source=\"greeting\"} 1\n"), "{text}");
        assert!(text.contains("triage_storage_failures_total 0\n"), "{text}");
    }

    #[tokio::test]
    async fn openapi_document_lists_routes() {
        let dir = tempdir().unwrap();
        let (app, _) = seeded_app(test_config(dir.path()));
        let reply = get(&app, paths::SPEC_OPENAPI, &[]).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert!(reply.body["paths"]["/help"]["post"].is_object());
        assert!(reply.body["paths"]["/admin/conversations/{id}"].is_object());
        assert!(reply.body["paths"]["/metrics"]["get"].is_object());
    }
}
