use std::mem;

use axum::{
    handler::Handler,
    routing::{get, post},
    Router,
};

use crate::{api, AppState};

pub(crate) struct RouterBuilder {
    router: Router<AppState>,
    endpoints: Vec<String>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn route_get<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.endpoints.push(format!("GET {}", path));
        let router = mem::take(&mut self.router);
        self.router = router.route(path, get(handler));
        self
    }

    pub fn route_post<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.endpoints.push(format!("POST {}", path));
        let router = mem::take(&mut self.router);
        self.router = router.route(path, post(handler));
        self
    }

    pub fn build(self) -> (Router<AppState>, Vec<String>) {
        (self.router, self.endpoints)
    }
}

pub(crate) mod paths {
    pub const HEALTHZ: &str = "/healthz";
    pub const ABOUT: &str = "/about";
    pub const HELP: &str = "/help";
    pub const WIDGET_HELP: &str = "/smart-assistant/help";
    pub const METRICS: &str = "/metrics";
    pub const SPEC_OPENAPI: &str = "/spec/openapi.json";
    pub const ADMIN_CONVERSATIONS: &str = "/admin/conversations";
    pub const ADMIN_CONVERSATION_ID: &str = "/admin/conversations/{id}";
}

pub(crate) fn build_router() -> (Router<AppState>, Vec<String>) {
    let mut builder = RouterBuilder::new();
    builder
        .route_get(paths::HEALTHZ, api::meta::healthz)
        .route_get(paths::ABOUT, api::meta::about)
        .route_get(paths::METRICS, api::metrics::metrics_prometheus)
        .route_get(paths::SPEC_OPENAPI, api::meta::spec_openapi)
        .route_post(paths::HELP, api::help::help)
        .route_post(paths::WIDGET_HELP, api::help::help)
        .route_get(paths::ADMIN_CONVERSATIONS, api::admin::conversations_list)
        .route_get(paths::ADMIN_CONVERSATION_ID, api::admin::conversation_get);
    builder.build()
}
