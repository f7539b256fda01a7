use utoipa::{OpenApi, ToSchema};

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HealthOk {
    pub ok: bool,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HttpInfo {
    pub bind: String,
    pub port: u16,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct AboutResponse {
    pub service: String,
    pub version: String,
    pub http: HttpInfo,
    #[schema(example = "AEPS")]
    pub default_service: String,
    #[schema(nullable, value_type = Option<i64>)]
    pub knowledge_entries: Option<i64>,
    #[schema(example = json!(["GET /healthz", "POST /help"]))]
    pub endpoints: Vec<String>,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HelpRequest {
    #[schema(example = "Error: Fingerprint mismatch")]
    pub error_text: String,
    #[schema(nullable, value_type = Option<String>)]
    pub page_url: Option<String>,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct HelpResponse {
    /// Set only for knowledge-base and fallback answers.
    #[schema(nullable, value_type = Option<i64>)]
    pub conversation_id: Option<i64>,
    /// `kb`, `unknown`, `exit`, `escalation`, or the deflecting input kind.
    #[schema(example = "kb")]
    pub source: String,
    pub answer_en: String,
    #[schema(nullable, value_type = Option<String>)]
    pub answer_hi: Option<String>,
    #[schema(example = "valid")]
    pub input_type: String,
    #[schema(nullable, value_type = Option<String>)]
    pub category: Option<String>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::meta::healthz,
        crate::api::meta::about,
        crate::api::meta::spec_openapi,
        crate::api::metrics::metrics_prometheus,
        crate::api::help::help,
        crate::api::admin::conversations_list,
        crate::api::admin::conversation_get,
    ),
    components(schemas(HealthOk, HttpInfo, AboutResponse, HelpRequest, HelpResponse)),
    tags(
        (name = "Meta", description = "Service metadata and health"),
        (name = "Triage", description = "Error-help triage"),
        (name = "Admin", description = "Read-only inspection of persisted conversations"),
        (name = "Specs", description = "Generated API documents"),
        (name = "Public", description = "Scrape endpoints")
    )
)]
pub struct ApiDoc;
