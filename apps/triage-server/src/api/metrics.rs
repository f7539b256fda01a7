use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use std::fmt::Write;

use crate::metrics::MetricsSummary;
use crate::AppState;

fn sanitize_label(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            '"' => '\'',
            '\\' => '/',
            _ => c,
        })
        .collect()
}

fn write_metric_line(
    out: &mut String,
    name: &str,
    labels: &[(&str, String)],
    value: impl std::fmt::Display,
) {
    if labels.is_empty() {
        let _ = writeln!(out, "{} {}", name, value);
    } else {
        let rendered: Vec<String> = labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, sanitize_label(v)))
            .collect();
        let _ = writeln!(out, "{}{{{}}} {}", name, rendered.join(","), value);
    }
}

fn render_prometheus(summary: &MetricsSummary) -> String {
    let mut out = String::new();

    out.push_str("# HELP triage_http_requests_total Requests per matched route\n# TYPE triage_http_requests_total counter\n");
    for (path, route) in &summary.routes {
        write_metric_line(
            &mut out,
            "triage_http_requests_total",
            &[("path", path.clone())],
            route.hits,
        );
    }
    out.push_str("# HELP triage_http_errors_total Responses with status >= 400 per matched route\n# TYPE triage_http_errors_total counter\n");
    for (path, route) in &summary.routes {
        write_metric_line(
            &mut out,
            "triage_http_errors_total",
            &[("path", path.clone())],
            route.errors,
        );
    }
    out.push_str("# HELP triage_http_request_duration_ms Request latency per matched route\n# TYPE triage_http_request_duration_ms histogram\n");
    for (path, route) in &summary.routes {
        for bucket in &route.buckets {
            let le = bucket
                .le_ms
                .map(|b| b.to_string())
                .unwrap_or_else(|| "+Inf".to_string());
            write_metric_line(
                &mut out,
                "triage_http_request_duration_ms_bucket",
                &[("path", path.clone()), ("le", le)],
                bucket.count,
            );
        }
        let labels = [("path", path.clone())];
        write_metric_line(
            &mut out,
            "triage_http_request_duration_ms_sum",
            &labels,
            route.sum_ms,
        );
        write_metric_line(
            &mut out,
            "triage_http_request_duration_ms_count",
            &labels,
            route.hits,
        );
    }
    out.push_str("# HELP triage_outcomes_total Triage answers by source\n# TYPE triage_outcomes_total counter\n");
    for (source, n) in &summary.outcomes {
        write_metric_line(
            &mut out,
            "triage_outcomes_total",
            &[("source", source.clone())],
            n,
        );
    }
    out.push_str("# HELP triage_storage_failures_total Triage turns that failed on storage\n# TYPE triage_storage_failures_total counter\n");
    write_metric_line(
        &mut out,
        "triage_storage_failures_total",
        &[],
        summary.storage_failures,
    );
    out
}

/// Prometheus text exposition of request and triage counters.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Public",
    responses((status = 200, description = "Prometheus metrics", content_type = "text/plain", body = String))
)]
pub async fn metrics_prometheus(State(state): State<AppState>) -> Response {
    let body = render_prometheus(&state.metrics().snapshot());
    let mut response = Response::new(body.into());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;

    #[test]
    fn renders_routes_outcomes_and_failures() {
        let m = Metrics::new();
        m.record_route("/help", 200, 7);
        m.record_outcome("kb");
        m.record_storage_failure();
        let text = render_prometheus(&m.snapshot());
        assert!(text.contains("triage_http_requests_total{path=\"/help\"} 1\n"));
        assert!(text.contains("triage_http_errors_total{path=\"/help\"} 0\n"));
        assert!(text.contains(
            "triage_http_request_duration_ms_bucket{path=\"/help\",le=\"5\"} 0\n"
        ));
        assert!(text.contains(
            "triage_http_request_duration_ms_bucket{path=\"/help\",le=\"10\"} 1\n"
        ));
        assert!(text.contains(
            "triage_http_request_duration_ms_bucket{path=\"/help\",le=\"+Inf\"} 1\n"
        ));
        assert!(text.contains("triage_http_request_duration_ms_sum{path=\"/help\"} 7\n"));
        assert!(text.contains("triage_outcomes_total{source=\"kb\"} 1\n"));
        assert!(text.contains("triage_storage_failures_total 1\n"));
    }

    #[test]
    fn labels_are_sanitized() {
        assert_eq!(sanitize_label("a\"b\nc"), "a'b c");
    }
}
