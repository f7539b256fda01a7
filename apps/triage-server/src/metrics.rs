use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use axum::extract::{MatchedPath, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;

use crate::AppState;

const DEFAULT_HIST_MS: &[u64] = &[5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RouteBucket {
    /// Upper bound in milliseconds; `None` is `+Inf`.
    pub le_ms: Option<u64>,
    /// Cumulative count.
    pub count: u64,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RouteSummary {
    pub hits: u64,
    pub errors: u64,
    pub sum_ms: u64,
    pub max_ms: u64,
    pub buckets: Vec<RouteBucket>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSummary {
    pub routes: BTreeMap<String, RouteSummary>,
    pub outcomes: BTreeMap<String, u64>,
    pub storage_failures: u64,
}

struct RouteStat {
    hits: u64,
    errors: u64,
    sum_ms: u64,
    max_ms: u64,
    hist: Vec<u64>,
}

impl RouteStat {
    fn new(bins: usize) -> Self {
        Self {
            hits: 0,
            errors: 0,
            sum_ms: 0,
            max_ms: 0,
            hist: vec![0; bins],
        }
    }

    fn update(&mut self, status: u16, ms: u64, bucket: usize) {
        self.hits = self.hits.saturating_add(1);
        if status >= 400 {
            self.errors = self.errors.saturating_add(1);
        }
        self.sum_ms = self.sum_ms.saturating_add(ms);
        self.max_ms = self.max_ms.max(ms);
        if let Some(bin) = self.hist.get_mut(bucket) {
            *bin = bin.saturating_add(1);
        }
    }

    fn summary(&self, bounds_ms: &[u64]) -> RouteSummary {
        let mut cumulative = 0u64;
        let buckets = self
            .hist
            .iter()
            .enumerate()
            .map(|(idx, count)| {
                cumulative = cumulative.saturating_add(*count);
                RouteBucket {
                    le_ms: bounds_ms.get(idx).copied(),
                    count: cumulative,
                }
            })
            .collect();
        RouteSummary {
            hits: self.hits,
            errors: self.errors,
            sum_ms: self.sum_ms,
            max_ms: self.max_ms,
            buckets,
        }
    }
}

/// Process-local request and triage counters, rendered at `/metrics`.
pub struct Metrics {
    routes: Mutex<BTreeMap<String, RouteStat>>,
    outcomes: Mutex<BTreeMap<&'static str, u64>>,
    storage_failures: AtomicU64,
    hist_buckets: Vec<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

// Counters stay usable after a panicking holder; every update is a single add.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(BTreeMap::new()),
            outcomes: Mutex::new(BTreeMap::new()),
            storage_failures: AtomicU64::new(0),
            hist_buckets: DEFAULT_HIST_MS.to_vec(),
        }
    }

    fn hist_index(&self, ms: u64) -> usize {
        self.hist_buckets
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(self.hist_buckets.len())
    }

    pub fn record_route(&self, path: &str, status: u16, ms: u64) {
        let bucket = self.hist_index(ms);
        let bins = self.hist_buckets.len() + 1;
        lock(&self.routes)
            .entry(path.to_string())
            .or_insert_with(|| RouteStat::new(bins))
            .update(status, ms, bucket);
    }

    /// One triage outcome, labelled by answer source.
    pub fn record_outcome(&self, source: &'static str) {
        *lock(&self.outcomes).entry(source).or_insert(0) += 1;
    }

    pub fn record_storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSummary {
        let routes = lock(&self.routes)
            .iter()
            .map(|(path, stat)| (path.clone(), stat.summary(&self.hist_buckets)))
            .collect();
        let outcomes = lock(&self.outcomes)
            .iter()
            .map(|(source, n)| (source.to_string(), *n))
            .collect();
        MetricsSummary {
            routes,
            outcomes,
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
        }
    }
}

/// Count requests and latency per matched route.
pub async fn track_http(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let res = next.run(req).await;
    let ms = started.elapsed().as_millis().min(u64::MAX as u128) as u64;
    state
        .metrics()
        .record_route(&path, res.status().as_u16(), ms);
    res
}
