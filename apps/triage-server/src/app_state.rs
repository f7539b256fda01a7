use std::sync::Arc;

use triage_core::{Config, TriageController};
use triage_kernel::Kernel;

use crate::metrics::Metrics;

#[derive(Clone)]
pub(crate) struct AppState {
    controller: Arc<TriageController>,
    kernel: Kernel,
    config: Arc<Config>,
    endpoints: Arc<Vec<String>>,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        controller: Arc<TriageController>,
        kernel: Kernel,
        config: Arc<Config>,
        endpoints: Vec<String>,
    ) -> Self {
        Self {
            controller,
            kernel,
            config,
            endpoints: Arc::new(endpoints),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn controller(&self) -> Arc<TriageController> {
        self.controller.clone()
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn endpoints(&self) -> Arc<Vec<String>> {
        self.endpoints.clone()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
