use crate::ErrorKind;
use metrics::{histogram, increment_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

/// Retrieval mode, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Static,
    Dynamic,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Static => "static",
            FetchMode::Dynamic => "dynamic",
        }
    }
}

/// Thin wrapper over the `metrics` facade. Recording is a no-op until a
/// recorder is installed.
#[derive(Debug, Clone, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_success(&self, mode: FetchMode, duration: Duration, bytes: usize) {
        increment_counter!("scrape_requests_total", "mode" => mode.as_str(), "outcome" => "ok");
        histogram!("scrape_duration_seconds", duration.as_secs_f64(), "mode" => mode.as_str());
        histogram!("scrape_document_bytes", bytes as f64, "mode" => mode.as_str());
    }

    pub fn record_failure(&self, mode: FetchMode, duration: Duration, kind: ErrorKind) {
        increment_counter!("scrape_requests_total", "mode" => mode.as_str(), "outcome" => kind.as_str());
        histogram!("scrape_duration_seconds", duration.as_secs_f64(), "mode" => mode.as_str());
    }

    pub fn record_js_rendered(&self) {
        increment_counter!("scrape_js_rendered_total");
    }
}

/// Installs the global Prometheus recorder and keeps the handle used to
/// render `/metrics`.
pub struct PrometheusExporter {
    handle: PrometheusHandle,
}

impl PrometheusExporter {
    pub fn install() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus recorder installed");
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = Metrics::new();
        metrics.record_success(FetchMode::Static, Duration::from_millis(10), 1024);
        metrics.record_failure(FetchMode::Dynamic, Duration::from_secs(1), ErrorKind::Timeout);
        metrics.record_js_rendered();
    }

    #[test]
    fn test_mode_labels() {
        assert_eq!(FetchMode::Static.as_str(), "static");
        assert_eq!(FetchMode::Dynamic.as_str(), "dynamic");
    }
}
