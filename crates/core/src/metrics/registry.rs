use crate::error::Result;
use crate::{Error, ErrorCode};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Central Prometheus registry for the platform's operational counters.
/// Constructed once at startup and shared through the application state.
pub struct MetricsRegistry {
    registry: Registry,

    /// Malformed connector events dropped before normalization, by platform.
    pub connector_events_dropped: IntCounterVec,
    /// OAuth refresh attempts by platform and outcome
    /// (`success` | `invalid_grant` | `transient`).
    pub oauth_refresh_total: IntCounterVec,
    /// Detector executions that errored and were skipped, by detector.
    pub detector_failures: IntCounterVec,
    /// Realtime messages dropped, by reason (`schema` | `slow_subscriber`).
    pub realtime_dropped: IntCounterVec,
    /// Discovery runs reaching a terminal state, by status.
    pub discovery_runs: IntCounterVec,
}

impl MetricsRegistry {
    pub fn new(namespace: &str) -> Result<Self> {
        let registry = Registry::new();

        let connector_events_dropped = IntCounterVec::new(
            Opts::new(
                "connector_events_dropped_total",
                "Malformed connector events dropped before normalization",
            )
            .namespace(namespace.to_string()),
            &["platform"],
        )
        .map_err(to_error)?;

        let oauth_refresh_total = IntCounterVec::new(
            Opts::new("oauth_refresh_total", "OAuth refresh attempts by outcome")
                .namespace(namespace.to_string()),
            &["platform", "outcome"],
        )
        .map_err(to_error)?;

        let detector_failures = IntCounterVec::new(
            Opts::new(
                "detector_failures_total",
                "Detector executions that errored and were skipped",
            )
            .namespace(namespace.to_string()),
            &["detector"],
        )
        .map_err(to_error)?;

        let realtime_dropped = IntCounterVec::new(
            Opts::new("realtime_dropped_total", "Realtime messages dropped")
                .namespace(namespace.to_string()),
            &["reason"],
        )
        .map_err(to_error)?;

        let discovery_runs = IntCounterVec::new(
            Opts::new(
                "discovery_runs_total",
                "Discovery runs reaching a terminal state",
            )
            .namespace(namespace.to_string()),
            &["status"],
        )
        .map_err(to_error)?;

        registry
            .register(Box::new(connector_events_dropped.clone()))
            .map_err(to_error)?;
        registry
            .register(Box::new(oauth_refresh_total.clone()))
            .map_err(to_error)?;
        registry
            .register(Box::new(detector_failures.clone()))
            .map_err(to_error)?;
        registry
            .register(Box::new(realtime_dropped.clone()))
            .map_err(to_error)?;
        registry
            .register(Box::new(discovery_runs.clone()))
            .map_err(to_error)?;

        Ok(Self {
            registry,
            connector_events_dropped,
            oauth_refresh_total,
            detector_failures,
            realtime_dropped,
            discovery_runs,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(to_error)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::new(ErrorCode::SerializationError, e.to_string()))
    }
}

fn to_error(e: prometheus::Error) -> Error {
    Error::new(ErrorCode::InternalServerError, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_and_render() {
        let metrics = MetricsRegistry::new("singura").unwrap();

        metrics
            .connector_events_dropped
            .with_label_values(&["slack"])
            .inc();
        metrics
            .oauth_refresh_total
            .with_label_values(&["google", "success"])
            .inc();
        metrics
            .realtime_dropped
            .with_label_values(&["schema"])
            .inc();

        let rendered = metrics.gather().unwrap();
        assert!(rendered.contains("singura_connector_events_dropped_total"));
        assert!(rendered.contains("singura_oauth_refresh_total"));
    }
}
