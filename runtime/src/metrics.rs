//! Prometheus metrics for the request bridge.
//!
//! - Call outcomes and latency
//! - In-flight calls (reply registry size)
//! - Open scoped subscriptions
//! - Late or duplicate replies
//! - Gateway publish retries
//!
//! # Example
//!
//! ```rust,no_run
//! use reqbridge_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Metrics available at http://localhost:9090/metrics
//! MetricsServer::new("0.0.0.0:9090".parse()?).start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
#[derive(Debug, Clone, Copy)]
pub struct MetricsServer {
    addr: SocketAddr,
}

impl MetricsServer {
    /// Create a metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Describe all metrics, install the global recorder and start the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
    /// already installed.
    pub fn start(self) -> Result<(), MetricsError> {
        register_metrics();

        PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .with_http_listener(self.addr)
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        tracing::info!(addr = %self.addr, "Metrics exporter listening");
        Ok(())
    }
}

fn register_metrics() {
    describe_counter!(
        "bridge_calls_total",
        "Total number of bridged calls by outcome"
    );
    describe_histogram!(
        "bridge_call_duration_seconds",
        "Time from call start to resolution"
    );
    describe_gauge!(
        "bridge_calls_in_flight",
        "Calls registered and awaiting a reply"
    );
    describe_gauge!(
        "bridge_open_subscriptions",
        "Scoped broker subscriptions currently open"
    );
    describe_counter!(
        "bridge_late_replies_total",
        "Replies that arrived after their call was resolved, or duplicates"
    );
    describe_counter!(
        "bridge_publish_retries_total",
        "Publish attempts retried by the gateway"
    );
}

/// Bridge metrics recorder.
pub struct BridgeMetrics;

impl BridgeMetrics {
    /// Record a finished call.
    pub fn record_call(outcome: &'static str, duration: Duration) {
        counter!("bridge_calls_total", "outcome" => outcome).increment(1);
        histogram!("bridge_call_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a call abandoned by its caller before resolution.
    pub fn record_cancelled() {
        counter!("bridge_calls_total", "outcome" => "cancelled").increment(1);
    }

    /// Update the in-flight gauge.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_in_flight(count: usize) {
        gauge!("bridge_calls_in_flight").set(count as f64);
    }

    /// Record a reply that found no pending call.
    pub fn record_late_reply() {
        counter!("bridge_late_replies_total").increment(1);
    }

    /// Record a retried publish.
    pub fn record_publish_retry() {
        counter!("bridge_publish_retries_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        BridgeMetrics::record_call("reply", Duration::from_millis(5));
        BridgeMetrics::set_in_flight(3);
        BridgeMetrics::record_late_reply();
        BridgeMetrics::record_publish_retry();
        BridgeMetrics::record_cancelled();
    }
}
