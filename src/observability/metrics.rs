//! # Metrics Collection
//!
//! Provides Prometheus metrics collection for the translation pipeline and
//! snapshot syncer.

use crate::config::ObservabilityConfig;
use crate::errors::{GantryError, Result};
use ::tracing::{info, warn};
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metrics recorder that tracks control plane metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record one gateway translation pass
    pub fn record_gateway_translation(&self, gateway: &str, duration: f64, listeners: usize) {
        let labels = [("gateway", gateway.to_string())];
        counter!("gantry_gateway_translations_total", &labels).increment(1);
        histogram!("gantry_gateway_translation_duration_seconds").record(duration);
        gauge!("gantry_gateway_listeners", &labels).set(listeners as f64);
    }

    /// Record a route dropped from the output
    pub fn record_dropped_route(&self, gateway: &str) {
        let labels = [("gateway", gateway.to_string())];
        counter!("gantry_routes_dropped_total", &labels).increment(1);
    }

    /// Record a per-client cluster translation outcome
    pub fn record_cluster_translation(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        let labels = [("status", status.to_string())];
        counter!("gantry_cluster_translations_total", &labels).increment(1);
    }

    /// Update the errored cluster gauge for one client
    pub fn update_errored_clusters(&self, client: &str, count: usize) {
        let labels = [("client", client.to_string())];
        gauge!("gantry_errored_clusters", &labels).set(count as f64);
    }

    /// Record a snapshot write, `changed` is false for no-op writes
    pub fn record_snapshot_update(&self, client: &str, changed: bool) {
        let outcome = if changed { "updated" } else { "unchanged" };
        let labels = [("client", client.to_string()), ("outcome", outcome.to_string())];
        counter!("gantry_snapshot_updates_total", &labels).increment(1);
    }

    /// Update the connected client gauge
    pub fn update_connected_clients(&self, count: usize) {
        gauge!("gantry_connected_clients").set(count as f64);
    }

    /// Record a status write outcome
    pub fn record_status_write(&self, success: bool, attempts: u32) {
        let status = if success { "success" } else { "error" };
        let labels = [("status", status.to_string())];
        counter!("gantry_status_writes_total", &labels).increment(1);
        histogram!("gantry_status_write_attempts").record(attempts as f64);
    }

    /// Register descriptions for all gantry metrics
    pub fn register_metrics(&self) {
        describe_counter!(
            "gantry_gateway_translations_total",
            Unit::Count,
            "Number of shared gateway translation passes"
        );
        describe_histogram!(
            "gantry_gateway_translation_duration_seconds",
            Unit::Seconds,
            "Duration of shared gateway translation passes"
        );
        describe_gauge!(
            "gantry_gateway_listeners",
            Unit::Count,
            "Listeners produced by the last gateway translation"
        );
        describe_counter!(
            "gantry_routes_dropped_total",
            Unit::Count,
            "Route rules dropped from the output because of errors"
        );
        describe_counter!(
            "gantry_cluster_translations_total",
            Unit::Count,
            "Per-client cluster translations by outcome"
        );
        describe_gauge!(
            "gantry_errored_clusters",
            Unit::Count,
            "Clusters excluded from a client snapshot because translation failed"
        );
        describe_counter!(
            "gantry_snapshot_updates_total",
            Unit::Count,
            "Snapshot cache writes by outcome"
        );
        describe_gauge!("gantry_connected_clients", Unit::Count, "Unique connected proxy clients");
        describe_counter!(
            "gantry_status_writes_total",
            Unit::Count,
            "Status write-back attempts by outcome"
        );
        describe_histogram!(
            "gantry_status_write_attempts",
            Unit::Count,
            "Attempts needed per status write"
        );
    }
}

/// Initialize metrics collection and Prometheus exporter
pub async fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        GantryError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            GantryError::config(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    MetricsRecorder::new().register_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recorder_creation() {
        let recorder = MetricsRecorder::new();
        recorder.record_gateway_translation("default/edge", 0.002, 2);
    }

    #[test]
    fn test_metrics_recording() {
        let recorder = MetricsRecorder::new();
        recorder.register_metrics();
        recorder.record_dropped_route("default/edge");
        recorder.record_cluster_translation(false);
        recorder.update_errored_clusters("gateway", 1);
        recorder.record_snapshot_update("gateway", true);
        recorder.update_connected_clients(3);
        recorder.record_status_write(true, 2);
    }

    #[tokio::test]
    async fn test_disabled_metrics_are_noop() {
        let config = ObservabilityConfig { enable_metrics: false, ..Default::default() };
        assert!(init_metrics(&config).await.is_ok());
    }
}
