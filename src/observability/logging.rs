//! # Structured Logging
//!
//! Provides the tracing subscriber setup and span macros used by the
//! translation pipeline and the snapshot syncer.

use crate::config::ObservabilityConfig;
use crate::errors::{GantryError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Create a tracing span for one translation pass.
///
/// ```rust,ignore
/// let span = translation_span!("gateway", gateway.source.resource_name());
/// let span = translation_span!("backend", cluster_name, client = %client_key);
/// ```
#[macro_export]
macro_rules! translation_span {
    ($phase:expr, $resource:expr) => {
        tracing::info_span!(
            "translation",
            phase = %$phase,
            resource = %$resource,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($phase:expr, $resource:expr, $($field:tt)*) => {
        tracing::info_span!(
            "translation",
            phase = %$phase,
            resource = %$resource,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for snapshot assembly of one connected client
#[macro_export]
macro_rules! snapshot_span {
    ($operation:expr, $client_key:expr) => {
        tracing::debug_span!(
            "snapshot_operation",
            operation = %$operation,
            client = %$client_key,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $client_key:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "snapshot_operation",
            operation = %$operation,
            client = %$client_key,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global fmt subscriber, writing to stderr.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            GantryError::config(format!("Invalid log level '{}': {}", config.log_level, e))
        })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json_logging {
        registry
            .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true).with_writer(std::io::stderr)).try_init()
    };

    result.map_err(|e| GantryError::config(format!("Failed to install log subscriber: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        service_name = %config.observability.service_name,
        connect_timeout_ms = config.translator.default_connect_timeout_ms,
        failover_regions = config.translator.locality_failover.len(),
        status_retry_attempts = config.syncer.status_retry_attempts,
        status_retry_delay_ms = config.syncer.status_retry_delay_ms,
        metrics_enabled = %config.observability.enable_metrics,
        json_logging = %config.observability.json_logging,
        "Gantry control plane configuration"
    );
}
