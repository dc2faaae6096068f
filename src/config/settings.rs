//! # Configuration Settings
//!
//! Defines the configuration structure for the Gantry control plane.

use crate::errors::{GantryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Prefix of environment variables that override file settings, e.g.
/// `GANTRY__TRANSLATOR__DEFAULT_CONNECT_TIMEOUT_MS=2500`.
pub const ENV_PREFIX: &str = "GANTRY";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Translation pipeline configuration
    #[validate(nested)]
    pub translator: TranslatorConfig,

    /// Snapshot syncer and status write-back configuration
    #[validate(nested)]
    pub syncer: SyncerConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from defaults, an optional file, then `GANTRY__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(path) = path {
            if !path.exists() {
                return Err(GantryError::config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(GantryError::from)?;
        self.validate_custom()?;
        Ok(())
    }

    /// Cross-field checks the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        if self.syncer.status_retry_max_delay_ms < self.syncer.status_retry_delay_ms {
            return Err(GantryError::validation(
                "Status retry max delay must not be lower than the base delay",
            ));
        }

        for (from, to) in &self.translator.locality_failover {
            if from.is_empty() || to.is_empty() {
                return Err(GantryError::validation_field(
                    "Failover regions cannot be empty",
                    "translator.locality_failover",
                ));
            }
            if from == to {
                return Err(GantryError::validation_field(
                    format!("Region '{}' cannot fail over to itself", from),
                    "translator.locality_failover",
                ));
            }
        }

        if self.observability.enable_metrics && self.observability.metrics_port == 0 {
            return Err(GantryError::validation(
                "Metrics port must be set when metrics are enabled",
            ));
        }

        Ok(())
    }
}

/// Translation pipeline configuration, threaded through translator constructors
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Connect timeout applied to every baseline cluster
    #[validate(range(
        min = 1,
        max = 600000,
        message = "Connect timeout must be between 1ms and 10 minutes"
    ))]
    pub default_connect_timeout_ms: u64,

    /// Regional failover targets, keyed by the client's region
    pub locality_failover: BTreeMap<String, String>,

    /// Prefix used for the file access log when a policy does not name a path
    #[validate(length(min = 1, message = "Access log path cannot be empty"))]
    pub default_access_log_path: String,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            default_connect_timeout_ms: 5000,
            locality_failover: BTreeMap::new(),
            default_access_log_path: "/dev/stdout".to_string(),
        }
    }
}

impl TranslatorConfig {
    /// Get the cluster connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.default_connect_timeout_ms)
    }
}

/// Snapshot syncer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SyncerConfig {
    /// Maximum attempts for one status write
    #[validate(range(min = 1, max = 20, message = "Retry attempts must be between 1 and 20"))]
    pub status_retry_attempts: u32,

    /// Base delay between status write attempts
    #[validate(range(min = 1, message = "Retry delay must be at least 1ms"))]
    pub status_retry_delay_ms: u64,

    /// Upper bound for the exponential backoff
    pub status_retry_max_delay_ms: u64,

    /// Capacity of the snapshot change broadcast channel
    #[validate(range(
        min = 1,
        max = 65536,
        message = "Channel capacity must be between 1 and 65536"
    ))]
    pub broadcast_capacity: usize,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            status_retry_attempts: 5,
            status_retry_delay_ms: 100,
            status_retry_max_delay_ms: 5000,
            broadcast_capacity: 128,
        }
    }
}

impl SyncerConfig {
    /// Get the base retry delay as Duration
    pub fn status_retry_delay(&self) -> Duration {
        Duration::from_millis(self.status_retry_delay_ms)
    }

    /// Get the backoff ceiling as Duration
    pub fn status_retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.status_retry_max_delay_ms)
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to log output
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: 9090,
            service_name: "gantry".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if !self.enable_metrics || self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
