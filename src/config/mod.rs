//! # Configuration Management
//!
//! Layered configuration for the Gantry control plane: built-in defaults, an
//! optional YAML/TOML/JSON file, then `GANTRY__*` environment variables.

pub mod settings;

pub use settings::{AppConfig, ObservabilityConfig, SyncerConfig, TranslatorConfig, ENV_PREFIX};
