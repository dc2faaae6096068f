//! # Gantry
//!
//! Gantry is a gateway control plane. It translates declarative gateway
//! configuration (listeners, routes, backends and their attached policies)
//! into Envoy xDS resources and keeps one snapshot per connected proxy
//! instance up to date.
//!
//! ## Architecture
//!
//! ```text
//! Gateway IR ─→ GatewayTranslator ─→ listeners + routes ──────────┐
//!                    ↑ plugins                                     ├─→ XdsSnapshot per client
//! Backends ──→ BackendTranslator ──→ clusters (per client) ───────┤
//! Endpoints ─→ prioritize ─────────→ load assignments (per client)┘
//! ```
//!
//! ## Core Components
//!
//! - [`ir`]: the intermediate representation and policy attachment
//! - [`xds::plugins`]: policy and backend plugins with their registry
//! - [`xds::translator`]: gateway and backend translation
//! - [`xds::snapshot`]: per-client snapshot assembly with hash-based versions
//! - [`syncer`]: input collections, recomputation and snapshot registration
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use gantry::{config::AppConfig, syncer::{LoggingStatusWriter, ProxySyncer}, xds::PluginRegistry};
//! use std::sync::Arc;
//!
//! # async fn run(gateway: gantry::ir::GatewayIr, client: gantry::ir::UniquelyConnectedClient) {
//! let syncer = ProxySyncer::new(
//!     Arc::new(PluginRegistry::with_builtins()),
//!     &AppConfig::default(),
//!     Arc::new(LoggingStatusWriter),
//! );
//! syncer.upsert_gateway(gateway).await;
//! syncer.client_connected(client.clone()).await;
//! let snapshot = syncer.snapshot(client.resource_name());
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod errors;
pub mod ir;
pub mod observability;
pub mod syncer;
pub mod utils;
pub mod xds;

pub use config::AppConfig;
pub use errors::{Error, GantryError, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "gantry");
    }
}
