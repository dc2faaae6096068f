//! Envoy xDS resource generation
//!
//! Turns gateway IR into the resources a proxy consumes:
//! - [`translator`]: listeners, route configurations, clusters and load assignments
//! - [`plugins`]: policy and backend plugins that shape those resources
//! - [`filters`]: staged filter ordering and shared filter helpers
//! - [`snapshot`] and [`cache`]: per-client snapshot assembly and storage
//! - [`clients`]: reference-counted connected proxy instances

pub mod cache;
pub mod clients;
pub mod filters;
pub mod plugins;
pub mod reports;
pub mod resources;
pub mod snapshot;
pub mod translator;

pub use cache::{SnapshotCache, SnapshotUpdate};
pub use clients::ConnectedClients;
pub use plugins::PluginRegistry;
pub use reports::{Condition, ConditionReason, ConditionType, ReportMap};
pub use resources::{
    hash_resource, hash_route_configuration, Resources, CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL,
    LISTENER_TYPE_URL, ROUTE_TYPE_URL,
};
pub use snapshot::{
    gateway_role, snapshot_per_client, GatewayXdsResources, PerClientCluster, PerClientEndpoints,
    SnapshotSummary, XdsSnapshot,
};
pub use translator::{BackendTranslator, GatewayTranslation, GatewayTranslator};
