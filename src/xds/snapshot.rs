//! Per-client snapshot assembly.
//!
//! Every gateway is translated once into [`GatewayXdsResources`]. Clusters and
//! load assignments vary by client and are computed per (client, backend)
//! pair as [`PerClientCluster`] and [`PerClientEndpoints`].
//! [`snapshot_per_client`] merges the three into the [`XdsSnapshot`] a proxy
//! instance receives.

use crate::ir::{BackendObjectIr, EndpointsForBackend, ObjectSource, UniquelyConnectedClient};
use crate::xds::reports::ReportMap;
use crate::xds::resources::{hash_resource, hash_route_configuration, xor_fold, Resources};
use crate::xds::translator::{prioritize, BackendTranslator, GatewayTranslation};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Role prefix of proxies serving a gateway.
pub const GATEWAY_ROLE_PREFIX: &str = "gantry-gateway";

/// Role a proxy announces to receive the configuration of `gateway`.
pub fn gateway_role(gateway: &ObjectSource) -> String {
    format!("{}~{}~{}", GATEWAY_ROLE_PREFIX, gateway.namespace, gateway.name)
}

/// Shared translation output of one gateway.
#[derive(Debug, Clone)]
pub struct GatewayXdsResources {
    pub gateway: ObjectSource,
    pub reports: ReportMap,
    /// Gateway-scoped clusters added by plugins
    pub clusters: Vec<Cluster>,
    pub clusters_hash: u64,
    pub routes: Resources<RouteConfiguration>,
    pub listeners: Resources<Listener>,
}

impl GatewayXdsResources {
    pub fn new(gateway: ObjectSource, translation: GatewayTranslation, reports: ReportMap) -> Self {
        let clusters_hash = xor_fold(translation.extra_clusters.iter().map(hash_resource));
        Self {
            gateway,
            reports,
            clusters: translation.extra_clusters,
            clusters_hash,
            routes: Resources::from_items(translation.routes, |r| r.name.clone(), hash_route_configuration),
            listeners: Resources::from_items(translation.listeners, |l| l.name.clone(), hash_resource),
        }
    }

    /// Matches the role of the clients serving this gateway.
    pub fn resource_name(&self) -> String {
        gateway_role(&self.gateway)
    }
}

impl PartialEq for GatewayXdsResources {
    fn eq(&self, other: &Self) -> bool {
        self.gateway == other.gateway
            && self.reports == other.reports
            && self.clusters_hash == other.clusters_hash
            && self.routes.version == other.routes.version
            && self.listeners.version == other.listeners.version
    }
}

/// The cluster one client sees for one backend, or why it could not be built.
#[derive(Debug, Clone, PartialEq)]
pub struct PerClientCluster {
    pub client_key: String,
    pub name: String,
    pub cluster: Option<Cluster>,
    pub hash: u64,
    pub error: Option<String>,
}

impl PerClientCluster {
    pub fn translate(
        translator: &BackendTranslator,
        client: &UniquelyConnectedClient,
        backend: &BackendObjectIr,
    ) -> Self {
        let client_key = client.resource_name().to_string();
        let name = backend.cluster_name();
        match translator.translate_backend(client, backend) {
            Ok(cluster) => {
                let hash = hash_resource(&cluster);
                Self { client_key, name, cluster: Some(cluster), hash, error: None }
            }
            Err(e) => {
                warn!(
                    client = %client_key,
                    backend = %backend.resource_name(),
                    error = %e,
                    "Failed to translate backend"
                );
                Self { client_key, name, cluster: None, hash: 0, error: Some(e.to_string()) }
            }
        }
    }

    pub fn resource_name(&self) -> String {
        format!("{}/{}", self.client_key, self.name)
    }
}

/// The load assignment one client sees for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PerClientEndpoints {
    pub client_key: String,
    pub cluster_name: String,
    pub cla: ClusterLoadAssignment,
    pub hash: u64,
}

impl PerClientEndpoints {
    pub fn prioritize(
        client: &UniquelyConnectedClient,
        endpoints: &EndpointsForBackend,
        failover: &BTreeMap<String, String>,
    ) -> Self {
        let cla = prioritize(client, endpoints, failover);
        Self {
            client_key: client.resource_name().to_string(),
            cluster_name: endpoints.cluster_name.clone(),
            hash: hash_resource(&cla),
            cla,
        }
    }

    pub fn resource_name(&self) -> String {
        format!("{}/{}", self.client_key, self.cluster_name)
    }
}

/// Versioned configuration of one proxy instance.
#[derive(Debug, Clone, PartialEq)]
pub struct XdsSnapshot {
    pub client_key: String,
    pub gateway: ObjectSource,
    pub clusters: Resources<Cluster>,
    pub endpoints: Resources<ClusterLoadAssignment>,
    pub routes: Resources<RouteConfiguration>,
    pub listeners: Resources<Listener>,
    /// Clusters left out because their translation failed, with the error
    pub errored_clusters: BTreeMap<String, String>,
}

impl XdsSnapshot {
    /// True when every resource kind carries the same version in both snapshots.
    pub fn same_versions(&self, other: &XdsSnapshot) -> bool {
        self.clusters.version == other.clusters.version
            && self.endpoints.version == other.endpoints.version
            && self.routes.version == other.routes.version
            && self.listeners.version == other.listeners.version
    }

    /// True when neither the versions nor the recorded cluster errors differ.
    /// Errored clusters never contribute to the cluster version.
    pub fn unchanged_from(&self, other: &XdsSnapshot) -> bool {
        self.same_versions(other) && self.errored_clusters == other.errored_clusters
    }

    pub fn summary(&self) -> SnapshotSummary {
        let names = |items: Vec<&str>| items.into_iter().map(str::to_string).collect();
        SnapshotSummary {
            client: self.client_key.clone(),
            gateway: self.gateway.resource_name(),
            versions: SnapshotVersions {
                clusters: self.clusters.version.clone(),
                endpoints: self.endpoints.version.clone(),
                routes: self.routes.version.clone(),
                listeners: self.listeners.version.clone(),
            },
            clusters: names(self.clusters.names().collect()),
            endpoints: names(self.endpoints.names().collect()),
            routes: names(self.routes.names().collect()),
            listeners: names(self.listeners.names().collect()),
            errored_clusters: self.errored_clusters.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotVersions {
    pub clusters: String,
    pub endpoints: String,
    pub routes: String,
    pub listeners: String,
}

/// Resource names and versions of a snapshot, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub client: String,
    pub gateway: String,
    pub versions: SnapshotVersions,
    pub clusters: Vec<String>,
    pub endpoints: Vec<String>,
    pub routes: Vec<String>,
    pub listeners: Vec<String>,
    pub errored_clusters: BTreeMap<String, String>,
}

/// Merge the shared gateway output with the per-client passes of `client`.
///
/// Per-client entries of other clients are ignored. A failed cluster never
/// blocks the rest of the snapshot; it is listed in `errored_clusters`.
pub fn snapshot_per_client<'a, C, E>(
    client: &UniquelyConnectedClient,
    most: &GatewayXdsResources,
    clusters: C,
    endpoints: E,
) -> XdsSnapshot
where
    C: IntoIterator<Item = &'a PerClientCluster>,
    E: IntoIterator<Item = &'a PerClientEndpoints>,
{
    let client_key = client.resource_name();
    let span = crate::snapshot_span!("assemble", client_key);
    let _guard = span.enter();

    let mut cluster_items: BTreeMap<String, Cluster> =
        most.clusters.iter().map(|c| (c.name.clone(), c.clone())).collect();
    let mut clusters_version = most.clusters_hash;
    let mut errored_clusters = BTreeMap::new();

    for per_client in clusters.into_iter().filter(|c| c.client_key == client_key) {
        match (&per_client.cluster, &per_client.error) {
            (Some(cluster), None) => {
                clusters_version ^= per_client.hash;
                cluster_items.insert(per_client.name.clone(), cluster.clone());
            }
            (_, error) => {
                errored_clusters.insert(per_client.name.clone(), error.clone().unwrap_or_default());
            }
        }
    }

    let mut endpoints_version = 0u64;
    let mut endpoint_items = BTreeMap::new();
    for per_client in endpoints.into_iter().filter(|e| e.client_key == client_key) {
        endpoints_version ^= per_client.hash;
        endpoint_items.insert(per_client.cluster_name.clone(), per_client.cla.clone());
    }

    let snapshot = XdsSnapshot {
        client_key: client_key.to_string(),
        gateway: most.gateway.clone(),
        clusters: Resources::with_version(clusters_version, cluster_items),
        endpoints: Resources::with_version(endpoints_version, endpoint_items),
        routes: most.routes.clone(),
        listeners: most.listeners.clone(),
        errored_clusters,
    };

    debug!(
        clusters = snapshot.clusters.len(),
        endpoints = snapshot.endpoints.len(),
        routes = snapshot.routes.len(),
        listeners = snapshot.listeners.len(),
        errored = snapshot.errored_clusters.len(),
        "Assembled snapshot"
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::ir::{EndpointWithMd, Locality};
    use crate::xds::plugins::PluginRegistry;
    use std::sync::Arc;

    fn gateway_source() -> ObjectSource {
        ObjectSource::new("gateway.networking.k8s.io", "Gateway", "default", "edge")
    }

    fn client(zone: &str) -> UniquelyConnectedClient {
        UniquelyConnectedClient::new(
            gateway_role(&gateway_source()),
            "default",
            BTreeMap::new(),
            Locality::new("us-east", zone, ""),
        )
    }

    fn most() -> GatewayXdsResources {
        let translation = GatewayTranslation {
            listeners: vec![Listener { name: "http".into(), ..Default::default() }],
            routes: vec![RouteConfiguration { name: "http".into(), ..Default::default() }],
            extra_clusters: vec![Cluster { name: "extra".into(), ..Default::default() }],
        };
        GatewayXdsResources::new(gateway_source(), translation, ReportMap::new())
    }

    fn translator() -> BackendTranslator {
        BackendTranslator::new(Arc::new(PluginRegistry::with_builtins()), TranslatorConfig::default())
    }

    fn service(name: &str) -> BackendObjectIr {
        BackendObjectIr::new(ObjectSource::new("", "Service", "default", name), 8080)
    }

    #[test]
    fn gateway_resources_equality_ignores_cluster_bodies() {
        let a = most();
        let mut b = most();
        b.clusters.clear();
        assert_eq!(a, b);

        b.clusters_hash ^= 1;
        assert_ne!(a, b);
    }

    #[test]
    fn cluster_version_folds_shared_and_per_client_hashes() {
        let client = client("1a");
        let translator = translator();
        let echo = PerClientCluster::translate(&translator, &client, &service("echo"));
        let web = PerClientCluster::translate(&translator, &client, &service("web"));
        let most = most();

        let snapshot = snapshot_per_client(&client, &most, [&echo, &web], []);
        let expected = most.clusters_hash ^ echo.hash ^ web.hash;
        assert_eq!(snapshot.clusters.version, expected.to_string());
        assert_eq!(
            snapshot.clusters.names().collect::<Vec<_>>(),
            vec!["extra", "service_default_echo_8080", "service_default_web_8080"]
        );
        assert_eq!(snapshot.routes.version, most.routes.version);
        assert_eq!(snapshot.listeners.version, most.listeners.version);
    }

    #[test]
    fn failed_backend_is_recorded_and_excluded() {
        let client = client("1a");
        let translator = translator();
        let echo = PerClientCluster::translate(&translator, &client, &service("echo"));
        let lambda = PerClientCluster::translate(
            &translator,
            &client,
            &BackendObjectIr::new(ObjectSource::new("example.io", "Lambda", "default", "fn"), 0),
        );
        assert!(lambda.cluster.is_none());

        let snapshot = snapshot_per_client(&client, &most(), [&echo, &lambda], []);
        assert!(snapshot.clusters.get(&lambda.name).is_none());
        assert!(snapshot.clusters.get(&echo.name).is_some());
        let error = snapshot.errored_clusters.get(&lambda.name).unwrap();
        assert!(error.contains("no backend translator found"));
        assert!(!snapshot.listeners.is_empty());
    }

    #[test]
    fn other_clients_entries_are_ignored() {
        let a = client("1a");
        let b = client("1b");
        let backend = service("echo");
        let mut eps = EndpointsForBackend::new(&backend);
        eps.add(Locality::new("us-east", "1a", ""), EndpointWithMd::new("10.0.0.1", 8080));
        let for_b = PerClientEndpoints::prioritize(&b, &eps, &BTreeMap::new());

        let snapshot = snapshot_per_client(&a, &most(), [], [&for_b]);
        assert!(snapshot.endpoints.is_empty());
        assert_eq!(snapshot.endpoints.version, "0");
    }

    #[test]
    fn reassembly_keeps_versions() {
        let client = client("1a");
        let translator = translator();
        let backend = service("echo");
        let mut eps = EndpointsForBackend::new(&backend);
        eps.add(Locality::new("us-east", "1a", ""), EndpointWithMd::new("10.0.0.1", 8080));

        let build = || {
            let cluster = PerClientCluster::translate(&translator, &client, &backend);
            let endpoints = PerClientEndpoints::prioritize(&client, &eps, &BTreeMap::new());
            snapshot_per_client(&client, &most(), [&cluster], [&endpoints])
        };
        let first = build();
        let second = build();
        assert!(first.same_versions(&second));
        assert_eq!(first, second);
        assert_eq!(first.summary().endpoints, vec!["service_default_echo_8080".to_string()]);
    }
}
