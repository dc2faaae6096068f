//! # Proxy syncer
//!
//! Holds the input collections (gateways, backends, endpoints and connected
//! clients), keeps the derived translation outputs current as they change,
//! and registers one snapshot per client in the [`SnapshotCache`].
//!
//! Derived state:
//! - one [`GatewayXdsResources`] per gateway, shared by its clients
//! - one [`PerClientCluster`] per (client, backend)
//! - one [`PerClientEndpoints`] per (client, endpoint set)
//!
//! Every mutation, collection write included, runs under one async mutex,
//! so derived state always matches the collections. Status reports go to a separate task.

pub mod collection;
pub mod status;

pub use collection::{Collection, CollectionEvent, Keyed};
pub use status::{LoggingStatusWriter, RetryPolicy, StatusWriter};

use crate::config::AppConfig;
use crate::ir::{BackendObjectIr, EndpointsForBackend, GatewayIr, UniquelyConnectedClient};
use crate::observability::MetricsRecorder;
use crate::xds::{
    gateway_role, snapshot_per_client, BackendTranslator, ConnectedClients, GatewayTranslator,
    GatewayXdsResources, PerClientCluster, PerClientEndpoints, PluginRegistry, ReportMap,
    SnapshotCache, SnapshotUpdate, XdsSnapshot,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

/// Per-client entries keyed by (client key, cluster name).
type PerClientMap<T> = BTreeMap<(String, String), T>;

#[derive(Debug, Default)]
struct DerivedState {
    /// Keyed by gateway role
    most: BTreeMap<String, GatewayXdsResources>,
    clusters: PerClientMap<PerClientCluster>,
    endpoints: PerClientMap<PerClientEndpoints>,
}

impl DerivedState {
    fn for_client<'a, T>(map: &'a PerClientMap<T>, client_key: &str) -> impl Iterator<Item = &'a T> + 'a {
        let start = (client_key.to_string(), String::new());
        let owned_key = client_key.to_string();
        map.range(start..).take_while(move |((key, _), _)| *key == owned_key).map(|(_, v)| v)
    }

    fn drop_client(&mut self, client_key: &str) {
        self.clusters.retain(|(key, _), _| key != client_key);
        self.endpoints.retain(|(key, _), _| key != client_key);
    }

    fn merged_reports(&self) -> ReportMap {
        let mut merged = ReportMap::new();
        for most in self.most.values() {
            merged.merge(&most.reports);
        }
        merged
    }
}

pub struct ProxySyncer {
    gateways: Collection<GatewayIr>,
    backends: Collection<BackendObjectIr>,
    endpoints: Collection<EndpointsForBackend>,
    clients: Collection<UniquelyConnectedClient>,
    connected: ConnectedClients,
    gateway_translator: GatewayTranslator,
    backend_translator: BackendTranslator,
    failover: BTreeMap<String, String>,
    cache: Arc<SnapshotCache>,
    state: Mutex<DerivedState>,
    status_tx: mpsc::UnboundedSender<ReportMap>,
    status_task: JoinHandle<()>,
    metrics: MetricsRecorder,
}

impl ProxySyncer {
    /// Build a syncer and start its status task. Must run inside a tokio runtime.
    pub fn new(registry: Arc<PluginRegistry>, config: &AppConfig, writer: Arc<dyn StatusWriter>) -> Self {
        let capacity = config.syncer.broadcast_capacity;
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let status_task =
            status::spawn_status_task(writer, status_rx, RetryPolicy::from_config(&config.syncer));

        Self {
            gateways: Collection::new("gateways", capacity),
            backends: Collection::new("backends", capacity),
            endpoints: Collection::new("endpoints", capacity),
            clients: Collection::new("clients", capacity),
            connected: ConnectedClients::new(),
            gateway_translator: GatewayTranslator::new(registry.clone(), config.translator.clone()),
            backend_translator: BackendTranslator::new(registry, config.translator.clone()),
            failover: config.translator.locality_failover.clone(),
            cache: Arc::new(SnapshotCache::new(capacity)),
            state: Mutex::new(DerivedState::default()),
            status_tx,
            status_task,
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn cache(&self) -> Arc<SnapshotCache> {
        Arc::clone(&self.cache)
    }

    pub fn snapshot(&self, client_key: &str) -> Option<Arc<XdsSnapshot>> {
        self.cache.get(client_key)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotUpdate> {
        self.cache.subscribe()
    }

    pub fn gateways(&self) -> &Collection<GatewayIr> {
        &self.gateways
    }

    pub fn backends(&self) -> &Collection<BackendObjectIr> {
        &self.backends
    }

    pub fn endpoints(&self) -> &Collection<EndpointsForBackend> {
        &self.endpoints
    }

    pub fn clients(&self) -> &Collection<UniquelyConnectedClient> {
        &self.clients
    }

    /// Status of every gateway, merged.
    pub async fn reports(&self) -> ReportMap {
        self.state.lock().await.merged_reports()
    }

    /// Translate `gateway` and refresh its clients. Returns the client keys
    /// whose snapshot changed.
    pub async fn upsert_gateway(&self, gateway: GatewayIr) -> Vec<String> {
        let mut state = self.state.lock().await;
        if self.gateways.upsert(gateway.clone()).is_none() {
            return Vec::new();
        }

        let mut reports = ReportMap::new();
        let translation = self.gateway_translator.translate_gateway(&gateway, &mut reports);
        let resources = GatewayXdsResources::new(gateway.source.clone(), translation, reports);
        let role = resources.resource_name();
        if state.most.get(&role) == Some(&resources) {
            debug!(gateway = %role, "Gateway output unchanged");
            return Vec::new();
        }
        state.most.insert(role.clone(), resources);
        self.queue_status(&state);

        let affected: Vec<String> = self
            .clients
            .list()
            .into_iter()
            .filter(|c| c.role == role)
            .map(|c| c.resource_name().to_string())
            .collect();
        self.register_snapshots(&state, &affected)
    }

    pub async fn remove_gateway(&self, key: &str) -> Vec<String> {
        let mut state = self.state.lock().await;
        let Some(CollectionEvent::Delete(gateway)) = self.gateways.remove(key) else {
            return Vec::new();
        };
        let role = gateway_role(&gateway.source);
        state.most.remove(&role);
        self.queue_status(&state);

        let affected: Vec<String> = self
            .clients
            .list()
            .into_iter()
            .filter(|c| c.role == role)
            .map(|c| c.resource_name().to_string())
            .collect();
        self.register_snapshots(&state, &affected)
    }

    /// Retranslate `backend` for every client.
    pub async fn upsert_backend(&self, backend: BackendObjectIr) -> Vec<String> {
        let mut state = self.state.lock().await;
        if self.backends.upsert(backend.clone()).is_none() {
            return Vec::new();
        }
        let clients = self.clients.list();
        let pairs = clients.iter().map(|c| (c.clone(), backend.clone())).collect();
        for cluster in self.translate_clusters(pairs).await {
            state.clusters.insert((cluster.client_key.clone(), cluster.name.clone()), cluster);
        }
        let keys: Vec<String> = clients.iter().map(|c| c.resource_name().to_string()).collect();
        self.register_snapshots(&state, &keys)
    }

    pub async fn remove_backend(&self, key: &str) -> Vec<String> {
        let mut state = self.state.lock().await;
        let Some(CollectionEvent::Delete(backend)) = self.backends.remove(key) else {
            return Vec::new();
        };
        let cluster_name = backend.cluster_name();
        state.clusters.retain(|(_, name), _| *name != cluster_name);
        let keys = self.client_keys();
        self.register_snapshots(&state, &keys)
    }

    /// Reprioritize `endpoints` for every client.
    pub async fn upsert_endpoints(&self, endpoints: EndpointsForBackend) -> Vec<String> {
        let mut state = self.state.lock().await;
        if self.endpoints.upsert(endpoints.clone()).is_none() {
            return Vec::new();
        }
        let clients = self.clients.list();
        for client in &clients {
            let per_client = PerClientEndpoints::prioritize(client, &endpoints, &self.failover);
            state
                .endpoints
                .insert((per_client.client_key.clone(), per_client.cluster_name.clone()), per_client);
        }
        let keys: Vec<String> = clients.iter().map(|c| c.resource_name().to_string()).collect();
        self.register_snapshots(&state, &keys)
    }

    pub async fn remove_endpoints(&self, cluster_name: &str) -> Vec<String> {
        let mut state = self.state.lock().await;
        if self.endpoints.remove(cluster_name).is_none() {
            return Vec::new();
        }
        state.endpoints.retain(|(_, name), _| name != cluster_name);
        let keys = self.client_keys();
        self.register_snapshots(&state, &keys)
    }

    /// Count a new proxy stream. The first stream of a client computes its
    /// clusters and load assignments and registers its snapshot.
    pub async fn client_connected(&self, client: UniquelyConnectedClient) -> Vec<String> {
        let mut state = self.state.lock().await;
        if !self.connected.connect(client.clone()) {
            return Vec::new();
        }
        self.metrics.update_connected_clients(self.connected.len());
        self.clients.upsert(client.clone());

        let pairs = self.backends.list().into_iter().map(|b| (client.clone(), b)).collect();
        for cluster in self.translate_clusters(pairs).await {
            state.clusters.insert((cluster.client_key.clone(), cluster.name.clone()), cluster);
        }
        for endpoints in self.endpoints.list() {
            let per_client = PerClientEndpoints::prioritize(&client, &endpoints, &self.failover);
            state
                .endpoints
                .insert((per_client.client_key.clone(), per_client.cluster_name.clone()), per_client);
        }
        self.register_snapshots(&state, &[client.resource_name().to_string()])
    }

    /// Release a proxy stream. The last stream of a client drops its state
    /// and snapshot.
    pub async fn client_disconnected(&self, client_key: &str) -> bool {
        let mut state = self.state.lock().await;
        if self.connected.disconnect(client_key).is_none() {
            return false;
        }
        self.metrics.update_connected_clients(self.connected.len());
        self.clients.remove(client_key);

        state.drop_client(client_key);
        self.cache.clear_snapshot(client_key);
        true
    }

    /// Stop accepting status reports and wait for the pending ones.
    pub async fn shutdown(self) {
        let Self { status_tx, status_task, .. } = self;
        drop(status_tx);
        if let Err(e) = status_task.await {
            error!(error = %e, "Status task failed");
        }
    }

    fn client_keys(&self) -> Vec<String> {
        self.clients.list().iter().map(|c| c.resource_name().to_string()).collect()
    }

    fn queue_status(&self, state: &DerivedState) {
        if self.status_tx.send(state.merged_reports()).is_err() {
            error!("Status task is gone, dropping report");
        }
    }

    /// Translate every (client, backend) pair on the blocking pool.
    async fn translate_clusters(
        &self,
        pairs: Vec<(UniquelyConnectedClient, BackendObjectIr)>,
    ) -> Vec<PerClientCluster> {
        let mut tasks = JoinSet::new();
        for (client, backend) in pairs {
            let translator = self.backend_translator.clone();
            tasks.spawn_blocking(move || PerClientCluster::translate(&translator, &client, &backend));
        }

        let mut out = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(cluster) => out.push(cluster),
                Err(e) => error!(error = %e, "Cluster translation task failed"),
            }
        }
        out
    }

    /// The single place snapshots are written. Returns the keys that changed.
    fn register_snapshots(&self, state: &DerivedState, client_keys: &[String]) -> Vec<String> {
        let wanted: BTreeSet<&str> = client_keys.iter().map(String::as_str).collect();
        let mut changed = Vec::new();

        for client in self.clients.list() {
            let key = client.resource_name();
            if !wanted.contains(key) {
                continue;
            }
            let Some(most) = state.most.get(&client.role) else {
                if self.cache.clear_snapshot(key) {
                    changed.push(key.to_string());
                }
                debug!(client = %key, role = %client.role, "No gateway serves this client");
                continue;
            };

            let snapshot = snapshot_per_client(
                &client,
                most,
                DerivedState::for_client(&state.clusters, key),
                DerivedState::for_client(&state.endpoints, key),
            );
            self.metrics.update_errored_clusters(key, snapshot.errored_clusters.len());
            let updated = self.cache.set_snapshot(snapshot);
            self.metrics.record_snapshot_update(key, updated);
            if updated {
                changed.push(key.to_string());
            }
        }

        if !changed.is_empty() {
            info!(clients = changed.len(), "Registered snapshots");
        }
        changed
    }
}

impl std::fmt::Debug for ProxySyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySyncer")
            .field("gateways", &self.gateways.len())
            .field("backends", &self.backends.len())
            .field("endpoints", &self.endpoints.len())
            .field("clients", &self.connected.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        BackendRefIr, EndpointWithMd, FilterChainCommon, HttpBackend, HttpFilterChainIr,
        HttpRouteIr, HttpRouteRuleMatchIr, ListenerIr, Locality, ObjectSource, RouteMatcher,
        VirtualHostIr,
    };

    fn gateway_source() -> ObjectSource {
        ObjectSource::new("gateway.networking.k8s.io", "Gateway", "default", "edge")
    }

    fn service(name: &str) -> BackendObjectIr {
        BackendObjectIr::new(ObjectSource::new("", "Service", "default", name), 8080)
    }

    fn gateway(backend: &BackendObjectIr) -> GatewayIr {
        let route = Arc::new(HttpRouteIr::new(ObjectSource::new(
            "gateway.networking.k8s.io",
            "HTTPRoute",
            "default",
            "echo",
        )));
        let mut rule = HttpRouteRuleMatchIr::new(route, RouteMatcher::prefix("/"));
        rule.backends.push(HttpBackend::new(BackendRefIr::to_backend(Arc::new(backend.clone()), 1)));
        let vhost = VirtualHostIr {
            name: "echo".into(),
            hostname: "echo.example.com".into(),
            rules: vec![rule],
        };
        let mut chain = HttpFilterChainIr::new(FilterChainCommon::named("http"));
        chain.virtual_hosts.push(vhost);
        let mut listener = ListenerIr::new("http", "0.0.0.0", 8080);
        listener.http_filter_chains.push(chain);
        let mut gateway = GatewayIr::new(gateway_source());
        gateway.listeners.push(listener);
        gateway
    }

    fn client(zone: &str) -> UniquelyConnectedClient {
        UniquelyConnectedClient::new(
            gateway_role(&gateway_source()),
            "default",
            BTreeMap::new(),
            Locality::new("us-east", zone, ""),
        )
    }

    fn syncer() -> ProxySyncer {
        ProxySyncer::new(
            Arc::new(PluginRegistry::with_builtins()),
            &AppConfig::default(),
            Arc::new(LoggingStatusWriter),
        )
    }

    #[tokio::test]
    async fn client_gets_snapshot_once_gateway_exists() {
        let syncer = syncer();
        let backend = service("echo");
        let client = client("1a");
        let key = client.resource_name().to_string();

        syncer.upsert_backend(backend.clone()).await;
        assert!(syncer.client_connected(client.clone()).await.is_empty());
        assert!(syncer.snapshot(&key).is_none());

        assert_eq!(syncer.upsert_gateway(gateway(&backend)).await, vec![key.clone()]);
        let snapshot = syncer.snapshot(&key).unwrap();
        assert_eq!(snapshot.listeners.len(), 1);
        assert_eq!(snapshot.routes.len(), 1);
        assert!(snapshot.clusters.get("service_default_echo_8080").is_some());
    }

    #[tokio::test]
    async fn unchanged_inputs_do_not_touch_snapshots() {
        let syncer = syncer();
        let backend = service("echo");
        syncer.upsert_gateway(gateway(&backend)).await;
        syncer.upsert_backend(backend.clone()).await;
        syncer.client_connected(client("1a")).await;

        assert!(syncer.upsert_gateway(gateway(&backend)).await.is_empty());
        assert!(syncer.upsert_backend(backend).await.is_empty());
    }

    #[tokio::test]
    async fn endpoints_are_prioritized_per_client() {
        let syncer = syncer();
        let backend = service("echo");
        syncer.upsert_gateway(gateway(&backend)).await;
        syncer.upsert_backend(backend.clone()).await;
        let a = client("1a");
        let b = client("1b");
        syncer.client_connected(a.clone()).await;
        syncer.client_connected(b.clone()).await;

        let mut eps = EndpointsForBackend::new(&backend);
        eps.add(Locality::new("us-east", "1a", ""), EndpointWithMd::new("10.0.0.1", 8080));
        eps.add(Locality::new("us-east", "1b", ""), EndpointWithMd::new("10.0.1.1", 8080));
        let changed = syncer.upsert_endpoints(eps).await;
        assert_eq!(changed.len(), 2);

        let priority_of = |client: &UniquelyConnectedClient, zone: &str| {
            let snapshot = syncer.snapshot(client.resource_name()).unwrap();
            let cla = snapshot.endpoints.get("service_default_echo_8080").unwrap().clone();
            cla.endpoints
                .iter()
                .find(|l| l.locality.as_ref().map(|l| l.zone.as_str()) == Some(zone))
                .map(|l| l.priority)
                .unwrap()
        };
        assert_eq!(priority_of(&a, "1a"), 0);
        assert_eq!(priority_of(&a, "1b"), 1);
        assert_eq!(priority_of(&b, "1b"), 0);
        assert_eq!(priority_of(&b, "1a"), 1);
    }

    #[tokio::test]
    async fn last_stream_drops_snapshot() {
        let syncer = syncer();
        let backend = service("echo");
        syncer.upsert_gateway(gateway(&backend)).await;
        let client = client("1a");
        let key = client.resource_name().to_string();

        syncer.client_connected(client.clone()).await;
        syncer.client_connected(client).await;
        assert!(!syncer.client_disconnected(&key).await);
        assert!(syncer.snapshot(&key).is_some());
        assert!(syncer.client_disconnected(&key).await);
        assert!(syncer.snapshot(&key).is_none());
        assert!(syncer.clients().is_empty());
    }

    #[tokio::test]
    async fn removing_backend_drops_its_cluster() {
        let syncer = syncer();
        let backend = service("echo");
        syncer.upsert_gateway(gateway(&backend)).await;
        syncer.upsert_backend(backend.clone()).await;
        let client = client("1a");
        syncer.client_connected(client.clone()).await;

        let changed = syncer.remove_backend(&backend.resource_name()).await;
        assert_eq!(changed.len(), 1);
        let snapshot = syncer.snapshot(client.resource_name()).unwrap();
        assert!(snapshot.clusters.is_empty());
        syncer.shutdown().await;
    }

    #[tokio::test]
    async fn backend_failing_after_snapshot_is_recorded() {
        let syncer = syncer();
        let backend = service("echo");
        syncer.upsert_gateway(gateway(&backend)).await;
        syncer.upsert_backend(backend).await;
        let client = client("1a");
        let key = client.resource_name().to_string();
        syncer.client_connected(client).await;
        assert!(syncer.snapshot(&key).unwrap().errored_clusters.is_empty());

        let lambda = BackendObjectIr::new(ObjectSource::new("example.io", "Lambda", "default", "fn"), 0);
        assert_eq!(syncer.upsert_backend(lambda.clone()).await, vec![key.clone()]);
        let snapshot = syncer.snapshot(&key).unwrap();
        assert!(snapshot.errored_clusters.contains_key("example.io_Lambda_default_fn_0"));

        assert_eq!(syncer.remove_backend(&lambda.resource_name()).await, vec![key.clone()]);
        assert!(syncer.snapshot(&key).unwrap().errored_clusters.is_empty());
        syncer.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_endpoint_updates_settle_on_last_write() {
        let syncer = Arc::new(syncer());
        let backend = service("echo");
        syncer.upsert_gateway(gateway(&backend)).await;
        syncer.upsert_backend(backend.clone()).await;
        let client = client("1a");
        syncer.client_connected(client.clone()).await;

        let mut tasks = JoinSet::new();
        for octet in 1..=16u8 {
            let syncer = Arc::clone(&syncer);
            let backend = backend.clone();
            tasks.spawn(async move {
                let mut eps = EndpointsForBackend::new(&backend);
                eps.add(Locality::new("us-east", "1a", ""), EndpointWithMd::new(format!("10.0.0.{}", octet), 8080));
                syncer.upsert_endpoints(eps).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let cluster_name = backend.cluster_name();
        let stored = syncer.endpoints().get(&cluster_name).unwrap();
        let expected = PerClientEndpoints::prioritize(&client, &stored, &BTreeMap::new());
        let snapshot = syncer.snapshot(client.resource_name()).unwrap();
        assert_eq!(snapshot.endpoints.get(&cluster_name), Some(&expected.cla));
    }
}
