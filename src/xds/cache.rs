//! Snapshot cache keyed by client identity.

use crate::xds::snapshot::XdsSnapshot;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Broadcast payload for one client. `snapshot` is `None` after a removal.
#[derive(Debug, Clone)]
pub struct SnapshotUpdate {
    pub client_key: String,
    pub snapshot: Option<Arc<XdsSnapshot>>,
}

/// Latest snapshot of every connected client.
///
/// Readers get immutable `Arc`s. Writes come from the syncer, which
/// serializes them; a write whose versions match the cached snapshot is
/// dropped.
#[derive(Debug)]
pub struct SnapshotCache {
    snapshots: DashMap<String, Arc<XdsSnapshot>>,
    update_tx: broadcast::Sender<SnapshotUpdate>,
}

impl SnapshotCache {
    pub fn new(capacity: usize) -> Self {
        let (update_tx, _) = broadcast::channel(capacity.max(1));
        Self { snapshots: DashMap::new(), update_tx }
    }

    pub fn get(&self, client_key: &str) -> Option<Arc<XdsSnapshot>> {
        self.snapshots.get(client_key).map(|entry| Arc::clone(entry.value()))
    }

    /// Client keys with a snapshot, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.snapshots.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotUpdate> {
        self.update_tx.subscribe()
    }

    /// Store `snapshot`. Returns false when the cached one has the same
    /// versions and cluster errors.
    pub(crate) fn set_snapshot(&self, snapshot: XdsSnapshot) -> bool {
        if let Some(current) = self.snapshots.get(&snapshot.client_key) {
            if current.unchanged_from(&snapshot) {
                debug!(client = %snapshot.client_key, "Snapshot unchanged, skipping");
                return false;
            }
        }

        let client_key = snapshot.client_key.clone();
        let snapshot = Arc::new(snapshot);
        self.snapshots.insert(client_key.clone(), Arc::clone(&snapshot));
        info!(
            client = %client_key,
            clusters = %snapshot.clusters.version,
            endpoints = %snapshot.endpoints.version,
            routes = %snapshot.routes.version,
            listeners = %snapshot.listeners.version,
            "Updated snapshot"
        );

        // No subscribers is fine
        let _ = self.update_tx.send(SnapshotUpdate { client_key, snapshot: Some(snapshot) });
        true
    }

    /// Drop the snapshot of a client. Returns false when there was none.
    pub(crate) fn clear_snapshot(&self, client_key: &str) -> bool {
        if self.snapshots.remove(client_key).is_none() {
            return false;
        }
        info!(client = %client_key, "Removed snapshot");
        let _ = self
            .update_tx
            .send(SnapshotUpdate { client_key: client_key.to_string(), snapshot: None });
        true
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ObjectSource;
    use crate::xds::resources::Resources;
    use std::collections::BTreeMap;

    fn snapshot(client: &str, clusters_version: u64) -> XdsSnapshot {
        XdsSnapshot {
            client_key: client.to_string(),
            gateway: ObjectSource::new("", "Gateway", "default", "edge"),
            clusters: Resources::with_version(clusters_version, BTreeMap::new()),
            endpoints: Resources::default(),
            routes: Resources::default(),
            listeners: Resources::default(),
            errored_clusters: BTreeMap::new(),
        }
    }

    #[test]
    fn unchanged_versions_are_a_noop() {
        let cache = SnapshotCache::default();
        assert!(cache.set_snapshot(snapshot("a", 1)));
        assert!(!cache.set_snapshot(snapshot("a", 1)));
        assert!(cache.set_snapshot(snapshot("a", 2)));
        assert_eq!(cache.get("a").unwrap().clusters.version, "2");
    }

    #[test]
    fn new_cluster_error_is_stored_without_version_change() {
        let cache = SnapshotCache::default();
        assert!(cache.set_snapshot(snapshot("a", 1)));

        let mut errored = snapshot("a", 1);
        errored.errored_clusters.insert("fn".into(), "no backend translator found".into());
        assert!(cache.set_snapshot(errored.clone()));
        assert!(!cache.set_snapshot(errored));
        assert_eq!(cache.get("a").unwrap().errored_clusters.len(), 1);

        assert!(cache.set_snapshot(snapshot("a", 1)));
        assert!(cache.get("a").unwrap().errored_clusters.is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_updates_and_removals() {
        let cache = SnapshotCache::new(8);
        let mut rx = cache.subscribe();

        cache.set_snapshot(snapshot("a", 1));
        cache.set_snapshot(snapshot("a", 1));
        assert!(cache.clear_snapshot("a"));
        assert!(!cache.clear_snapshot("a"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.client_key, "a");
        assert!(first.snapshot.is_some());
        let second = rx.recv().await.unwrap();
        assert!(second.snapshot.is_none());
        assert!(rx.try_recv().is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn keys_are_sorted() {
        let cache = SnapshotCache::default();
        cache.set_snapshot(snapshot("b", 1));
        cache.set_snapshot(snapshot("a", 1));
        assert_eq!(cache.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cache.len(), 2);
    }
}
