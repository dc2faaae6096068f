//! In-memory keyed collections with change notification.

use crate::ir::{BackendObjectIr, EndpointsForBackend, GatewayIr, UniquelyConnectedClient};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

/// A value stored in a [`Collection`] under a stable key.
pub trait Keyed: Clone + PartialEq + Send + Sync + 'static {
    fn key(&self) -> String;
}

impl Keyed for GatewayIr {
    fn key(&self) -> String {
        self.resource_name()
    }
}

impl Keyed for BackendObjectIr {
    fn key(&self) -> String {
        self.resource_name()
    }
}

impl Keyed for EndpointsForBackend {
    fn key(&self) -> String {
        self.resource_name().to_string()
    }
}

impl Keyed for UniquelyConnectedClient {
    fn key(&self) -> String {
        self.resource_name().to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent<T> {
    Add(T),
    Update { old: T, new: T },
    Delete(T),
}

impl<T: Keyed> CollectionEvent<T> {
    /// Key of the affected value.
    pub fn key(&self) -> String {
        match self {
            CollectionEvent::Add(v) | CollectionEvent::Delete(v) => v.key(),
            CollectionEvent::Update { new, .. } => new.key(),
        }
    }
}

/// Values keyed by [`Keyed::key`], listed in key order.
///
/// Writers get the event back and subscribers get it on a broadcast channel.
/// Upserting a value equal to the stored one is not a change.
#[derive(Debug)]
pub struct Collection<T: Keyed> {
    name: &'static str,
    items: RwLock<BTreeMap<String, T>>,
    events: broadcast::Sender<CollectionEvent<T>>,
}

impl<T: Keyed> Collection<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { name, items: RwLock::new(BTreeMap::new()), events }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn list(&self) -> Vec<T> {
        self.read(|items| items.values().cloned().collect())
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.read(|items| items.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.read(BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent<T>> {
        self.events.subscribe()
    }

    /// Insert or replace `value`. Returns `None` when nothing changed.
    pub fn upsert(&self, value: T) -> Option<CollectionEvent<T>> {
        let key = value.key();
        let event = {
            let mut items = self.items.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            match items.get(&key) {
                Some(old) if *old == value => None,
                Some(old) => {
                    let old = old.clone();
                    items.insert(key.clone(), value.clone());
                    Some(CollectionEvent::Update { old, new: value })
                }
                None => {
                    items.insert(key.clone(), value.clone());
                    Some(CollectionEvent::Add(value))
                }
            }
        }?;
        self.publish(&key, event)
    }

    /// Remove the value under `key`. Returns `None` when it was absent.
    pub fn remove(&self, key: &str) -> Option<CollectionEvent<T>> {
        let removed = {
            let mut items = self.items.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            items.remove(key)
        }?;
        self.publish(key, CollectionEvent::Delete(removed))
    }

    fn publish(&self, key: &str, event: CollectionEvent<T>) -> Option<CollectionEvent<T>> {
        trace!(collection = self.name, key = %key, "Collection changed");
        let _ = self.events.send(event.clone());
        Some(event)
    }

    fn read<R>(&self, f: impl FnOnce(&BTreeMap<String, T>) -> R) -> R {
        let items = self.items.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Locality;

    fn client(role: &str, zone: &str) -> UniquelyConnectedClient {
        UniquelyConnectedClient::new(role, "", BTreeMap::new(), Locality::new("us-east", zone, ""))
    }

    #[test]
    fn equal_upsert_emits_nothing() {
        let clients = Collection::new("clients", 16);
        assert!(matches!(clients.upsert(client("edge", "1a")), Some(CollectionEvent::Add(_))));
        assert!(clients.upsert(client("edge", "1a")).is_none());
        assert!(matches!(
            clients.upsert(client("edge", "1b")),
            Some(CollectionEvent::Update { .. })
        ));
        assert_eq!(clients.len(), 1);
        assert_eq!(clients.get("edge").unwrap().locality.zone, "1b");
    }

    #[test]
    fn list_is_in_key_order() {
        let clients = Collection::new("clients", 16);
        clients.upsert(client("b", ""));
        clients.upsert(client("a", ""));
        let roles: Vec<String> = clients.list().into_iter().map(|c| c.role).collect();
        assert_eq!(roles, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let clients = Collection::new("clients", 16);
        let mut rx = clients.subscribe();

        clients.upsert(client("edge", "1a"));
        clients.upsert(client("edge", "1a"));
        assert!(clients.remove("edge").is_some());
        assert!(clients.remove("edge").is_none());

        assert!(matches!(rx.recv().await.unwrap(), CollectionEvent::Add(_)));
        let delete = rx.recv().await.unwrap();
        assert_eq!(delete.key(), "edge");
        assert!(matches!(delete, CollectionEvent::Delete(_)));
        assert!(rx.try_recv().is_err());
    }
}
