//! Discovered endpoints of one backend, grouped by locality.

use super::backend::BackendObjectIr;
use super::client::Locality;
use super::source::ObjectSource;
use crate::utils::{hash_bytes, hash_labels, hash_parts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One upstream address with the labels it was discovered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointWithMd {
    pub address: String,
    pub port: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub load_balancing_weight: Option<u32>,
}

impl EndpointWithMd {
    pub fn new(address: impl Into<String>, port: u32) -> Self {
        Self { address: address.into(), port, labels: BTreeMap::new(), load_balancing_weight: None }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    fn hash_in(&self, locality: &Locality) -> u64 {
        let port = self.port.to_string();
        let labels = hash_labels(&self.labels).to_string();
        let weight = self.load_balancing_weight.unwrap_or(0).to_string();
        hash_parts([
            locality.region.as_str(),
            locality.zone.as_str(),
            locality.subzone.as_str(),
            self.address.as_str(),
            port.as_str(),
            labels.as_str(),
            weight.as_str(),
        ])
    }
}

/// Endpoint set of one backend.
///
/// The equality hash XOR-folds per-endpoint hashes so arrival order never
/// matters, then mixes in the backend identity. Values only grow; a removal is
/// expressed as a freshly built value.
#[derive(Debug, Clone)]
pub struct EndpointsForBackend {
    pub cluster_name: String,
    pub backend: ObjectSource,
    pub port: u32,
    pub lb_eps: BTreeMap<Locality, Vec<EndpointWithMd>>,
    backend_hash: u64,
    lb_eps_hash: u64,
}

impl EndpointsForBackend {
    pub fn new(backend: &BackendObjectIr) -> Self {
        let cluster_name = backend.cluster_name();
        let port = backend.port.to_string();
        let resource = backend.source.resource_name();
        let backend_hash = hash_parts([resource.as_str(), port.as_str(), cluster_name.as_str()]);
        Self {
            cluster_name,
            backend: backend.source.clone(),
            port: backend.port,
            lb_eps: BTreeMap::new(),
            backend_hash,
            lb_eps_hash: 0,
        }
    }

    pub fn add(&mut self, locality: Locality, endpoint: EndpointWithMd) {
        self.lb_eps_hash ^= endpoint.hash_in(&locality);
        self.lb_eps.entry(locality).or_default().push(endpoint);
    }

    /// Keyed by cluster name, which already encodes the backend identity and port.
    pub fn resource_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn equality_hash(&self) -> u64 {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.backend_hash.to_be_bytes());
        bytes[8..].copy_from_slice(&self.lb_eps_hash.to_be_bytes());
        hash_bytes(&bytes)
    }

    pub fn endpoint_count(&self) -> usize {
        self.lb_eps.values().map(Vec::len).sum()
    }
}

impl PartialEq for EndpointsForBackend {
    fn eq(&self, other: &Self) -> bool {
        self.cluster_name == other.cluster_name && self.equality_hash() == other.equality_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn backend(name: &str) -> BackendObjectIr {
        BackendObjectIr::new(ObjectSource::new("", "Service", "default", name), 8080)
    }

    #[test]
    fn identical_endpoints_on_different_backends_do_not_collide() {
        let mut a = EndpointsForBackend::new(&backend("a"));
        let mut b = EndpointsForBackend::new(&backend("b"));
        a.add(Locality::default(), EndpointWithMd::new("10.0.0.1", 8080));
        b.add(Locality::default(), EndpointWithMd::new("10.0.0.1", 8080));
        assert_ne!(a.equality_hash(), b.equality_hash());
    }

    #[test]
    fn locality_and_labels_change_the_hash() {
        let mut a = EndpointsForBackend::new(&backend("a"));
        let mut b = EndpointsForBackend::new(&backend("a"));
        let mut c = EndpointsForBackend::new(&backend("a"));
        a.add(Locality::new("us-east", "1a", ""), EndpointWithMd::new("10.0.0.1", 8080));
        b.add(Locality::new("us-west", "1a", ""), EndpointWithMd::new("10.0.0.1", 8080));
        c.add(
            Locality::new("us-east", "1a", ""),
            EndpointWithMd::new("10.0.0.1", 8080).with_label("version", "v2"),
        );
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.endpoint_count(), 1);
    }

    fn endpoint_strategy() -> impl Strategy<Value = (u8, u8, u16)> {
        (0u8..3, 1u8..=254, 1u16..=65535)
    }

    proptest! {
        #[test]
        fn hash_is_independent_of_arrival_order(
            raw in proptest::collection::btree_set(endpoint_strategy(), 1..20),
        ) {
            let items: Vec<_> = raw.into_iter().collect();
            let build = |order: &[(u8, u8, u16)]| {
                let mut eps = EndpointsForBackend::new(&backend("echo"));
                for (zone, octet, port) in order {
                    eps.add(
                        Locality::new("us-east", format!("zone-{zone}"), ""),
                        EndpointWithMd::new(format!("10.0.0.{octet}"), *port as u32),
                    );
                }
                eps
            };

            let forward = build(&items);
            let mut reversed_items = items.clone();
            reversed_items.reverse();
            let reversed = build(&reversed_items);
            prop_assert_eq!(forward.equality_hash(), reversed.equality_hash());
        }

        #[test]
        fn adding_a_new_endpoint_changes_the_hash(
            raw in proptest::collection::btree_set(endpoint_strategy(), 0..20),
            extra in endpoint_strategy(),
        ) {
            prop_assume!(!raw.contains(&extra));
            let mut eps = EndpointsForBackend::new(&backend("echo"));
            for (zone, octet, port) in &raw {
                eps.add(
                    Locality::new("us-east", format!("zone-{zone}"), ""),
                    EndpointWithMd::new(format!("10.0.0.{octet}"), *port as u32),
                );
            }
            let before = eps.equality_hash();
            let (zone, octet, port) = extra;
            eps.add(
                Locality::new("us-east", format!("zone-{zone}"), ""),
                EndpointWithMd::new(format!("10.0.0.{octet}"), port as u32),
            );
            prop_assert_ne!(before, eps.equality_hash());
        }
    }
}
