//! Versioned resource collections and content hashing.

use crate::utils::hash_bytes;
use envoy_types::pb::envoy::config::route::v3::{route, route_action, RouteConfiguration};
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

/// Content hash of a protobuf message: the first 8 bytes of the SHA-256 of
/// its encoding.
///
/// Only stable for messages without map fields; route configurations go
/// through [`hash_route_configuration`].
pub fn hash_resource<M: Message>(msg: &M) -> u64 {
    hash_bytes(&msg.encode_to_vec())
}

/// Content hash of a route configuration.
///
/// `typed_per_filter_config` is a map and prost encodes it in iteration
/// order, so those maps are lifted out and hashed in sorted order.
pub fn hash_route_configuration(config: &RouteConfiguration) -> u64 {
    let mut canonical = config.clone();
    let mut lifted: Vec<(String, String, Any)> = Vec::new();

    for (vi, vhost) in canonical.virtual_hosts.iter_mut().enumerate() {
        let owner = vi.to_string();
        lift_filter_configs(&mut lifted, &owner, &mut vhost.typed_per_filter_config);

        for (ri, route) in vhost.routes.iter_mut().enumerate() {
            let owner = format!("{}/{}", vi, ri);
            lift_filter_configs(&mut lifted, &owner, &mut route.typed_per_filter_config);

            if let Some(route::Action::Route(action)) = &mut route.action {
                if let Some(route_action::ClusterSpecifier::WeightedClusters(weighted)) =
                    &mut action.cluster_specifier
                {
                    for (ci, cluster) in weighted.clusters.iter_mut().enumerate() {
                        let owner = format!("{}/{}/{}", vi, ri, ci);
                        lift_filter_configs(&mut lifted, &owner, &mut cluster.typed_per_filter_config);
                    }
                }
            }
        }
    }
    lifted.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

    let mut hasher = Sha256::new();
    hasher.update(canonical.encode_to_vec());
    for (owner, filter, any) in &lifted {
        hasher.update(owner.as_bytes());
        hasher.update([0u8]);
        hasher.update(filter.as_bytes());
        hasher.update([0u8]);
        hasher.update(any.type_url.as_bytes());
        hasher.update([0u8]);
        hasher.update(&any.value);
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

fn lift_filter_configs(
    out: &mut Vec<(String, String, Any)>,
    owner: &str,
    configs: &mut std::collections::HashMap<String, Any>,
) {
    out.extend(configs.drain().map(|(filter, any)| (owner.to_string(), filter, any)));
}

/// XOR-fold of member hashes; order-independent and self-cancelling.
pub fn xor_fold<I: IntoIterator<Item = u64>>(hashes: I) -> u64 {
    hashes.into_iter().fold(0, |acc, h| acc ^ h)
}

/// A named set of resources of one kind with its version string.
#[derive(Debug, Clone, PartialEq)]
pub struct Resources<T> {
    pub version: String,
    pub items: BTreeMap<String, T>,
}

impl<T> Default for Resources<T> {
    fn default() -> Self {
        Self { version: 0u64.to_string(), items: BTreeMap::new() }
    }
}

impl<T> Resources<T> {
    /// Key `items` by `name_of` and version them by the XOR-fold of `hash_of`.
    pub fn from_items<I, N, H>(items: I, name_of: N, hash_of: H) -> Self
    where
        I: IntoIterator<Item = T>,
        N: Fn(&T) -> String,
        H: Fn(&T) -> u64,
    {
        let mut version = 0u64;
        let mut map = BTreeMap::new();
        for item in items {
            version ^= hash_of(&item);
            map.insert(name_of(&item), item);
        }
        Self { version: version.to_string(), items: map }
    }

    pub fn with_version(version: u64, items: BTreeMap<String, T>) -> Self {
        Self { version: version.to_string(), items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.items.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }
}

impl<T: Message> Resources<T> {
    /// Encode every item as `Any`, in name order.
    pub fn to_any(&self, type_url: &str) -> Vec<Any> {
        self.items
            .values()
            .map(|item| Any { type_url: type_url.to_string(), value: item.encode_to_vec() })
            .collect()
    }
}
