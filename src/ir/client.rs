//! Identity of one connected proxy instance.

use crate::utils::hash_labels;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locality {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub subzone: String,
}

impl Locality {
    pub fn new(
        region: impl Into<String>,
        zone: impl Into<String>,
        subzone: impl Into<String>,
    ) -> Self {
        Self { region: region.into(), zone: zone.into(), subzone: subzone.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty() && self.zone.is_empty() && self.subzone.is_empty()
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.zone, self.subzone)
    }
}

/// A unique proxy identity. Label changes produce a new cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UniquelyConnectedClient {
    pub role: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub locality: Locality,
    resource_name: String,
}

impl UniquelyConnectedClient {
    pub fn new(
        role: impl Into<String>,
        namespace: impl Into<String>,
        labels: BTreeMap<String, String>,
        locality: Locality,
    ) -> Self {
        let role = role.into();
        let namespace = namespace.into();
        let resource_name = if namespace.is_empty() {
            role.clone()
        } else {
            format!("{}~{}~{}", role, hash_labels(&labels), namespace)
        };
        Self { role, namespace, labels, locality, resource_name }
    }

    /// Snapshot cache key: `{role}~{labels_hash}~{namespace}`, or the bare role.
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_name_folds_labels() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "edge".to_string());
        let client = UniquelyConnectedClient::new(
            "gateway-proxy",
            "infra",
            labels.clone(),
            Locality::new("us-east", "a", ""),
        );
        assert_eq!(
            client.resource_name(),
            format!("gateway-proxy~{}~infra", hash_labels(&labels))
        );

        labels.insert("version".to_string(), "2".to_string());
        let relabeled =
            UniquelyConnectedClient::new("gateway-proxy", "infra", labels, Locality::default());
        assert_ne!(client.resource_name(), relabeled.resource_name());
    }

    #[test]
    fn empty_namespace_uses_bare_role() {
        let client =
            UniquelyConnectedClient::new("gateway-proxy", "", BTreeMap::new(), Locality::default());
        assert_eq!(client.resource_name(), "gateway-proxy");
    }

    #[test]
    fn equality_is_structural() {
        let a = UniquelyConnectedClient::new("r", "ns", BTreeMap::new(), Locality::new("x", "", ""));
        let b = UniquelyConnectedClient::new("r", "ns", BTreeMap::new(), Locality::new("x", "", ""));
        let c = UniquelyConnectedClient::new("r", "ns", BTreeMap::new(), Locality::new("y", "", ""));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(Locality::default().is_empty());
    }
}
