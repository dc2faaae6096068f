//! Identity of declarative source objects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Plugin registry key: the API group and kind of a policy or backend object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKind {
    #[serde(default)]
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), kind: kind.into() }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.kind)
    }
}

/// Identity of any source object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectSource {
    #[serde(default)]
    pub group: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

impl ObjectSource {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Stable string key, `{kind}/{namespace}/{name}` with the group prepended when set.
    pub fn resource_name(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}/{}", self.kind, self.namespace, self.name)
        } else {
            format!("{}/{}/{}/{}", self.group, self.kind, self.namespace, self.name)
        }
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group.clone(), self.kind.clone())
    }
}

impl fmt::Display for ObjectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_name_includes_group_only_when_set() {
        let core = ObjectSource::new("", "Service", "default", "echo");
        assert_eq!(core.resource_name(), "Service/default/echo");

        let ext = ObjectSource::new("gateway.example.io", "Backend", "infra", "lambda");
        assert_eq!(ext.resource_name(), "gateway.example.io/Backend/infra/lambda");
        assert_eq!(ext.group_kind(), GroupKind::new("gateway.example.io", "Backend"));
    }

    #[test]
    fn group_kind_orders_by_group_then_kind() {
        let mut keys = vec![
            GroupKind::new("b.io", "A"),
            GroupKind::new("a.io", "Z"),
            GroupKind::new("a.io", "B"),
        ];
        keys.sort();
        assert_eq!(keys[0], GroupKind::new("a.io", "B"));
        assert_eq!(keys[2], GroupKind::new("b.io", "A"));
    }
}
