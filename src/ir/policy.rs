//! Typed policies and their attachment to IR nodes.
//!
//! Every IR level carries an [`AttachedPolicies`] value. Plugins downcast the
//! opaque [`PolicyIr`] payload they own; the translator only needs creation
//! time and equality.

use super::source::GroupKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Opaque policy payload interpreted by exactly one plugin.
pub trait PolicyIr: Debug + Send + Sync {
    fn creation_time(&self) -> DateTime<Utc>;

    fn equals(&self, other: &dyn PolicyIr) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// Downcast a policy payload to the concrete type owned by a plugin.
pub fn downcast_policy<T: PolicyIr + 'static>(policy: &dyn PolicyIr) -> Option<&T> {
    policy.as_any().downcast_ref::<T>()
}

/// The object and optional section a policy was attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTargetRef {
    #[serde(default)]
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub section_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PolicyAtt {
    pub policy: Arc<dyn PolicyIr>,
    pub target_ref: Option<PolicyTargetRef>,
}

impl PolicyAtt {
    pub fn new(policy: Arc<dyn PolicyIr>) -> Self {
        Self { policy, target_ref: None }
    }

    pub fn with_target(mut self, target_ref: PolicyTargetRef) -> Self {
        self.target_ref = Some(target_ref);
        self
    }

    pub fn policy_as<T: PolicyIr + 'static>(&self) -> Option<&T> {
        downcast_policy::<T>(self.policy.as_ref())
    }
}

impl PartialEq for PolicyAtt {
    fn eq(&self, other: &Self) -> bool {
        self.target_ref == other.target_ref && self.policy.equals(other.policy.as_ref())
    }
}

/// Policies grouped by type. Each list is kept in increasing creation-time
/// order and types iterate in `GroupKind` order.
#[derive(Debug, Clone, Default)]
pub struct AttachedPolicies {
    policies: BTreeMap<GroupKind, Vec<PolicyAtt>>,
}

impl AttachedPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert after every policy of the same type created at or before this one.
    pub fn append(&mut self, group_kind: GroupKind, attachment: PolicyAtt) {
        let list = self.policies.entry(group_kind).or_default();
        let created = attachment.policy.creation_time();
        let position = list
            .iter()
            .position(|existing| existing.policy.creation_time() > created)
            .unwrap_or(list.len());
        list.insert(position, attachment);
    }

    /// Builder form of [`append`](Self::append) for a bare policy.
    pub fn with(mut self, group_kind: GroupKind, policy: Arc<dyn PolicyIr>) -> Self {
        self.append(group_kind, PolicyAtt::new(policy));
        self
    }

    pub fn get(&self, group_kind: &GroupKind) -> &[PolicyAtt] {
        self.policies.get(group_kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKind, &[PolicyAtt])> {
        self.policies.iter().map(|(gk, list)| (gk, list.as_slice()))
    }

    pub fn group_kinds(&self) -> impl Iterator<Item = &GroupKind> {
        self.policies.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.values().all(Vec::is_empty)
    }

    /// Total number of attached policy instances
    pub fn len(&self) -> usize {
        self.policies.values().map(Vec::len).sum()
    }

    /// Accumulate another set of policies into this one.
    pub fn extend(&mut self, other: &AttachedPolicies) {
        for (gk, list) in other.iter() {
            for attachment in list {
                self.append(gk.clone(), attachment.clone());
            }
        }
    }
}

impl PartialEq for AttachedPolicies {
    fn eq(&self, other: &Self) -> bool {
        if self.policies.len() != other.policies.len() {
            return false;
        }
        self.policies.iter().all(|(gk, list)| match other.policies.get(gk) {
            Some(other_list) => list == other_list,
            None => false,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::LabelPolicy;
    use super::*;
    use proptest::prelude::*;

    fn labels(policies: &AttachedPolicies, gk: &GroupKind) -> Vec<String> {
        policies
            .get(gk)
            .iter()
            .map(|att| att.policy_as::<LabelPolicy>().unwrap().label.clone())
            .collect()
    }

    #[test]
    fn append_orders_by_creation_time() {
        let gk = GroupKind::new("gateway.example.io", "TrafficPolicy");
        let mut policies = AttachedPolicies::new();
        policies.append(gk.clone(), PolicyAtt::new(LabelPolicy::at("late", 30)));
        policies.append(gk.clone(), PolicyAtt::new(LabelPolicy::at("early", 10)));
        policies.append(gk.clone(), PolicyAtt::new(LabelPolicy::at("middle", 20)));

        assert_eq!(labels(&policies, &gk), vec!["early", "middle", "late"]);
        assert_eq!(policies.len(), 3);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let gk = GroupKind::new("", "Policy");
        let mut policies = AttachedPolicies::new();
        policies.append(gk.clone(), PolicyAtt::new(LabelPolicy::at("first", 5)));
        policies.append(gk.clone(), PolicyAtt::new(LabelPolicy::at("second", 5)));
        assert_eq!(labels(&policies, &gk), vec!["first", "second"]);
    }

    #[test]
    fn equality_is_deep() {
        let gk = GroupKind::new("", "Policy");
        let a = AttachedPolicies::new().with(gk.clone(), LabelPolicy::at("x", 1));
        let b = AttachedPolicies::new().with(gk.clone(), LabelPolicy::at("x", 1));
        let c = AttachedPolicies::new().with(gk.clone(), LabelPolicy::at("y", 1));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, AttachedPolicies::new());
    }

    #[test]
    fn target_ref_participates_in_equality() {
        let gk = GroupKind::new("", "Policy");
        let target = PolicyTargetRef {
            group: "gateway.networking.k8s.io".to_string(),
            kind: "HTTPRoute".to_string(),
            name: "api".to_string(),
            section_name: None,
        };
        let mut a = AttachedPolicies::new();
        a.append(gk.clone(), PolicyAtt::new(LabelPolicy::at("x", 1)).with_target(target));
        let b = AttachedPolicies::new().with(gk, LabelPolicy::at("x", 1));
        assert_ne!(a, b);
    }

    #[test]
    fn types_iterate_in_group_kind_order() {
        let policies = AttachedPolicies::new()
            .with(GroupKind::new("z.io", "A"), LabelPolicy::at("z", 1))
            .with(GroupKind::new("a.io", "B"), LabelPolicy::at("a", 1));
        let order: Vec<_> = policies.group_kinds().map(|gk| gk.group.clone()).collect();
        assert_eq!(order, vec!["a.io", "z.io"]);
    }

    proptest! {
        #[test]
        fn insertion_order_does_not_affect_equality(
            times in proptest::collection::btree_set(0i64..10_000, 1..12),
            seed in any::<u64>(),
        ) {
            let gk = GroupKind::new("gateway.example.io", "TrafficPolicy");
            let items: Vec<i64> = times.into_iter().collect();

            let mut shuffled = items.clone();
            let len = shuffled.len();
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }

            let mut a = AttachedPolicies::new();
            for t in &items {
                a.append(gk.clone(), PolicyAtt::new(LabelPolicy::at(&format!("p{t}"), *t)));
            }
            let mut b = AttachedPolicies::new();
            for t in &shuffled {
                b.append(gk.clone(), PolicyAtt::new(LabelPolicy::at(&format!("p{t}"), *t)));
            }

            prop_assert_eq!(&a, &b);
            let created: Vec<_> = a.get(&gk).iter().map(|att| att.policy.creation_time()).collect();
            let mut sorted = created.clone();
            sorted.sort();
            prop_assert_eq!(created, sorted);
        }
    }
}
