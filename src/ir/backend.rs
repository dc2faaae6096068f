//! Backend objects: the IR that becomes one cluster per (client, backend).

use super::policy::AttachedPolicies;
use super::source::{GroupKind, ObjectSource};
use crate::utils::sanitize_for_envoy;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Plugin-supplied backend payload. The core never inspects it beyond equality.
pub trait BackendPayload: Debug + Send + Sync {
    fn equals(&self, other: &dyn BackendPayload) -> bool;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone)]
pub struct BackendObjectIr {
    pub source: ObjectSource,
    pub port: u32,
    pub payload: Option<Arc<dyn BackendPayload>>,
    pub attached_policies: AttachedPolicies,
    pub creation_time: DateTime<Utc>,
}

impl BackendObjectIr {
    pub fn new(source: ObjectSource, port: u32) -> Self {
        Self {
            source,
            port,
            payload: None,
            attached_policies: AttachedPolicies::default(),
            creation_time: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: Arc<dyn BackendPayload>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_policies(mut self, policies: AttachedPolicies) -> Self {
        self.attached_policies = policies;
        self
    }

    pub fn group_kind(&self) -> GroupKind {
        self.source.group_kind()
    }

    /// `{kind_prefix}_{namespace}_{name}_{port}`, sanitized for Envoy stats.
    ///
    /// The kind prefix is the lowercased kind for core objects and
    /// `{group}_{kind}` otherwise, so two groups sharing a kind never collide.
    pub fn cluster_name(&self) -> String {
        let kind_prefix = if self.source.group.is_empty() {
            self.source.kind.to_lowercase()
        } else {
            format!("{}_{}", self.source.group, self.source.kind)
        };
        sanitize_for_envoy(&format!(
            "{}_{}_{}_{}",
            kind_prefix, self.source.namespace, self.source.name, self.port
        ))
    }

    pub fn payload_as<T: BackendPayload + 'static>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.as_any().downcast_ref::<T>())
    }

    pub fn resource_name(&self) -> String {
        format!("{}:{}", self.source.resource_name(), self.port)
    }
}

impl PartialEq for BackendObjectIr {
    fn eq(&self, other: &Self) -> bool {
        let payload_eq = match (&self.payload, &other.payload) {
            (Some(a), Some(b)) => a.equals(b.as_ref()),
            (None, None) => true,
            _ => false,
        };
        self.source == other.source
            && self.port == other.port
            && payload_eq
            && self.attached_policies == other.attached_policies
    }
}
