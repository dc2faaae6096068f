//! Plugin contracts and the registry that dispatches to them.
//!
//! Two plugin families exist:
//!
//! - [`PolicyPlugin`]: interprets one policy type. For every gateway
//!   translation it hands out a fresh [`ProxyTranslationPass`] whose hooks
//!   mutate the listener, HCM, virtual host, route and route-backend being
//!   built, and it may shape clusters through [`PolicyPlugin::process_backend`]
//!   and [`PolicyPlugin::per_client_process_backend`].
//! - [`BackendPlugin`]: turns one backend type into a baseline cluster.
//!
//! Both are keyed by [`GroupKind`] in a [`PluginRegistry`] that is built once
//! at startup and shared read-only afterwards.

pub mod access_log;
pub mod backend_policy;
pub mod builtin;
pub mod static_backend;

use crate::config::TranslatorConfig;
use crate::errors::Result;
use crate::ir::{
    BackendObjectIr, FilterChainCommon, HttpBackend, HttpRouteRuleMatchIr, ListenerIr, ObjectSource,
    GroupKind, PolicyAtt, UniquelyConnectedClient,
};
use crate::xds::filters::{StagedHttpFilter, StagedNetworkFilter};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::{Route, VirtualHost};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpConnectionManager;
use envoy_types::pb::google::protobuf::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Group used by the policy and backend types shipped with gantry
pub const GANTRY_GROUP: &str = "gateway.gantry.dev";

/// Inputs shared by every pass of one gateway translation
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    pub gateway: &'a ObjectSource,
    pub config: &'a TranslatorConfig,
}

pub struct ListenerContext<'a> {
    pub policy: &'a PolicyAtt,
    pub listener: &'a ListenerIr,
}

pub struct HcmContext<'a> {
    pub policy: &'a PolicyAtt,
    pub listener: &'a ListenerIr,
    pub filter_chain: &'a FilterChainCommon,
}

pub struct VirtualHostContext<'a> {
    pub policy: &'a PolicyAtt,
    pub filter_chain: &'a FilterChainCommon,
}

pub struct RouteContext<'a> {
    pub policy: &'a PolicyAtt,
    pub filter_chain: &'a FilterChainCommon,
    pub rule: &'a HttpRouteRuleMatchIr,
}

pub struct RouteBackendContext<'a> {
    pub policy: &'a PolicyAtt,
    pub filter_chain: &'a FilterChainCommon,
    pub backend: &'a HttpBackend,
}

/// Per-filter config collected for one route or one weighted cluster.
///
/// Kept ordered while it is built; converted to the wire map only when the
/// route is emitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedFilterConfigMap(BTreeMap<String, Any>);

impl TypedFilterConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filter_name: impl Into<String>, config: Any) {
        self.0.insert(filter_name.into(), config);
    }

    pub fn get(&self, filter_name: &str) -> Option<&Any> {
        self.0.get(filter_name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Any)> {
        self.0.iter()
    }

    /// Merge into a wire map. Entries already present are overwritten.
    pub fn merge_into(self, target: &mut HashMap<String, Any>) {
        target.extend(self.0);
    }

    pub fn into_wire(self) -> HashMap<String, Any> {
        self.0.into_iter().collect()
    }
}

/// Extra resources a pass contributes to the shared gateway output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourcesToAdd {
    pub clusters: Vec<Cluster>,
}

/// Hooks a policy plugin runs during one gateway translation.
///
/// A pass is created per gateway translation and may keep state between
/// hooks, e.g. remember in `apply_for_route` that a filter is needed and emit
/// it from `http_filters`. Every hook defaults to a no-op.
#[allow(unused_variables)]
pub trait ProxyTranslationPass: Send {
    fn apply_listener_plugin(&mut self, ctx: &ListenerContext<'_>, out: &mut Listener) {}

    fn apply_hcm(&mut self, ctx: &HcmContext<'_>, out: &mut HttpConnectionManager) -> Result<()> {
        Ok(())
    }

    fn apply_vhost_plugin(&mut self, ctx: &VirtualHostContext<'_>, out: &mut VirtualHost) {}

    fn apply_for_route(&mut self, ctx: &RouteContext<'_>, out: &mut Route) -> Result<()> {
        Ok(())
    }

    fn apply_for_route_backend(
        &mut self,
        ctx: &RouteBackendContext<'_>,
        out: &mut TypedFilterConfigMap,
    ) -> Result<()> {
        Ok(())
    }

    fn http_filters(&mut self, filter_chain: &FilterChainCommon) -> Result<Vec<StagedHttpFilter>> {
        Ok(Vec::new())
    }

    fn upstream_http_filters(
        &mut self,
        filter_chain: &FilterChainCommon,
    ) -> Result<Vec<StagedHttpFilter>> {
        Ok(Vec::new())
    }

    fn network_filters(
        &mut self,
        filter_chain: &FilterChainCommon,
    ) -> Result<Vec<StagedNetworkFilter>> {
        Ok(Vec::new())
    }

    fn resources_to_add(&mut self) -> ResourcesToAdd {
        ResourcesToAdd::default()
    }
}

/// A pass that does nothing, for plugins that only shape clusters.
#[derive(Debug, Default)]
pub struct NoopPass;

impl ProxyTranslationPass for NoopPass {}

/// Interprets one policy type.
#[allow(unused_variables)]
pub trait PolicyPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn new_gateway_translation_pass(&self, ctx: PassContext<'_>) -> Box<dyn ProxyTranslationPass> {
        Box::new(NoopPass)
    }

    /// Runs for every (client, backend) pair whether or not a policy of this
    /// type is attached to the backend.
    fn per_client_process_backend(
        &self,
        client: &UniquelyConnectedClient,
        backend: &BackendObjectIr,
        out: &mut Cluster,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs once per policy of this type attached to the backend.
    fn process_backend(
        &self,
        policy: &PolicyAtt,
        backend: &BackendObjectIr,
        out: &mut Cluster,
    ) -> Result<()> {
        Ok(())
    }
}

/// Turns one backend type into a cluster.
pub trait BackendPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Set discovery type, transport socket and load assignment.
    fn init_backend(&self, backend: &BackendObjectIr, out: &mut Cluster) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct PluginRegistry {
    policy_plugins: BTreeMap<GroupKind, Arc<dyn PolicyPlugin>>,
    backend_plugins: BTreeMap<GroupKind, Arc<dyn BackendPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every plugin shipped with gantry.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_policy(builtin::route_filters_group_kind(), Arc::new(builtin::RouteFiltersPlugin));
        registry.register_policy(
            builtin::backend_filters_group_kind(),
            Arc::new(builtin::BackendFiltersPlugin),
        );
        registry.register_policy(access_log::group_kind(), Arc::new(access_log::AccessLogPlugin));
        registry.register_policy(
            backend_policy::group_kind(),
            Arc::new(backend_policy::BackendPolicyPlugin),
        );
        registry.register_backend(
            static_backend::static_group_kind(),
            Arc::new(static_backend::StaticBackendPlugin),
        );
        registry.register_backend(
            static_backend::service_group_kind(),
            Arc::new(static_backend::ServiceBackendPlugin),
        );
        registry
    }

    pub fn register_policy(&mut self, group_kind: GroupKind, plugin: Arc<dyn PolicyPlugin>) {
        debug!(group_kind = %group_kind, plugin = plugin.name(), "Registered policy plugin");
        self.policy_plugins.insert(group_kind, plugin);
    }

    pub fn register_backend(&mut self, group_kind: GroupKind, plugin: Arc<dyn BackendPlugin>) {
        debug!(group_kind = %group_kind, plugin = plugin.name(), "Registered backend plugin");
        self.backend_plugins.insert(group_kind, plugin);
    }

    pub fn policy_plugin(&self, group_kind: &GroupKind) -> Option<&Arc<dyn PolicyPlugin>> {
        self.policy_plugins.get(group_kind)
    }

    pub fn backend_plugin(&self, group_kind: &GroupKind) -> Option<&Arc<dyn BackendPlugin>> {
        self.backend_plugins.get(group_kind)
    }

    /// Policy plugins in `GroupKind` order
    pub fn policy_plugins(&self) -> impl Iterator<Item = (&GroupKind, &Arc<dyn PolicyPlugin>)> {
        self.policy_plugins.iter()
    }

    /// One fresh pass per policy plugin, in `GroupKind` order.
    pub fn new_passes(&self, ctx: PassContext<'_>) -> BTreeMap<GroupKind, Box<dyn ProxyTranslationPass>> {
        self.policy_plugins
            .iter()
            .map(|(gk, plugin)| (gk.clone(), plugin.new_gateway_translation_pass(ctx)))
            .collect()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("policy_plugins", &self.policy_plugins.keys().collect::<Vec<_>>())
            .field("backend_plugins", &self.backend_plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Downcast a policy attachment or fail with a plugin error naming the expected type.
pub(crate) fn expect_policy<'a, T: crate::ir::PolicyIr + 'static>(
    plugin: &str,
    policy: &'a PolicyAtt,
) -> Result<&'a T> {
    policy.policy_as::<T>().ok_or_else(|| {
        crate::Error::plugin(
            plugin,
            format!("unexpected policy payload, expected {}", std::any::type_name::<T>()),
        )
    })
}
