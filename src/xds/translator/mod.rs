//! Gateway IR to Envoy resources.
//!
//! [`GatewayTranslator`] walks one gateway tree and produces the shared
//! listeners and route configurations. [`BackendTranslator`] and
//! [`endpoints::prioritize`] produce the per-client clusters and load
//! assignments.
//!
//! Translation never fails as a whole: problems are written to a
//! [`ReportMap`] and the offending route or filter chain is dropped.

pub mod backend;
pub mod endpoints;
mod filter_chain;
mod listener;
pub mod route;

pub use backend::BackendTranslator;
pub use endpoints::prioritize;

use crate::config::TranslatorConfig;
use crate::errors::{GantryError, Result};
use crate::ir::{AttachedPolicies, GatewayIr, GroupKind, PolicyAtt};
use crate::observability::MetricsRecorder;
use crate::xds::plugins::{PassContext, PluginRegistry, ProxyTranslationPass};
use crate::xds::reports::ReportMap;
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Output of one gateway translation, shared by every connected client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayTranslation {
    pub listeners: Vec<Listener>,
    pub routes: Vec<RouteConfiguration>,
    /// Clusters contributed by plugins through `resources_to_add`
    pub extra_clusters: Vec<Cluster>,
}

#[derive(Debug, Clone)]
pub struct GatewayTranslator {
    registry: Arc<PluginRegistry>,
    config: TranslatorConfig,
    metrics: MetricsRecorder,
}

impl GatewayTranslator {
    pub fn new(registry: Arc<PluginRegistry>, config: TranslatorConfig) -> Self {
        Self { registry, config, metrics: MetricsRecorder::new() }
    }

    pub fn translate_gateway(&self, gateway: &GatewayIr, reports: &mut ReportMap) -> GatewayTranslation {
        let gateway_name = gateway.resource_name();
        let span = crate::translation_span!("gateway", gateway_name);
        let _guard = span.enter();
        let started = Instant::now();

        let ctx = PassContext { gateway: &gateway.source, config: &self.config };
        let mut state = TranslationState {
            gateway,
            passes: Passes::new(self.registry.new_passes(ctx)),
            reports,
            metrics: &self.metrics,
            route_config_names: BTreeSet::new(),
        };

        let mut out = GatewayTranslation::default();
        for listener in &gateway.listeners {
            let translated = listener::translate_listener(&mut state, listener);
            out.routes.extend(translated.routes);
            out.listeners.push(translated.listener);
        }

        for pass in state.passes.all() {
            out.extra_clusters.extend(pass.resources_to_add().clusters);
        }

        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.record_gateway_translation(&gateway_name, elapsed, out.listeners.len());
        info!(
            gateway = %gateway_name,
            listeners = out.listeners.len(),
            routes = out.routes.len(),
            extra_clusters = out.extra_clusters.len(),
            "Translated gateway"
        );
        out
    }
}

/// State threaded through one gateway translation.
pub(crate) struct TranslationState<'a> {
    pub gateway: &'a GatewayIr,
    pub passes: Passes,
    pub reports: &'a mut ReportMap,
    pub metrics: &'a MetricsRecorder,
    /// Route configuration names already emitted, one per HTTP chain
    pub route_config_names: BTreeSet<String>,
}

/// The passes of one gateway translation, keyed by the policy type they handle.
pub(crate) struct Passes {
    passes: BTreeMap<GroupKind, Box<dyn ProxyTranslationPass>>,
}

impl Passes {
    pub fn new(passes: BTreeMap<GroupKind, Box<dyn ProxyTranslationPass>>) -> Self {
        Self { passes }
    }

    /// Run `hook` once per attached policy. Policy types without a plugin are skipped.
    pub fn for_each_policy(
        &mut self,
        policies: &AttachedPolicies,
        mut hook: impl FnMut(&mut dyn ProxyTranslationPass, &PolicyAtt),
    ) {
        for (group_kind, attachments) in policies.iter() {
            let Some(pass) = self.passes.get_mut(group_kind) else {
                debug!(group_kind = %group_kind, "No plugin for attached policy type, skipping");
                continue;
            };
            for attachment in attachments {
                hook(pass.as_mut(), attachment);
            }
        }
    }

    /// Like [`for_each_policy`](Self::for_each_policy), collecting every hook error.
    pub fn try_for_each_policy(
        &mut self,
        policies: &AttachedPolicies,
        mut hook: impl FnMut(&mut dyn ProxyTranslationPass, &PolicyAtt) -> Result<()>,
    ) -> Vec<GantryError> {
        let mut errors = Vec::new();
        self.for_each_policy(policies, |pass, policy| {
            if let Err(e) = hook(pass, policy) {
                errors.push(e);
            }
        });
        errors
    }

    /// Every pass, in policy type order.
    pub fn all(&mut self) -> impl Iterator<Item = &mut Box<dyn ProxyTranslationPass>> + '_ {
        self.passes.values_mut()
    }
}
