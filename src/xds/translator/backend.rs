//! Per-client cluster translation.

use crate::config::TranslatorConfig;
use crate::errors::{GantryError, Result};
use crate::ir::{BackendObjectIr, UniquelyConnectedClient};
use crate::observability::MetricsRecorder;
use crate::xds::plugins::backend_policy::millis_to_duration;
use crate::xds::plugins::PluginRegistry;
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::Metadata;
use std::sync::Arc;
use tracing::debug;

/// Builds the cluster one client sees for one backend.
///
/// Stateless apart from the shared registry, so one instance is cloned into
/// every worker of the per-client fan-out.
#[derive(Debug, Clone)]
pub struct BackendTranslator {
    registry: Arc<PluginRegistry>,
    config: TranslatorConfig,
    metrics: MetricsRecorder,
}

impl BackendTranslator {
    pub fn new(registry: Arc<PluginRegistry>, config: TranslatorConfig) -> Self {
        Self { registry, config, metrics: MetricsRecorder::new() }
    }

    /// Translate `backend` for `client`.
    ///
    /// The type plugin initializes the cluster, then every policy plugin in
    /// policy type order runs its per-client hook followed by its hook for
    /// each policy of that type attached to the backend.
    pub fn translate_backend(
        &self,
        client: &UniquelyConnectedClient,
        backend: &BackendObjectIr,
    ) -> Result<Cluster> {
        let span = crate::translation_span!(
            "backend",
            backend.resource_name(),
            client = %client.resource_name()
        );
        let _guard = span.enter();

        let result = self.build_cluster(client, backend);
        self.metrics.record_cluster_translation(result.is_ok());
        result
    }

    fn build_cluster(&self, client: &UniquelyConnectedClient, backend: &BackendObjectIr) -> Result<Cluster> {
        let group_kind = backend.group_kind();
        let plugin = self.registry.backend_plugin(&group_kind).ok_or_else(|| {
            GantryError::no_backend_translator(group_kind.group.as_str(), group_kind.kind.as_str())
        })?;

        let mut cluster = Cluster {
            name: backend.cluster_name(),
            connect_timeout: Some(millis_to_duration(self.config.default_connect_timeout_ms)),
            metadata: Some(Metadata::default()),
            ..Default::default()
        };

        plugin.init_backend(backend, &mut cluster)?;

        for (policy_gk, policy_plugin) in self.registry.policy_plugins() {
            policy_plugin.per_client_process_backend(client, backend, &mut cluster)?;
            for attachment in backend.attached_policies.get(policy_gk) {
                policy_plugin.process_backend(attachment, backend, &mut cluster)?;
            }
        }

        debug!(cluster = %cluster.name, plugin = plugin.name(), "Translated backend");
        Ok(cluster)
    }
}
