//! `gantry translate`: run one gateway document through the syncer.

use crate::config::AppConfig;
use crate::errors::{GantryError, Result};
use crate::ir::{GatewayDocument, Locality, UniquelyConnectedClient};
use crate::syncer::{LoggingStatusWriter, ProxySyncer};
use crate::xds::{gateway_role, PluginRegistry, ReportMap, SnapshotSummary};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Identity of the proxy the snapshot is built for. Empty role and namespace
/// default to the gateway's.
#[derive(Debug, Clone, Default)]
pub struct ClientArgs {
    pub role: Option<String>,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub locality: Locality,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslateOutput {
    pub snapshot: SnapshotSummary,
    pub reports: ReportMap,
}

/// Parse a `key=value` label.
pub fn parse_label(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid label '{}', expected key=value", raw)),
    }
}

pub async fn translate_document(
    document: GatewayDocument,
    client: ClientArgs,
    config: &AppConfig,
) -> Result<TranslateOutput> {
    let ir = document.into_ir()?;
    let gateway_source = ir.gateway.source.clone();

    let syncer = ProxySyncer::new(
        Arc::new(PluginRegistry::with_builtins()),
        config,
        Arc::new(LoggingStatusWriter),
    );

    syncer.upsert_gateway(ir.gateway).await;
    for backend in ir.backends {
        syncer.upsert_backend(backend).await;
    }
    for endpoints in ir.endpoints {
        syncer.upsert_endpoints(endpoints).await;
    }

    let client = UniquelyConnectedClient::new(
        client.role.unwrap_or_else(|| gateway_role(&gateway_source)),
        client.namespace.unwrap_or_else(|| gateway_source.namespace.clone()),
        client.labels,
        client.locality,
    );
    let client_key = client.resource_name().to_string();
    syncer.client_connected(client).await;

    let snapshot = syncer.snapshot(&client_key).ok_or_else(|| {
        GantryError::validation_field(
            format!("no gateway serves client '{}'", client_key),
            "client_role",
        )
    })?;
    let reports = syncer.reports().await;
    info!(
        client = %client_key,
        clusters = snapshot.clusters.len(),
        errored = snapshot.errored_clusters.len(),
        "Translated document"
    );

    let output = TranslateOutput { snapshot: snapshot.summary(), reports };
    syncer.shutdown().await;
    Ok(output)
}
