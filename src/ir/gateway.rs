//! The gateway tree: gateway → listeners → filter chains → virtual hosts →
//! route rule matches → backends. Every level carries its own policies;
//! translation accumulates them top-down and never replaces a parent's set.

use super::backend::BackendObjectIr;
use super::policy::AttachedPolicies;
use super::source::ObjectSource;
use crate::xds::filters::FilterStage;
use envoy_types::pb::google::protobuf::Any;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayIr {
    pub source: ObjectSource,
    pub listeners: Vec<ListenerIr>,
    /// Applied to every listener of this gateway
    pub attached_listener_policies: AttachedPolicies,
    /// Applied to every HCM and virtual host of this gateway
    pub attached_http_policies: AttachedPolicies,
}

impl GatewayIr {
    pub fn new(source: ObjectSource) -> Self {
        Self {
            source,
            listeners: Vec::new(),
            attached_listener_policies: AttachedPolicies::default(),
            attached_http_policies: AttachedPolicies::default(),
        }
    }

    pub fn resource_name(&self) -> String {
        self.source.resource_name()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerIr {
    pub name: String,
    pub bind_address: String,
    pub bind_port: u32,
    pub attached_policies: AttachedPolicies,
    pub http_filter_chains: Vec<HttpFilterChainIr>,
    pub tcp_filter_chains: Vec<TcpIr>,
}

impl ListenerIr {
    pub fn new(name: impl Into<String>, bind_address: impl Into<String>, bind_port: u32) -> Self {
        Self {
            name: name.into(),
            bind_address: bind_address.into(),
            bind_port,
            attached_policies: AttachedPolicies::default(),
            http_filter_chains: Vec::new(),
            tcp_filter_chains: Vec::new(),
        }
    }

    /// Whether any chain on this listener matches on SNI
    pub fn has_sni_match(&self) -> bool {
        self.http_filter_chains.iter().any(|fc| !fc.common.matcher.sni_domains.is_empty())
            || self.tcp_filter_chains.iter().any(|fc| !fc.common.matcher.sni_domains.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterChainMatch {
    #[serde(default)]
    pub sni_domains: Vec<String>,
}

/// Inline downstream TLS material
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsBundle {
    #[serde(default)]
    pub ca: Vec<u8>,
    pub private_key: Vec<u8>,
    pub cert_chain: Vec<u8>,
    #[serde(default)]
    pub alpn_protocols: Vec<String>,
}

/// A user-supplied network filter placed before the terminal filter.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomNetworkFilter {
    pub name: String,
    pub config: Option<Any>,
    pub stage: FilterStage,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChainCommon {
    pub filter_chain_name: String,
    pub matcher: FilterChainMatch,
    pub tls: Option<TlsBundle>,
    pub custom_network_filters: Vec<CustomNetworkFilter>,
}

impl FilterChainCommon {
    pub fn named(name: impl Into<String>) -> Self {
        Self { filter_chain_name: name.into(), ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpFilterChainIr {
    pub common: FilterChainCommon,
    pub attached_policies: AttachedPolicies,
    pub virtual_hosts: Vec<VirtualHostIr>,
}

impl HttpFilterChainIr {
    pub fn new(common: FilterChainCommon) -> Self {
        Self { common, attached_policies: AttachedPolicies::default(), virtual_hosts: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TcpIr {
    pub common: FilterChainCommon,
    pub backend_refs: Vec<BackendRefIr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualHostIr {
    pub name: String,
    pub hostname: String,
    pub rules: Vec<HttpRouteRuleMatchIr>,
}

/// The route object owning a set of rules, with its own policies.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRouteIr {
    pub source: ObjectSource,
    pub attached_policies: AttachedPolicies,
}

impl HttpRouteIr {
    pub fn new(source: ObjectSource) -> Self {
        Self { source, attached_policies: AttachedPolicies::default() }
    }
}

/// One match of one route rule; becomes exactly one Envoy route.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRouteRuleMatchIr {
    pub parent: Arc<HttpRouteIr>,
    pub attached_policies: AttachedPolicies,
    pub extension_refs: AttachedPolicies,
    pub delegate_parent: Option<Arc<HttpRouteIr>>,
    pub has_children: bool,
    pub name: String,
    pub match_index: usize,
    pub matcher: RouteMatcher,
    pub backends: Vec<HttpBackend>,
}

impl HttpRouteRuleMatchIr {
    pub fn new(parent: Arc<HttpRouteIr>, matcher: RouteMatcher) -> Self {
        Self {
            parent,
            attached_policies: AttachedPolicies::default(),
            extension_refs: AttachedPolicies::default(),
            delegate_parent: None,
            has_children: false,
            name: String::new(),
            match_index: 0,
            matcher,
            backends: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Exact,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMatch {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, rename = "type")]
    pub match_type: MatchType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParamMatch {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, rename = "type")]
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatcher {
    #[serde(default)]
    pub path: Option<PathMatch>,
    #[serde(default)]
    pub headers: Vec<HeaderMatch>,
    #[serde(default)]
    pub query_params: Vec<QueryParamMatch>,
    #[serde(default)]
    pub method: Option<String>,
}

impl RouteMatcher {
    pub fn prefix(path: impl Into<String>) -> Self {
        Self { path: Some(PathMatch::Prefix(path.into())), ..Default::default() }
    }
}

/// A weighted reference to a resolved cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRefIr {
    pub cluster_name: String,
    pub weight: u32,
    pub backend: Option<Arc<BackendObjectIr>>,
}

impl BackendRefIr {
    pub fn to_backend(backend: Arc<BackendObjectIr>, weight: u32) -> Self {
        Self { cluster_name: backend.cluster_name(), weight, backend: Some(backend) }
    }

    pub fn to_cluster(cluster_name: impl Into<String>, weight: u32) -> Self {
        Self { cluster_name: cluster_name.into(), weight, backend: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpBackend {
    pub backend: BackendRefIr,
    pub attached_policies: AttachedPolicies,
}

impl HttpBackend {
    pub fn new(backend: BackendRefIr) -> Self {
        Self { backend, attached_policies: AttachedPolicies::default() }
    }
}
