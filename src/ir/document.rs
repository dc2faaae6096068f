//! YAML gateway documents.
//!
//! A [`GatewayDocument`] describes one gateway with its routes, backends and
//! discovered endpoints in a single file, using the built-in policy and
//! backend types. [`GatewayDocument::into_ir`] resolves it into IR.

use super::backend::BackendObjectIr;
use super::client::Locality;
use super::endpoints::{EndpointWithMd, EndpointsForBackend};
use super::gateway::{
    BackendRefIr, FilterChainCommon, FilterChainMatch, GatewayIr, HttpBackend, HttpFilterChainIr,
    HttpRouteIr, HttpRouteRuleMatchIr, ListenerIr, RouteMatcher, TcpIr, TlsBundle, VirtualHostIr,
};
use super::policy::AttachedPolicies;
use super::source::ObjectSource;
use crate::errors::{GantryError, Result};
use crate::xds::plugins::access_log::{self, AccessLogPolicy};
use crate::xds::plugins::backend_policy::{self, BackendConfigPolicy};
use crate::xds::plugins::builtin::{self, BackendFiltersPolicy, RouteFiltersPolicy};
use crate::xds::plugins::static_backend::{self, StaticBackend};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

pub const GATEWAY_GROUP: &str = "gateway.networking.k8s.io";

fn default_namespace() -> String {
    "default".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_service_kind() -> String {
    "Service".to_string()
}

fn default_weight() -> u32 {
    1
}

/// Built-in policies attachable at any level. Levels ignore the policy types
/// they have no hook for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySet {
    #[serde(default)]
    pub access_log: Option<AccessLogPolicy>,
    #[serde(default)]
    pub route_filters: Option<RouteFiltersPolicy>,
    #[serde(default)]
    pub backend_filters: Option<BackendFiltersPolicy>,
    #[serde(default)]
    pub backend_config: Option<BackendConfigPolicy>,
}

impl PolicySet {
    pub fn to_attached(&self) -> AttachedPolicies {
        let mut attached = AttachedPolicies::new();
        if let Some(policy) = &self.access_log {
            attached = attached.with(access_log::group_kind(), Arc::new(policy.clone()));
        }
        if let Some(policy) = &self.route_filters {
            attached = attached.with(builtin::route_filters_group_kind(), Arc::new(policy.clone()));
        }
        if let Some(policy) = &self.backend_filters {
            attached = attached.with(builtin::backend_filters_group_kind(), Arc::new(policy.clone()));
        }
        if let Some(policy) = &self.backend_config {
            attached = attached.with(backend_policy::group_kind(), Arc::new(policy.clone()));
        }
        attached
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayDocument {
    pub gateway: GatewaySpec,
    #[serde(default)]
    pub backends: Vec<BackendSpec>,
    #[serde(default)]
    pub endpoints: Vec<EndpointsSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySpec {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Applied to every listener
    #[serde(default)]
    pub listener_policies: PolicySet,
    /// Applied to every HCM and virtual host
    #[serde(default)]
    pub http_policies: PolicySet,
    #[serde(default)]
    pub listeners: Vec<ListenerSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerSpec {
    pub name: String,
    #[serde(default = "default_bind_address")]
    pub address: String,
    pub port: u32,
    #[serde(default)]
    pub policies: PolicySet,
    #[serde(default)]
    pub http: Vec<HttpChainSpec>,
    #[serde(default)]
    pub tcp: Vec<TcpChainSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSpec {
    pub cert_chain: String,
    pub private_key: String,
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub alpn_protocols: Vec<String>,
}

impl TlsSpec {
    fn to_bundle(&self) -> TlsBundle {
        TlsBundle {
            ca: self.ca.clone().unwrap_or_default().into_bytes(),
            private_key: self.private_key.clone().into_bytes(),
            cert_chain: self.cert_chain.clone().into_bytes(),
            alpn_protocols: self.alpn_protocols.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpChainSpec {
    pub name: String,
    #[serde(default)]
    pub sni_domains: Vec<String>,
    #[serde(default)]
    pub tls: Option<TlsSpec>,
    #[serde(default)]
    pub policies: PolicySet,
    #[serde(default)]
    pub virtual_hosts: Vec<VirtualHostSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpChainSpec {
    pub name: String,
    #[serde(default)]
    pub sni_domains: Vec<String>,
    #[serde(default)]
    pub tls: Option<TlsSpec>,
    #[serde(default)]
    pub backends: Vec<BackendRefSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualHostSpec {
    pub name: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

/// A route object: its own policies plus its rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub policies: PolicySet,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(default)]
    pub name: String,
    /// Empty means a single `/` prefix match
    #[serde(default)]
    pub matches: Vec<RouteMatcher>,
    #[serde(default)]
    pub policies: PolicySet,
    #[serde(default)]
    pub backends: Vec<BackendRefSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRefSpec {
    #[serde(default)]
    pub group: String,
    #[serde(default = "default_service_kind")]
    pub kind: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    pub port: u32,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub policies: PolicySet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    #[serde(default)]
    pub group: String,
    #[serde(default = "default_service_kind")]
    pub kind: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub port: u32,
    #[serde(default, rename = "static")]
    pub static_backend: Option<StaticBackend>,
    #[serde(default)]
    pub policies: PolicySet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointsSpec {
    pub backend: BackendRefSpec,
    #[serde(default)]
    pub localities: Vec<LocalityEndpointsSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalityEndpointsSpec {
    #[serde(flatten)]
    pub locality: Locality,
    #[serde(default)]
    pub endpoints: Vec<EndpointWithMd>,
}

/// IR resolved from one document.
#[derive(Debug, Clone)]
pub struct DocumentIr {
    pub gateway: GatewayIr,
    pub backends: Vec<BackendObjectIr>,
    pub endpoints: Vec<EndpointsForBackend>,
}

impl GatewayDocument {
    pub fn from_yaml(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).map_err(|e| GantryError::Serialization {
            context: "Failed to parse gateway document".to_string(),
            source: e,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path).map_err(|e| GantryError::Io {
            context: format!("Failed to read {}", path.display()),
            source: e,
        })?;
        Self::from_yaml(&input)
    }

    /// Resolve into IR. Backend references resolve against the declared
    /// backends; an undeclared reference still yields its cluster name.
    pub fn into_ir(self) -> Result<DocumentIr> {
        let namespace = self.gateway.namespace.clone();

        let backends = self
            .backends
            .iter()
            .map(|spec| spec.to_ir())
            .collect::<Result<Vec<_>>>()?;

        let resolve = |spec: &BackendRefSpec| -> BackendObjectIr {
            let source = spec.source(&namespace);
            backends
                .iter()
                .find(|b| b.source == source && b.port == spec.port)
                .cloned()
                .unwrap_or_else(|| BackendObjectIr::new(source, spec.port))
        };

        let mut gateway = GatewayIr::new(ObjectSource::new(
            GATEWAY_GROUP,
            "Gateway",
            namespace.as_str(),
            self.gateway.name.as_str(),
        ));
        gateway.attached_listener_policies = self.gateway.listener_policies.to_attached();
        gateway.attached_http_policies = self.gateway.http_policies.to_attached();

        // HTTP chain names double as route configuration names
        let mut http_chain_names = BTreeSet::new();
        for listener_spec in &self.gateway.listeners {
            let mut listener =
                ListenerIr::new(listener_spec.name.as_str(), listener_spec.address.as_str(), listener_spec.port);
            listener.attached_policies = listener_spec.policies.to_attached();

            for chain_spec in &listener_spec.http {
                if !http_chain_names.insert(chain_spec.name.as_str()) {
                    return Err(GantryError::validation_field(
                        format!(
                            "HTTP filter chain name '{}' is used more than once (listener '{}')",
                            chain_spec.name, listener_spec.name
                        ),
                        "gateway.listeners.http.name",
                    ));
                }
                let mut chain = HttpFilterChainIr::new(common(
                    &chain_spec.name,
                    &chain_spec.sni_domains,
                    chain_spec.tls.as_ref(),
                ));
                chain.attached_policies = chain_spec.policies.to_attached();
                for vhost_spec in &chain_spec.virtual_hosts {
                    chain.virtual_hosts.push(virtual_host(vhost_spec, &namespace, &resolve));
                }
                listener.http_filter_chains.push(chain);
            }

            for chain_spec in &listener_spec.tcp {
                if chain_spec.backends.is_empty() {
                    return Err(GantryError::validation_field(
                        format!("TCP filter chain '{}' has no backends", chain_spec.name),
                        "gateway.listeners.tcp.backends",
                    ));
                }
                listener.tcp_filter_chains.push(TcpIr {
                    common: common(&chain_spec.name, &chain_spec.sni_domains, chain_spec.tls.as_ref()),
                    backend_refs: chain_spec
                        .backends
                        .iter()
                        .map(|b| BackendRefIr::to_backend(Arc::new(resolve(b)), b.weight))
                        .collect(),
                });
            }

            gateway.listeners.push(listener);
        }

        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        for spec in &self.endpoints {
            let source = spec.backend.source(&namespace);
            let backend = backends
                .iter()
                .find(|b| b.source == source && b.port == spec.backend.port)
                .ok_or_else(|| {
                    GantryError::validation_field(
                        format!(
                            "endpoints reference undeclared backend {}:{}",
                            source.resource_name(),
                            spec.backend.port
                        ),
                        "endpoints.backend",
                    )
                })?;
            let mut eps = EndpointsForBackend::new(backend);
            for locality in &spec.localities {
                for endpoint in &locality.endpoints {
                    eps.add(locality.locality.clone(), endpoint.clone());
                }
            }
            endpoints.push(eps);
        }

        Ok(DocumentIr { gateway, backends, endpoints })
    }
}

impl BackendRefSpec {
    fn source(&self, default_namespace: &str) -> ObjectSource {
        ObjectSource::new(
            self.group.as_str(),
            self.kind.as_str(),
            self.namespace.as_deref().unwrap_or(default_namespace),
            self.name.as_str(),
        )
    }
}

impl BackendSpec {
    fn to_ir(&self) -> Result<BackendObjectIr> {
        let source = ObjectSource::new(
            self.group.as_str(),
            self.kind.as_str(),
            self.namespace.as_str(),
            self.name.as_str(),
        );
        let mut backend =
            BackendObjectIr::new(source, self.port).with_policies(self.policies.to_attached());

        if backend.group_kind() == static_backend::static_group_kind() {
            let payload = self.static_backend.clone().ok_or_else(|| {
                GantryError::validation_field(
                    format!("static backend '{}' has no hosts", self.name),
                    "backends.static",
                )
            })?;
            backend = backend.with_payload(Arc::new(payload));
        }
        Ok(backend)
    }
}

fn common(name: &str, sni_domains: &[String], tls: Option<&TlsSpec>) -> FilterChainCommon {
    FilterChainCommon {
        filter_chain_name: name.to_string(),
        matcher: FilterChainMatch { sni_domains: sni_domains.to_vec() },
        tls: tls.map(TlsSpec::to_bundle),
        custom_network_filters: Vec::new(),
    }
}

fn virtual_host(
    spec: &VirtualHostSpec,
    namespace: &str,
    resolve: &dyn Fn(&BackendRefSpec) -> BackendObjectIr,
) -> VirtualHostIr {
    let mut rules = Vec::new();
    for route_spec in &spec.routes {
        let mut parent = HttpRouteIr::new(ObjectSource::new(
            GATEWAY_GROUP,
            "HTTPRoute",
            route_spec.namespace.as_deref().unwrap_or(namespace),
            route_spec.name.as_str(),
        ));
        parent.attached_policies = route_spec.policies.to_attached();
        let parent = Arc::new(parent);

        for rule_spec in &route_spec.rules {
            let matches = if rule_spec.matches.is_empty() {
                vec![RouteMatcher::prefix("/")]
            } else {
                rule_spec.matches.clone()
            };
            let backends: Vec<HttpBackend> = rule_spec
                .backends
                .iter()
                .map(|b| {
                    let mut backend =
                        HttpBackend::new(BackendRefIr::to_backend(Arc::new(resolve(b)), b.weight));
                    backend.attached_policies = b.policies.to_attached();
                    backend
                })
                .collect();

            for (match_index, matcher) in matches.into_iter().enumerate() {
                let mut rule = HttpRouteRuleMatchIr::new(Arc::clone(&parent), matcher);
                rule.name = rule_spec.name.clone();
                rule.match_index = match_index;
                rule.attached_policies = rule_spec.policies.to_attached();
                rule.backends = backends.clone();
                rules.push(rule);
            }
        }
    }

    VirtualHostIr { name: spec.name.clone(), hostname: spec.hostname.clone(), rules }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::PathMatch;

    const DOCUMENT: &str = r#"
gateway:
  name: edge
  http_policies:
    access_log:
      access_logs:
        - file_sink:
            path: /dev/stdout
  listeners:
    - name: http
      port: 8080
      http:
        - name: http
          virtual_hosts:
            - name: echo
              hostname: echo.example.com
              routes:
                - name: echo
                  rules:
                    - name: api
                      matches:
                        - path: { type: prefix, value: /api }
                        - path: { type: exact, value: /health }
                      backends:
                        - name: echo
                          port: 8080
                          policies:
                            backend_filters:
                              request_header_modifier:
                                set:
                                  - { name: x-backend, value: echo }
backends:
  - name: echo
    port: 8080
    policies:
      backend_config:
        connect_timeout_ms: 250
  - kind: StaticBackend
    group: gateway.gantry.dev
    name: legacy
    port: 443
    static:
      hosts:
        - { host: legacy.internal, port: 443 }
endpoints:
  - backend: { name: echo, port: 8080 }
    localities:
      - region: us-east
        zone: 1a
        endpoints:
          - { address: 10.0.0.1, port: 8080 }
"#;

    #[test]
    fn resolves_document_into_ir() {
        let ir = GatewayDocument::from_yaml(DOCUMENT).unwrap().into_ir().unwrap();

        assert_eq!(ir.gateway.source.resource_name(), "gateway.networking.k8s.io/Gateway/default/edge");
        assert_eq!(ir.gateway.attached_http_policies.len(), 1);

        let vhost = &ir.gateway.listeners[0].http_filter_chains[0].virtual_hosts[0];
        assert_eq!(vhost.rules.len(), 2);
        assert_eq!(vhost.rules[1].match_index, 1);
        assert_eq!(vhost.rules[1].matcher.path, Some(PathMatch::Exact("/health".into())));
        let backend = &vhost.rules[0].backends[0];
        assert_eq!(backend.backend.cluster_name, "service_default_echo_8080");
        assert_eq!(backend.attached_policies.len(), 1);
        // Resolved against the declared backend, policies included
        assert_eq!(backend.backend.backend.as_ref().unwrap().attached_policies.len(), 1);

        assert_eq!(ir.backends.len(), 2);
        assert!(ir.backends[1].payload_as::<StaticBackend>().is_some());
        assert_eq!(ir.endpoints[0].endpoint_count(), 1);
    }

    #[test]
    fn static_backend_needs_hosts() {
        let doc = GatewayDocument::from_yaml(
            "gateway: { name: edge }\nbackends:\n  - { kind: StaticBackend, group: gateway.gantry.dev, name: legacy }\n",
        )
        .unwrap();
        assert!(matches!(doc.into_ir(), Err(GantryError::Validation { .. })));
    }

    #[test]
    fn endpoints_must_reference_declared_backend() {
        let doc = GatewayDocument::from_yaml(
            "gateway: { name: edge }\nendpoints:\n  - backend: { name: ghost, port: 80 }\n",
        )
        .unwrap();
        let err = doc.into_ir().unwrap_err();
        assert!(err.to_string().contains("undeclared backend"));
    }

    #[test]
    fn http_chain_names_are_unique_across_listeners() {
        let doc = GatewayDocument::from_yaml(
            r#"
gateway:
  name: edge
  listeners:
    - name: plain
      port: 8080
      http:
        - name: web
    - name: alt
      port: 8081
      http:
        - name: web
"#,
        )
        .unwrap();
        let err = doc.into_ir().unwrap_err();
        assert!(matches!(err, GantryError::Validation { .. }));
        assert!(err.to_string().contains("'web' is used more than once"));
    }

    #[test]
    fn unknown_policy_fields_are_rejected() {
        let result = GatewayDocument::from_yaml(
            "gateway:\n  name: edge\n  http_policies:\n    rate_limit: {}\n",
        );
        assert!(matches!(result, Err(GantryError::Serialization { .. })));
    }
}
