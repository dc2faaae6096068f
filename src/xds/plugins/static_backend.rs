//! Backend type plugins: fixed host lists and discovered services.

use super::{BackendPlugin, GANTRY_GROUP};
use crate::errors::{GantryError, Result};
use crate::ir::{BackendObjectIr, BackendPayload, GroupKind};
use crate::xds::filters::{any_from_message, names, type_urls};
use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    ClusterDiscoveryType, DiscoveryType, EdsClusterConfig,
};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::{
    address, config_source, socket_address, transport_socket, Address, AggregatedConfigSource,
    ApiVersion, ConfigSource, SocketAddress, TransportSocket,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    CommonTlsContext, UpstreamTlsContext,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::net::IpAddr;
use tracing::warn;

pub fn static_group_kind() -> GroupKind {
    GroupKind::new(GANTRY_GROUP, "StaticBackend")
}

pub fn service_group_kind() -> GroupKind {
    GroupKind::new("", "Service")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticHost {
    pub host: String,
    pub port: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTls {
    /// Defaults to the first hostname among the hosts
    #[serde(default)]
    pub sni: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticBackend {
    pub hosts: Vec<StaticHost>,
    #[serde(default)]
    pub tls: Option<UpstreamTls>,
}

impl BackendPayload for StaticBackend {
    fn equals(&self, other: &dyn BackendPayload) -> bool {
        other.as_any().downcast_ref::<Self>().is_some_and(|o| o == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct StaticBackendPlugin;

impl BackendPlugin for StaticBackendPlugin {
    fn name(&self) -> &str {
        "static-backend"
    }

    fn init_backend(&self, backend: &BackendObjectIr, out: &mut Cluster) -> Result<()> {
        let spec = backend.payload_as::<StaticBackend>().ok_or_else(|| {
            GantryError::config(format!("static backend {} has no host list", backend.resource_name()))
        })?;
        if spec.hosts.is_empty() {
            return Err(GantryError::config(format!(
                "static backend {} has no hosts",
                backend.resource_name()
            )));
        }

        let mut first_hostname: Option<&str> = None;
        let mut lb_endpoints = Vec::with_capacity(spec.hosts.len());
        for host in &spec.hosts {
            if host.host.parse::<IpAddr>().is_err() && first_hostname.is_none() {
                first_hostname = Some(host.host.as_str());
            }
            lb_endpoints.push(lb_endpoint_for(&host.host, host.port));
        }

        let discovery = if first_hostname.is_some() {
            DiscoveryType::StrictDns
        } else {
            DiscoveryType::Static
        };
        out.cluster_discovery_type = Some(ClusterDiscoveryType::Type(discovery as i32));
        out.load_assignment = Some(ClusterLoadAssignment {
            cluster_name: out.name.clone(),
            endpoints: vec![LocalityLbEndpoints { lb_endpoints, ..Default::default() }],
            ..Default::default()
        });

        if let Some(tls) = &spec.tls {
            let sni = tls
                .sni
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .or(first_hostname)
                .unwrap_or_default();
            if sni.is_empty() {
                warn!(
                    cluster = %out.name,
                    "TLS enabled but no SNI server name available; upstream certificate verification may fail"
                );
            }
            let tls_context = UpstreamTlsContext {
                common_tls_context: Some(CommonTlsContext::default()),
                sni: sni.to_string(),
                ..Default::default()
            };
            out.transport_socket = Some(TransportSocket {
                name: names::TRANSPORT_SOCKET_TLS.to_string(),
                config_type: Some(transport_socket::ConfigType::TypedConfig(any_from_message(
                    type_urls::UPSTREAM_TLS_CONTEXT,
                    &tls_context,
                ))),
            });
        }

        Ok(())
    }
}

pub(crate) fn socket_address(host: &str, port: u32) -> Address {
    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            address: host.to_string(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(port)),
            protocol: socket_address::Protocol::Tcp as i32,
            ..Default::default()
        })),
    }
}

pub(crate) fn lb_endpoint_for(host: &str, port: u32) -> LbEndpoint {
    LbEndpoint {
        host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
            address: Some(socket_address(host, port)),
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Services get their endpoints over EDS; the load assignment is built per
/// client from the discovered endpoints.
pub struct ServiceBackendPlugin;

impl BackendPlugin for ServiceBackendPlugin {
    fn name(&self) -> &str {
        "service-backend"
    }

    fn init_backend(&self, _backend: &BackendObjectIr, out: &mut Cluster) -> Result<()> {
        out.cluster_discovery_type = Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32));
        out.eds_cluster_config = Some(EdsClusterConfig {
            eds_config: Some(ads_config_source()),
            service_name: out.name.clone(),
        });
        Ok(())
    }
}

/// Config source pointing back at the aggregated stream
pub(crate) fn ads_config_source() -> ConfigSource {
    ConfigSource {
        config_source_specifier: Some(config_source::ConfigSourceSpecifier::Ads(
            AggregatedConfigSource {},
        )),
        resource_api_version: ApiVersion::V3 as i32,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ObjectSource;
    use crate::xds::filters::decode_any;
    use std::sync::Arc;

    fn static_backend(spec: StaticBackend) -> BackendObjectIr {
        BackendObjectIr::new(ObjectSource::new(GANTRY_GROUP, "StaticBackend", "default", "hosts"), 443)
            .with_payload(Arc::new(spec))
    }

    fn init(plugin: &dyn BackendPlugin, backend: &BackendObjectIr) -> Result<Cluster> {
        let mut cluster = Cluster { name: backend.cluster_name(), ..Default::default() };
        plugin.init_backend(backend, &mut cluster)?;
        Ok(cluster)
    }

    #[test]
    fn ip_hosts_make_a_static_cluster() {
        let backend = static_backend(StaticBackend {
            hosts: vec![
                StaticHost { host: "10.0.0.1".into(), port: 8080 },
                StaticHost { host: "10.0.0.2".into(), port: 8080 },
            ],
            tls: None,
        });
        let cluster = init(&StaticBackendPlugin, &backend).unwrap();
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(ClusterDiscoveryType::Type(DiscoveryType::Static as i32))
        );
        let cla = cluster.load_assignment.unwrap();
        assert_eq!(cla.cluster_name, backend.cluster_name());
        assert_eq!(cla.endpoints[0].lb_endpoints.len(), 2);
        assert!(cluster.transport_socket.is_none());
    }

    #[test]
    fn hostname_switches_to_strict_dns_and_feeds_sni() {
        let backend = static_backend(StaticBackend {
            hosts: vec![StaticHost { host: "api.example.com".into(), port: 443 }],
            tls: Some(UpstreamTls::default()),
        });
        let cluster = init(&StaticBackendPlugin, &backend).unwrap();
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32))
        );

        let socket = cluster.transport_socket.unwrap();
        assert_eq!(socket.name, names::TRANSPORT_SOCKET_TLS);
        let Some(transport_socket::ConfigType::TypedConfig(any)) = socket.config_type else {
            panic!("expected typed config");
        };
        let tls: UpstreamTlsContext = decode_any(&any, type_urls::UPSTREAM_TLS_CONTEXT).unwrap();
        assert_eq!(tls.sni, "api.example.com");
    }

    #[test]
    fn missing_payload_is_a_config_error() {
        let backend =
            BackendObjectIr::new(ObjectSource::new(GANTRY_GROUP, "StaticBackend", "default", "x"), 80);
        let err = init(&StaticBackendPlugin, &backend).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn service_backend_uses_eds_over_ads() {
        let backend = BackendObjectIr::new(ObjectSource::new("", "Service", "default", "echo"), 80);
        let cluster = init(&ServiceBackendPlugin, &backend).unwrap();
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32))
        );
        let eds = cluster.eds_cluster_config.unwrap();
        assert_eq!(eds.service_name, "service_default_echo_80");
        assert!(matches!(
            eds.eds_config.unwrap().config_source_specifier,
            Some(config_source::ConfigSourceSpecifier::Ads(_))
        ));
    }
}
