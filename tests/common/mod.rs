//! Common builders for integration tests.

#![allow(dead_code)]

use gantry::config::AppConfig;
use gantry::ir::{
    BackendObjectIr, BackendRefIr, FilterChainCommon, GatewayIr, HttpBackend, HttpFilterChainIr,
    HttpRouteIr, HttpRouteRuleMatchIr, ListenerIr, Locality, ObjectSource, RouteMatcher,
    UniquelyConnectedClient, VirtualHostIr,
};
use gantry::syncer::{LoggingStatusWriter, ProxySyncer};
use gantry::xds::{gateway_role, PluginRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const GATEWAY_GROUP: &str = "gateway.networking.k8s.io";

pub fn gateway_source(name: &str) -> ObjectSource {
    ObjectSource::new(GATEWAY_GROUP, "Gateway", "default", name)
}

pub fn route_source(name: &str) -> ObjectSource {
    ObjectSource::new(GATEWAY_GROUP, "HTTPRoute", "default", name)
}

pub fn service(name: &str) -> BackendObjectIr {
    BackendObjectIr::new(ObjectSource::new("", "Service", "default", name), 8080)
}

/// A rule on `route` forwarding `prefix` to `backends`. No backends means no action.
pub fn rule(
    route: &Arc<HttpRouteIr>,
    prefix: &str,
    backends: &[&BackendObjectIr],
) -> HttpRouteRuleMatchIr {
    let mut rule = HttpRouteRuleMatchIr::new(route.clone(), RouteMatcher::prefix(prefix));
    for backend in backends {
        rule.backends
            .push(HttpBackend::new(BackendRefIr::to_backend(Arc::new((*backend).clone()), 1)));
    }
    rule
}

/// A gateway with one HTTP listener on `port` holding one virtual host.
pub fn gateway(name: &str, port: u32, rules: Vec<HttpRouteRuleMatchIr>) -> GatewayIr {
    let vhost = VirtualHostIr {
        name: format!("{}-vhost", name),
        hostname: format!("{}.example.com", name),
        rules,
    };
    let mut chain = HttpFilterChainIr::new(FilterChainCommon::named("http"));
    chain.virtual_hosts.push(vhost);
    let mut listener = ListenerIr::new(format!("{}-http", name), "0.0.0.0", port);
    listener.http_filter_chains.push(chain);
    let mut gateway = GatewayIr::new(gateway_source(name));
    gateway.listeners.push(listener);
    gateway
}

pub fn simple_gateway(name: &str, port: u32, backend: &BackendObjectIr) -> GatewayIr {
    let route = Arc::new(HttpRouteIr::new(route_source(name)));
    gateway(name, port, vec![rule(&route, "/", &[backend])])
}

pub fn client_of(gateway: &str, region: &str, zone: &str) -> UniquelyConnectedClient {
    UniquelyConnectedClient::new(
        gateway_role(&gateway_source(gateway)),
        "default",
        BTreeMap::new(),
        Locality::new(region, zone, ""),
    )
}

pub fn syncer_with(config: &AppConfig) -> ProxySyncer {
    ProxySyncer::new(Arc::new(PluginRegistry::with_builtins()), config, Arc::new(LoggingStatusWriter))
}

pub fn syncer() -> ProxySyncer {
    syncer_with(&AppConfig::default())
}
