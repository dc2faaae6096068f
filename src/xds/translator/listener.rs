//! One Envoy listener per IR listener.

use super::{filter_chain, TranslationState};
use crate::ir::ListenerIr;
use crate::utils::is_ipv4_address;
use crate::xds::filters::{any_from_message, names, type_urls};
use crate::xds::plugins::ListenerContext;
use crate::xds::reports::{Condition, ConditionReason, ConditionType};
use envoy_types::pb::envoy::config::core::v3::{address, socket_address, Address, SocketAddress};
use envoy_types::pb::envoy::config::listener::v3::{listener_filter, Listener, ListenerFilter};
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::envoy::extensions::filters::listener::tls_inspector::v3::TlsInspector;
use tracing::warn;

pub(crate) struct TranslatedListener {
    pub listener: Listener,
    pub routes: Vec<RouteConfiguration>,
}

pub(crate) fn translate_listener(
    state: &mut TranslationState<'_>,
    listener: &ListenerIr,
) -> TranslatedListener {
    let mut out = Listener {
        name: listener.name.clone(),
        address: Some(listener_address(state, listener)),
        ..Default::default()
    };

    let gateway = state.gateway;
    for policies in [&gateway.attached_listener_policies, &listener.attached_policies] {
        state.passes.for_each_policy(policies, |pass, policy| {
            pass.apply_listener_plugin(&ListenerContext { policy, listener }, &mut out);
        });
    }

    let mut routes = Vec::with_capacity(listener.http_filter_chains.len());
    for chain in &listener.http_filter_chains {
        let chain_name = &chain.common.filter_chain_name;
        if !state.route_config_names.insert(chain_name.clone()) {
            warn!(listener = %listener.name, filter_chain = %chain_name, "Duplicate HTTP filter chain name, skipping");
            let gateway = state.gateway;
            state.reports.listener(&gateway.source, &listener.name).set_condition(Condition::new(
                ConditionType::Programmed,
                false,
                ConditionReason::Invalid,
                format!("duplicate filter chain name '{}'", chain_name),
            ));
            continue;
        }
        let (filter_chain, route_config) = filter_chain::translate_http_chain(state, listener, chain);
        out.filter_chains.push(filter_chain);
        routes.push(route_config);
    }
    for chain in &listener.tcp_filter_chains {
        if let Some(filter_chain) = filter_chain::translate_tcp_chain(state, listener, chain) {
            out.filter_chains.push(filter_chain);
        }
    }

    if listener.has_sni_match() {
        out.listener_filters.push(tls_inspector_filter());
    }

    TranslatedListener { listener: out, routes }
}

/// TCP socket address for the listener. An unparseable bind address is
/// reported on the gateway but still emitted.
fn listener_address(state: &mut TranslationState<'_>, listener: &ListenerIr) -> Address {
    let is_ipv4 = match is_ipv4_address(&listener.bind_address) {
        Ok(is_ipv4) => is_ipv4,
        Err(err) => {
            warn!(listener = %listener.name, error = %err, "Invalid listener bind address");
            let gateway = state.gateway;
            state.reports.gateway(&gateway.source).set_condition(Condition::new(
                ConditionType::Programmed,
                false,
                ConditionReason::Invalid,
                format!("Error processing listener: {}", err),
            ));
            false
        }
    };

    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            protocol: socket_address::Protocol::Tcp as i32,
            address: listener.bind_address.clone(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(listener.bind_port)),
            ipv4_compat: !is_ipv4,
            ..Default::default()
        })),
    }
}

fn tls_inspector_filter() -> ListenerFilter {
    ListenerFilter {
        name: names::TLS_INSPECTOR.to_string(),
        config_type: Some(listener_filter::ConfigType::TypedConfig(any_from_message(
            type_urls::TLS_INSPECTOR,
            &TlsInspector::default(),
        ))),
        ..Default::default()
    }
}
