//! HTTP and TCP filter chains.

use super::{route, Passes, TranslationState};
use crate::errors::{GantryError, Result};
use crate::ir::{
    FilterChainCommon, FilterChainMatch, HttpFilterChainIr, ListenerIr, TcpIr, TlsBundle,
};
use crate::xds::filters::http::router_filter;
use crate::xds::filters::{
    any_from_message, names, sorted_filters, type_urls, StagedFilter, StagedNetworkFilter,
    StageableFilter,
};
use crate::xds::plugins::static_backend::ads_config_source;
use crate::xds::plugins::{HcmContext, ProxyTranslationPass};
use crate::xds::reports::{Condition, ConditionReason, ConditionType};
use envoy_types::pb::envoy::config::core::v3::{data_source, transport_socket, DataSource, TransportSocket};
use envoy_types::pb::envoy::config::listener::v3::{
    filter, Filter, FilterChain, FilterChainMatch as EnvoyFilterChainMatch,
};
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{tcp_proxy, TcpProxy};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context, CertificateValidationContext, CommonTlsContext, DownstreamTlsContext,
    TlsCertificate, TlsParameters,
};
use envoy_types::pb::google::protobuf::BoolValue;
use tracing::warn;

const DEFAULT_HTTP_STAT_PREFIX: &str = "http";

/// Translate one HTTP chain into its filter chain and the route
/// configuration its HCM loads over RDS.
pub(crate) fn translate_http_chain(
    state: &mut TranslationState<'_>,
    listener: &ListenerIr,
    chain: &HttpFilterChainIr,
) -> (FilterChain, RouteConfiguration) {
    let common = &chain.common;
    let route_config = route::translate_route_configuration(state, listener, chain);

    let (mut network_filters, errors) =
        collect_staged(&mut state.passes, |pass| pass.network_filters(common));
    report_listener_errors(state, listener, "Error processing network plugin", errors);
    network_filters.extend(custom_network_filters(common));

    let mut hcm = initialize_hcm(common);
    hcm.http_filters = http_filters(state, listener, common);

    let gateway = state.gateway;
    let mut hcm_errors = Vec::new();
    for policies in [&gateway.attached_http_policies, &chain.attached_policies] {
        hcm_errors.extend(state.passes.try_for_each_policy(policies, |pass, policy| {
            let ctx = HcmContext { policy, listener, filter_chain: common };
            pass.apply_hcm(&ctx, &mut hcm)
        }));
    }
    report_listener_errors(state, listener, "Error processing HCM plugin", hcm_errors);

    let mut filters = sorted_filters(network_filters);
    filters.push(Filter {
        name: names::HTTP_CONNECTION_MANAGER.to_string(),
        config_type: Some(filter::ConfigType::TypedConfig(any_from_message(
            type_urls::HTTP_CONNECTION_MANAGER,
            &hcm,
        ))),
    });

    (init_filter_chain(common, filters), route_config)
}

/// Translate one TCP chain. A chain without backends is reported and skipped.
pub(crate) fn translate_tcp_chain(
    state: &mut TranslationState<'_>,
    listener: &ListenerIr,
    chain: &TcpIr,
) -> Option<FilterChain> {
    let common = &chain.common;
    if chain.backend_refs.is_empty() {
        let err = GantryError::translation(
            common.filter_chain_name.as_str(),
            "TCP filter chain has no backends",
        );
        report_listener_errors(state, listener, "Error processing TCP filter chain", vec![err]);
        return None;
    }

    let cluster_specifier = if let [only] = chain.backend_refs.as_slice() {
        tcp_proxy::ClusterSpecifier::Cluster(only.cluster_name.clone())
    } else {
        let clusters = chain
            .backend_refs
            .iter()
            .map(|backend_ref| tcp_proxy::weighted_cluster::ClusterWeight {
                name: backend_ref.cluster_name.clone(),
                weight: backend_ref.weight.max(1),
                ..Default::default()
            })
            .collect();
        tcp_proxy::ClusterSpecifier::WeightedClusters(tcp_proxy::WeightedCluster {
            clusters,
            ..Default::default()
        })
    };

    let proxy = TcpProxy {
        stat_prefix: common.filter_chain_name.clone(),
        cluster_specifier: Some(cluster_specifier),
        ..Default::default()
    };

    let mut filters = sorted_filters(custom_network_filters(common));
    filters.push(Filter {
        name: names::TCP_PROXY.to_string(),
        config_type: Some(filter::ConfigType::TypedConfig(any_from_message(
            type_urls::TCP_PROXY,
            &proxy,
        ))),
    });

    Some(init_filter_chain(common, filters))
}

fn initialize_hcm(common: &FilterChainCommon) -> HttpConnectionManager {
    let stat_prefix = if common.filter_chain_name.is_empty() {
        DEFAULT_HTTP_STAT_PREFIX.to_string()
    } else {
        common.filter_chain_name.clone()
    };

    HttpConnectionManager {
        codec_type: CodecType::Auto as i32,
        stat_prefix,
        normalize_path: Some(BoolValue { value: true }),
        merge_slashes: true,
        use_remote_address: Some(BoolValue { value: true }),
        route_specifier: Some(RouteSpecifier::Rds(Rds {
            config_source: Some(ads_config_source()),
            route_config_name: common.filter_chain_name.clone(),
        })),
        ..Default::default()
    }
}

/// Sorted plugin filters, terminated by the router carrying the upstream filters.
fn http_filters(
    state: &mut TranslationState<'_>,
    listener: &ListenerIr,
    common: &FilterChainCommon,
) -> Vec<HttpFilter> {
    let (staged, errors) = collect_staged(&mut state.passes, |pass| pass.http_filters(common));
    report_listener_errors(state, listener, "Error processing http plugin", errors);

    let (upstream, errors) =
        collect_staged(&mut state.passes, |pass| pass.upstream_http_filters(common));
    report_listener_errors(state, listener, "Error processing upstream http plugin", errors);

    let mut filters = sorted_filters(staged);
    filters.push(router_filter(sorted_filters(upstream)));
    filters
}

/// Ask every pass for staged filters, keeping the ones that succeeded.
fn collect_staged<F: StageableFilter>(
    passes: &mut Passes,
    mut produce: impl FnMut(&mut dyn ProxyTranslationPass) -> Result<Vec<StagedFilter<F>>>,
) -> (Vec<StagedFilter<F>>, Vec<GantryError>) {
    let mut staged = Vec::new();
    let mut errors = Vec::new();
    for pass in passes.all() {
        match produce(pass.as_mut()) {
            Ok(filters) => staged.extend(filters),
            Err(e) => errors.push(e),
        }
    }
    (staged, errors)
}

fn custom_network_filters(common: &FilterChainCommon) -> Vec<StagedNetworkFilter> {
    common
        .custom_network_filters
        .iter()
        .map(|custom| StagedNetworkFilter::network(custom.name.clone(), custom.config.clone(), custom.stage))
        .collect()
}

fn report_listener_errors(
    state: &mut TranslationState<'_>,
    listener: &ListenerIr,
    prefix: &str,
    errors: Vec<GantryError>,
) {
    let gateway = state.gateway;
    for err in errors {
        warn!(gateway = %gateway.source, listener = %listener.name, error = %err, "{}", prefix);
        state.reports.listener(&gateway.source, &listener.name).set_condition(Condition::new(
            ConditionType::Programmed,
            false,
            ConditionReason::Invalid,
            format!("{}: {}", prefix, err),
        ));
    }
}

fn init_filter_chain(common: &FilterChainCommon, filters: Vec<Filter>) -> FilterChain {
    FilterChain {
        name: common.filter_chain_name.clone(),
        filter_chain_match: filter_chain_match(&common.matcher),
        transport_socket: common.tls.as_ref().map(downstream_tls_socket),
        filters,
        ..Default::default()
    }
}

fn filter_chain_match(matcher: &FilterChainMatch) -> Option<EnvoyFilterChainMatch> {
    if matcher.sni_domains.is_empty() {
        return None;
    }
    Some(EnvoyFilterChainMatch { server_names: matcher.sni_domains.clone(), ..Default::default() })
}

fn inline_bytes(bytes: &[u8]) -> DataSource {
    DataSource { specifier: Some(data_source::Specifier::InlineBytes(bytes.to_vec())), ..Default::default() }
}

fn downstream_tls_socket(tls: &TlsBundle) -> TransportSocket {
    let validation_context_type = (!tls.ca.is_empty()).then(|| {
        common_tls_context::ValidationContextType::ValidationContext(CertificateValidationContext {
            trusted_ca: Some(inline_bytes(&tls.ca)),
            ..Default::default()
        })
    });

    let context = DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            tls_params: Some(TlsParameters::default()),
            tls_certificates: vec![TlsCertificate {
                certificate_chain: Some(inline_bytes(&tls.cert_chain)),
                private_key: Some(inline_bytes(&tls.private_key)),
                ..Default::default()
            }],
            validation_context_type,
            alpn_protocols: tls.alpn_protocols.clone(),
            ..Default::default()
        }),
        ..Default::default()
    };

    TransportSocket {
        name: names::TRANSPORT_SOCKET_TLS.to_string(),
        config_type: Some(transport_socket::ConfigType::TypedConfig(any_from_message(
            type_urls::DOWNSTREAM_TLS_CONTEXT,
            &context,
        ))),
    }
}
