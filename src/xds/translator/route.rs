//! Virtual hosts and routes of one HTTP filter chain.

use super::TranslationState;
use crate::errors::GantryError;
use crate::ir::{
    AttachedPolicies, HeaderMatch, HttpFilterChainIr, HttpRouteRuleMatchIr, ListenerIr, MatchType, PathMatch,
    QueryParamMatch, RouteMatcher, VirtualHostIr,
};
use crate::utils::{sanitize_for_envoy, validate_prefix_rewrite, validate_route_path};
use crate::xds::plugins::{
    RouteBackendContext, RouteContext, TypedFilterConfigMap, VirtualHostContext,
};
use crate::xds::reports::{Condition, ConditionReason, ConditionType};
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, query_parameter_matcher::QueryParameterMatchSpecifier,
    redirect_action, route, route_action, route_match::PathSpecifier,
    weighted_cluster::ClusterWeight, HeaderMatcher, QueryParameterMatcher, Route, RouteAction,
    RouteConfiguration, RouteMatch, VirtualHost, WeightedCluster,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher, RegexMatcher, StringMatcher};
use envoy_types::pb::google::protobuf::UInt32Value;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Envoy rejects a path-separated prefix containing `?` or `#` or ending in `/`.
static SEPARATED_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^?#]+[^?#/]$").unwrap());

pub(crate) fn translate_route_configuration(
    state: &mut TranslationState<'_>,
    listener: &ListenerIr,
    chain: &HttpFilterChainIr,
) -> RouteConfiguration {
    let virtual_hosts = chain
        .virtual_hosts
        .iter()
        .map(|vhost| translate_virtual_host(state, listener, chain, vhost))
        .collect();

    RouteConfiguration {
        name: chain.common.filter_chain_name.clone(),
        virtual_hosts,
        ignore_port_in_host_matching: true,
        ..Default::default()
    }
}

fn translate_virtual_host(
    state: &mut TranslationState<'_>,
    listener: &ListenerIr,
    chain: &HttpFilterChainIr,
    vhost: &VirtualHostIr,
) -> VirtualHost {
    let mut routes = Vec::with_capacity(vhost.rules.len());
    for (index, rule) in vhost.rules.iter().enumerate() {
        let generated = format!("{}-route-{}", vhost.name, index);
        if let Some(route) = translate_route(state, chain, rule, &generated) {
            routes.push(route);
        }
    }

    let domains = if vhost.hostname.is_empty() {
        vec!["*".to_string()]
    } else {
        vec![vhost.hostname.clone()]
    };

    let mut out = VirtualHost {
        name: sanitize_for_envoy(&vhost.name),
        domains,
        routes,
        ..Default::default()
    };

    let gateway = state.gateway;
    for policies in [&gateway.attached_http_policies, &listener.attached_policies] {
        state.passes.for_each_policy(policies, |pass, policy| {
            let ctx = VirtualHostContext { policy, filter_chain: &chain.common };
            pass.apply_vhost_plugin(&ctx, &mut out);
        });
    }

    out
}

/// Build one route. `None` means the route is left out of the output,
/// either silently (delegating parent) or with a reported condition.
fn translate_route(
    state: &mut TranslationState<'_>,
    chain: &HttpFilterChainIr,
    rule: &HttpRouteRuleMatchIr,
    generated_name: &str,
) -> Option<Route> {
    let mut out = Route {
        name: route_name(generated_name, rule),
        r#match: Some(translate_matcher(&rule.matcher)),
        ..Default::default()
    };

    let mut errors = Vec::new();
    if !rule.backends.is_empty() {
        let action = translate_route_action(state, chain, rule, &mut out, &mut errors);
        out.action = Some(route::Action::Route(action));
    }

    let empty = AttachedPolicies::default();
    let delegate_policies =
        rule.delegate_parent.as_ref().map(|p| &p.attached_policies).unwrap_or(&empty);
    for policies in [
        &rule.parent.attached_policies,
        &rule.attached_policies,
        &rule.extension_refs,
        delegate_policies,
    ] {
        errors.extend(state.passes.try_for_each_policy(policies, |pass, policy| {
            let ctx = RouteContext { policy, filter_chain: &chain.common, rule };
            pass.apply_for_route(&ctx, &mut out)
        }));
    }

    let gateway = state.gateway;
    let parent_source = &rule.parent.source;
    let gateway_source = &gateway.source;

    let failure = if !errors.is_empty() {
        let joined = join_errors(&errors);
        state.reports.route(parent_source, gateway_source).set_condition(Condition::new(
            ConditionType::Accepted,
            false,
            ConditionReason::IncompatibleFilters,
            joined.clone(),
        ));
        Some(joined)
    } else if let Err(err) = validate_envoy_route(&out) {
        Some(err)
    } else if out.action.is_none() {
        if rule.has_children {
            return None;
        }
        Some("no action specified".to_string())
    } else {
        None
    };

    match failure {
        None => Some(out),
        Some(err) => {
            debug!(route = %out.name, error = %err, "Dropping invalid route");
            state.reports.route(parent_source, gateway_source).set_condition(Condition::new(
                ConditionType::PartiallyInvalid,
                true,
                ConditionReason::UnsupportedValue,
                format!("Dropped Rule: {}", err),
            ));
            state.metrics.record_dropped_route(&gateway_source.resource_name());
            None
        }
    }
}

fn route_name(generated_name: &str, rule: &HttpRouteRuleMatchIr) -> String {
    if rule.name.is_empty() {
        format!("{}-matcher-{}", generated_name, rule.match_index)
    } else {
        format!("{}-{}-matcher-{}", generated_name, rule.name, rule.match_index)
    }
}

fn join_errors(errors: &[GantryError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}

fn translate_route_action(
    state: &mut TranslationState<'_>,
    chain: &HttpFilterChainIr,
    rule: &HttpRouteRuleMatchIr,
    out_route: &mut Route,
    errors: &mut Vec<GantryError>,
) -> RouteAction {
    let mut clusters = Vec::with_capacity(rule.backends.len());
    let mut per_backend_configs = Vec::with_capacity(rule.backends.len());

    for backend in &rule.backends {
        let mut typed_config = TypedFilterConfigMap::new();
        errors.extend(state.passes.try_for_each_policy(&backend.attached_policies, |pass, policy| {
            let ctx = RouteBackendContext { policy, filter_chain: &chain.common, backend };
            pass.apply_for_route_backend(&ctx, &mut typed_config)
        }));
        clusters.push((backend.backend.cluster_name.clone(), backend.backend.weight));
        per_backend_configs.push(typed_config);
    }

    let cluster_specifier = if clusters.len() == 1 {
        let (name, _) = clusters.remove(0);
        if let Some(typed_config) = per_backend_configs.pop() {
            typed_config.merge_into(&mut out_route.typed_per_filter_config);
        }
        route_action::ClusterSpecifier::Cluster(name)
    } else {
        let weighted = clusters
            .into_iter()
            .zip(per_backend_configs)
            .map(|((name, weight), typed_config)| ClusterWeight {
                name,
                weight: Some(UInt32Value { value: weight }),
                typed_per_filter_config: typed_config.into_wire(),
                ..Default::default()
            })
            .collect();
        route_action::ClusterSpecifier::WeightedClusters(WeightedCluster {
            clusters: weighted,
            ..Default::default()
        })
    };

    RouteAction {
        cluster_specifier: Some(cluster_specifier),
        cluster_not_found_response_code:
            route_action::ClusterNotFoundResponseCode::InternalServerError as i32,
        ..Default::default()
    }
}

/// Check every path-like field a plugin may have written.
pub(crate) fn validate_envoy_route(route: &Route) -> Result<(), String> {
    let mut errors = Vec::new();
    let mut check = |result: Result<(), String>| {
        if let Err(e) = result {
            errors.push(e);
        }
    };

    if let Some(PathSpecifier::Path(p) | PathSpecifier::Prefix(p) | PathSpecifier::PathSeparatedPrefix(p)) =
        route.r#match.as_ref().and_then(|m| m.path_specifier.as_ref())
    {
        check(validate_route_path(p));
    }

    match &route.action {
        Some(route::Action::Route(action)) => {
            check(validate_prefix_rewrite(&action.prefix_rewrite));
        }
        Some(route::Action::Redirect(redirect)) => {
            check(validate_route_path(&redirect.host_redirect));
            match &redirect.path_rewrite_specifier {
                Some(redirect_action::PathRewriteSpecifier::PathRedirect(path)) => {
                    check(validate_route_path(path));
                }
                Some(redirect_action::PathRewriteSpecifier::PrefixRewrite(prefix)) => {
                    check(validate_prefix_rewrite(prefix));
                }
                _ => {}
            }
            if let Some(redirect_action::SchemeRewriteSpecifier::SchemeRedirect(scheme)) =
                &redirect.scheme_rewrite_specifier
            {
                check(validate_route_path(scheme));
            }
        }
        _ => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("error {}: {}", route.name, errors.join("\n")))
    }
}

pub(crate) fn translate_matcher(matcher: &RouteMatcher) -> RouteMatch {
    let mut headers: Vec<HeaderMatcher> = matcher.headers.iter().map(header_matcher).collect();
    if let Some(method) = &matcher.method {
        headers.push(HeaderMatcher {
            name: ":method".to_string(),
            header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(string_matcher_for(
                method,
                MatchType::Exact,
            ))),
            ..Default::default()
        });
    }

    let path_specifier = match &matcher.path {
        None => PathSpecifier::Prefix("/".to_string()),
        Some(PathMatch::Exact(path)) => PathSpecifier::Path(path.clone()),
        Some(PathMatch::Regex(regex)) => PathSpecifier::SafeRegex(regex_matcher(regex)),
        Some(PathMatch::Prefix(prefix)) if SEPARATED_PREFIX.is_match(prefix) => {
            PathSpecifier::PathSeparatedPrefix(prefix.clone())
        }
        Some(PathMatch::Prefix(prefix)) => PathSpecifier::Prefix(prefix.clone()),
    };

    RouteMatch {
        path_specifier: Some(path_specifier),
        headers,
        query_parameters: matcher.query_params.iter().map(query_matcher).collect(),
        ..Default::default()
    }
}

pub(crate) fn header_matcher(header: &HeaderMatch) -> HeaderMatcher {
    let specifier = if header.value.is_empty() {
        HeaderMatchSpecifier::PresentMatch(true)
    } else {
        HeaderMatchSpecifier::StringMatch(string_matcher_for(&header.value, header.match_type))
    };
    HeaderMatcher {
        name: header.name.clone(),
        header_match_specifier: Some(specifier),
        ..Default::default()
    }
}

fn query_matcher(query: &QueryParamMatch) -> QueryParameterMatcher {
    let specifier = if query.value.is_empty() {
        QueryParameterMatchSpecifier::PresentMatch(true)
    } else {
        QueryParameterMatchSpecifier::StringMatch(string_matcher_for(&query.value, query.match_type))
    };
    QueryParameterMatcher {
        name: query.name.clone(),
        query_parameter_match_specifier: Some(specifier),
    }
}

fn string_matcher_for(value: &str, match_type: MatchType) -> StringMatcher {
    let pattern = match match_type {
        MatchType::Exact => string_matcher::MatchPattern::Exact(value.to_string()),
        MatchType::Regex => string_matcher::MatchPattern::SafeRegex(regex_matcher(value)),
    };
    StringMatcher { match_pattern: Some(pattern), ..Default::default() }
}

fn regex_matcher(regex: &str) -> RegexMatcher {
    RegexMatcher { regex: regex.to_string(), ..Default::default() }
}
