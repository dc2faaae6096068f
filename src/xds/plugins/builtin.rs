//! Route filters every gateway supports without extra plugins: header
//! modifiers, redirects, URL rewrites and request mirrors on routes, and
//! header modifiers on individual backends of a route.

use super::{
    expect_policy, PassContext, PolicyPlugin, ProxyTranslationPass, RouteBackendContext,
    RouteContext, TypedFilterConfigMap, GANTRY_GROUP,
};
use crate::errors::{GantryError, Result};
use crate::ir::{FilterChainCommon, GroupKind, PathMatch, PolicyIr};
use crate::xds::filters::{
    any_from_message, names, type_urls, FilterStage, StagedHttpFilter, WellKnownStage,
};
use chrono::{DateTime, Utc};
use envoy_types::pb::envoy::config::common::mutation_rules::v3::{
    header_mutation::Action, HeaderMutation,
};
use envoy_types::pb::envoy::config::core::v3::{
    header_value_option::HeaderAppendAction, HeaderValue, HeaderValueOption,
    RuntimeFractionalPercent,
};
use envoy_types::pb::envoy::config::route::v3::{
    redirect_action, route, route_action, RedirectAction, Route,
};
use envoy_types::pb::envoy::extensions::filters::http::header_mutation::v3::{
    HeaderMutation as HeaderMutationFilter, HeaderMutationPerRoute, Mutations,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{RegexMatchAndSubstitute, RegexMatcher};
use envoy_types::pb::envoy::r#type::v3::{fractional_percent, FractionalPercent};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeSet;

pub fn route_filters_group_kind() -> GroupKind {
    GroupKind::new(GANTRY_GROUP, "RouteFilters")
}

pub fn backend_filters_group_kind() -> GroupKind {
    GroupKind::new(GANTRY_GROUP, "BackendFilters")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

/// Header edits applied in the order set, add, remove.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderModifier {
    #[serde(default)]
    pub set: Vec<HttpHeader>,
    #[serde(default)]
    pub add: Vec<HttpHeader>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl HeaderModifier {
    fn header_value_options(&self) -> Vec<HeaderValueOption> {
        let set = self
            .set
            .iter()
            .map(|h| header_value_option(h, HeaderAppendAction::OverwriteIfExistsOrAdd));
        let add = self
            .add
            .iter()
            .map(|h| header_value_option(h, HeaderAppendAction::AppendIfExistsOrAdd));
        set.chain(add).collect()
    }

    fn mutations(&self) -> Vec<HeaderMutation> {
        let mut mutations: Vec<_> = self
            .header_value_options()
            .into_iter()
            .map(|hvo| HeaderMutation { action: Some(Action::Append(hvo)) })
            .collect();
        mutations.extend(
            self.remove.iter().map(|name| HeaderMutation { action: Some(Action::Remove(name.clone())) }),
        );
        mutations
    }
}

fn header_value_option(header: &HttpHeader, action: HeaderAppendAction) -> HeaderValueOption {
    HeaderValueOption {
        header: Some(HeaderValue {
            key: header.name.clone(),
            value: header.value.clone(),
            ..Default::default()
        }),
        append_action: action as i32,
        ..Default::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum PathModifier {
    ReplaceFullPath(String),
    ReplacePrefixMatch(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRedirect {
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub path: Option<PathModifier>,
    #[serde(default)]
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRewrite {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub path: Option<PathModifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMirror {
    pub cluster: String,
    /// Share of requests mirrored, out of 100
    #[serde(default)]
    pub percent: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteFiltersPolicy {
    #[serde(default)]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub request_header_modifier: Option<HeaderModifier>,
    #[serde(default)]
    pub response_header_modifier: Option<HeaderModifier>,
    #[serde(default)]
    pub request_redirect: Option<RequestRedirect>,
    #[serde(default)]
    pub url_rewrite: Option<UrlRewrite>,
    #[serde(default)]
    pub request_mirrors: Vec<RequestMirror>,
}

impl PolicyIr for RouteFiltersPolicy {
    fn creation_time(&self) -> DateTime<Utc> {
        self.created
    }

    fn equals(&self, other: &dyn PolicyIr) -> bool {
        other.as_any().downcast_ref::<Self>().is_some_and(|o| o == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Header modifiers scoped to one backend of a route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendFiltersPolicy {
    #[serde(default)]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub request_header_modifier: Option<HeaderModifier>,
    #[serde(default)]
    pub response_header_modifier: Option<HeaderModifier>,
}

impl PolicyIr for BackendFiltersPolicy {
    fn creation_time(&self) -> DateTime<Utc> {
        self.created
    }

    fn equals(&self, other: &dyn PolicyIr) -> bool {
        other.as_any().downcast_ref::<Self>().is_some_and(|o| o == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

const ROUTE_FILTERS: &str = "route-filters";
const BACKEND_FILTERS: &str = "backend-filters";

pub struct RouteFiltersPlugin;

impl PolicyPlugin for RouteFiltersPlugin {
    fn name(&self) -> &str {
        ROUTE_FILTERS
    }

    fn new_gateway_translation_pass(&self, _ctx: PassContext<'_>) -> Box<dyn ProxyTranslationPass> {
        Box::new(RouteFiltersPass)
    }
}

struct RouteFiltersPass;

impl ProxyTranslationPass for RouteFiltersPass {
    fn apply_for_route(&mut self, ctx: &RouteContext<'_>, out: &mut Route) -> Result<()> {
        let policy: &RouteFiltersPolicy = expect_policy(ROUTE_FILTERS, ctx.policy)?;

        if let Some(modifier) = &policy.request_header_modifier {
            out.request_headers_to_add.extend(modifier.header_value_options());
            out.request_headers_to_remove.extend(modifier.remove.iter().cloned());
        }
        if let Some(modifier) = &policy.response_header_modifier {
            out.response_headers_to_add.extend(modifier.header_value_options());
            out.response_headers_to_remove.extend(modifier.remove.iter().cloned());
        }

        if let Some(redirect) = &policy.request_redirect {
            out.action = Some(route::Action::Redirect(build_redirect(redirect)?));
        }

        if let Some(rewrite) = &policy.url_rewrite {
            let action = route_action_mut(out, "URL rewrite")?;
            apply_url_rewrite(rewrite, ctx.rule.matcher.path.as_ref(), action);
        }

        if !policy.request_mirrors.is_empty() {
            let action = route_action_mut(out, "request mirror")?;
            for mirror in &policy.request_mirrors {
                action.request_mirror_policies.push(route_action::RequestMirrorPolicy {
                    cluster: mirror.cluster.clone(),
                    runtime_fraction: mirror.percent.map(|numerator| RuntimeFractionalPercent {
                        default_value: Some(FractionalPercent {
                            numerator,
                            denominator: fractional_percent::DenominatorType::Hundred as i32,
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }
        }

        Ok(())
    }
}

fn route_action_mut<'a>(
    out: &'a mut Route,
    filter: &str,
) -> Result<&'a mut envoy_types::pb::envoy::config::route::v3::RouteAction> {
    match out.action.as_mut() {
        Some(route::Action::Route(action)) => Ok(action),
        _ => Err(GantryError::plugin(
            ROUTE_FILTERS,
            format!("{} requires a route with at least one backend", filter),
        )),
    }
}

fn build_redirect(redirect: &RequestRedirect) -> Result<RedirectAction> {
    let response_code = match redirect.status_code.unwrap_or(302) {
        301 => redirect_action::RedirectResponseCode::MovedPermanently,
        302 => redirect_action::RedirectResponseCode::Found,
        303 => redirect_action::RedirectResponseCode::SeeOther,
        307 => redirect_action::RedirectResponseCode::TemporaryRedirect,
        308 => redirect_action::RedirectResponseCode::PermanentRedirect,
        other => {
            return Err(GantryError::plugin(
                ROUTE_FILTERS,
                format!("unsupported redirect status code {}", other),
            ))
        }
    };

    Ok(RedirectAction {
        scheme_rewrite_specifier: redirect
            .scheme
            .clone()
            .map(redirect_action::SchemeRewriteSpecifier::SchemeRedirect),
        host_redirect: redirect.hostname.clone().unwrap_or_default(),
        port_redirect: redirect.port.unwrap_or_default(),
        path_rewrite_specifier: redirect.path.as_ref().map(|path| match path {
            PathModifier::ReplaceFullPath(full) => {
                redirect_action::PathRewriteSpecifier::PathRedirect(full.clone())
            }
            PathModifier::ReplacePrefixMatch(prefix) => {
                redirect_action::PathRewriteSpecifier::PrefixRewrite(prefix.clone())
            }
        }),
        response_code: response_code as i32,
        ..Default::default()
    })
}

fn apply_url_rewrite(
    rewrite: &UrlRewrite,
    matched_path: Option<&PathMatch>,
    action: &mut envoy_types::pb::envoy::config::route::v3::RouteAction,
) {
    if let Some(hostname) = &rewrite.hostname {
        action.host_rewrite_specifier =
            Some(route_action::HostRewriteSpecifier::HostRewriteLiteral(hostname.clone()));
    }

    match &rewrite.path {
        Some(PathModifier::ReplaceFullPath(full)) => {
            action.regex_rewrite = Some(regex_rewrite(".*".to_string(), full.clone()));
        }
        // Replacing a non-root prefix with "/" would leave a double slash
        // behind for "/prefix/rest", so strip the prefix and its slashes instead.
        Some(PathModifier::ReplacePrefixMatch(prefix)) if prefix == "/" => match matched_path {
            Some(PathMatch::Prefix(matched)) if matched != "/" => {
                let pattern = format!("^{}/*", regex::escape(matched.trim_end_matches('/')));
                action.regex_rewrite = Some(regex_rewrite(pattern, "/".to_string()));
            }
            _ => action.prefix_rewrite = prefix.clone(),
        },
        Some(PathModifier::ReplacePrefixMatch(prefix)) => action.prefix_rewrite = prefix.clone(),
        None => {}
    }
}

fn regex_rewrite(pattern: String, substitution: String) -> RegexMatchAndSubstitute {
    RegexMatchAndSubstitute {
        pattern: Some(RegexMatcher { regex: pattern, ..Default::default() }),
        substitution,
    }
}

pub struct BackendFiltersPlugin;

impl PolicyPlugin for BackendFiltersPlugin {
    fn name(&self) -> &str {
        BACKEND_FILTERS
    }

    fn new_gateway_translation_pass(&self, _ctx: PassContext<'_>) -> Box<dyn ProxyTranslationPass> {
        Box::new(BackendFiltersPass::default())
    }
}

/// Per-backend header edits ride on the header mutation filter's per-route
/// config, so the filter itself is only emitted on chains that use it.
#[derive(Default)]
struct BackendFiltersPass {
    chains_needing_filter: BTreeSet<String>,
}

impl ProxyTranslationPass for BackendFiltersPass {
    fn apply_for_route_backend(
        &mut self,
        ctx: &RouteBackendContext<'_>,
        out: &mut TypedFilterConfigMap,
    ) -> Result<()> {
        let policy: &BackendFiltersPolicy = expect_policy(BACKEND_FILTERS, ctx.policy)?;

        let request_mutations =
            policy.request_header_modifier.as_ref().map(HeaderModifier::mutations).unwrap_or_default();
        let response_mutations =
            policy.response_header_modifier.as_ref().map(HeaderModifier::mutations).unwrap_or_default();
        if request_mutations.is_empty() && response_mutations.is_empty() {
            return Ok(());
        }

        let per_route = HeaderMutationPerRoute {
            mutations: Some(Mutations { request_mutations, response_mutations, ..Default::default() }),
        };
        out.insert(
            names::HEADER_MUTATION,
            any_from_message(type_urls::HEADER_MUTATION_PER_ROUTE, &per_route),
        );
        self.chains_needing_filter.insert(ctx.filter_chain.filter_chain_name.clone());
        Ok(())
    }

    fn http_filters(&mut self, filter_chain: &FilterChainCommon) -> Result<Vec<StagedHttpFilter>> {
        if !self.chains_needing_filter.contains(&filter_chain.filter_chain_name) {
            return Ok(Vec::new());
        }
        Ok(vec![StagedHttpFilter::http(
            names::HEADER_MUTATION,
            any_from_message(type_urls::HEADER_MUTATION, &HeaderMutationFilter::default()),
            FilterStage::before(WellKnownStage::Route),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        BackendRefIr, HttpBackend, HttpRouteIr, HttpRouteRuleMatchIr, ObjectSource, PolicyAtt,
        RouteMatcher,
    };
    use crate::xds::filters::decode_any;
    use envoy_types::pb::envoy::config::route::v3::RouteAction;
    use std::sync::Arc;

    fn rule(matcher: RouteMatcher) -> HttpRouteRuleMatchIr {
        let parent = Arc::new(HttpRouteIr::new(ObjectSource::new(
            "gateway.networking.k8s.io",
            "HTTPRoute",
            "default",
            "api",
        )));
        HttpRouteRuleMatchIr::new(parent, matcher)
    }

    fn routed() -> Route {
        Route { action: Some(route::Action::Route(RouteAction::default())), ..Default::default() }
    }

    fn apply(policy: RouteFiltersPolicy, rule: &HttpRouteRuleMatchIr, out: &mut Route) -> Result<()> {
        let att = PolicyAtt::new(Arc::new(policy));
        let fc = FilterChainCommon::named("http");
        let ctx = RouteContext { policy: &att, filter_chain: &fc, rule };
        RouteFiltersPass.apply_for_route(&ctx, out)
    }

    fn action_of(route: &Route) -> &RouteAction {
        match route.action.as_ref() {
            Some(route::Action::Route(action)) => action,
            other => panic!("expected route action, got {:?}", other),
        }
    }

    #[test]
    fn header_modifiers_set_then_add_then_remove() {
        let policy = RouteFiltersPolicy {
            request_header_modifier: Some(HeaderModifier {
                set: vec![HttpHeader { name: "x-env".into(), value: "prod".into() }],
                add: vec![HttpHeader { name: "x-tag".into(), value: "a".into() }],
                remove: vec!["x-debug".into()],
            }),
            ..Default::default()
        };
        let mut out = routed();
        apply(policy, &rule(RouteMatcher::default()), &mut out).unwrap();

        assert_eq!(out.request_headers_to_add.len(), 2);
        assert_eq!(
            out.request_headers_to_add[0].append_action,
            HeaderAppendAction::OverwriteIfExistsOrAdd as i32
        );
        assert_eq!(
            out.request_headers_to_add[1].append_action,
            HeaderAppendAction::AppendIfExistsOrAdd as i32
        );
        assert_eq!(out.request_headers_to_remove, vec!["x-debug".to_string()]);
    }

    #[test]
    fn redirect_defaults_to_found_and_replaces_action() {
        let policy = RouteFiltersPolicy {
            request_redirect: Some(RequestRedirect {
                scheme: Some("https".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut out = routed();
        apply(policy, &rule(RouteMatcher::default()), &mut out).unwrap();

        match out.action {
            Some(route::Action::Redirect(redirect)) => {
                assert_eq!(
                    redirect.response_code,
                    redirect_action::RedirectResponseCode::Found as i32
                );
                assert_eq!(
                    redirect.scheme_rewrite_specifier,
                    Some(redirect_action::SchemeRewriteSpecifier::SchemeRedirect("https".into()))
                );
            }
            other => panic!("expected redirect, got {:?}", other),
        }
    }

    #[test]
    fn redirect_status_codes_map_to_envoy_codes() {
        for (code, expected) in [
            (301, redirect_action::RedirectResponseCode::MovedPermanently),
            (303, redirect_action::RedirectResponseCode::SeeOther),
            (307, redirect_action::RedirectResponseCode::TemporaryRedirect),
            (308, redirect_action::RedirectResponseCode::PermanentRedirect),
        ] {
            let action =
                build_redirect(&RequestRedirect { status_code: Some(code), ..Default::default() })
                    .unwrap();
            assert_eq!(action.response_code, expected as i32);
        }
        assert!(build_redirect(&RequestRedirect { status_code: Some(304), ..Default::default() })
            .is_err());
    }

    #[test]
    fn root_prefix_rewrite_strips_matched_prefix() {
        let policy = RouteFiltersPolicy {
            url_rewrite: Some(UrlRewrite {
                hostname: Some("internal.svc".into()),
                path: Some(PathModifier::ReplacePrefixMatch("/".into())),
            }),
            ..Default::default()
        };
        let mut out = routed();
        apply(policy, &rule(RouteMatcher::prefix("/api/")), &mut out).unwrap();

        let action = action_of(&out);
        assert_eq!(
            action.host_rewrite_specifier,
            Some(route_action::HostRewriteSpecifier::HostRewriteLiteral("internal.svc".into()))
        );
        let rewrite = action.regex_rewrite.as_ref().unwrap();
        assert_eq!(rewrite.pattern.as_ref().unwrap().regex, "^/api/*");
        assert_eq!(rewrite.substitution, "/");
        assert!(action.prefix_rewrite.is_empty());
    }

    #[test]
    fn rewrite_without_backend_is_an_error() {
        let policy = RouteFiltersPolicy {
            url_rewrite: Some(UrlRewrite {
                hostname: None,
                path: Some(PathModifier::ReplacePrefixMatch("/v2".into())),
            }),
            ..Default::default()
        };
        let mut out = Route::default();
        let err = apply(policy, &rule(RouteMatcher::default()), &mut out).unwrap_err();
        assert!(err.to_string().contains("URL rewrite requires a route"));
    }

    #[test]
    fn mirror_carries_runtime_fraction() {
        let policy = RouteFiltersPolicy {
            request_mirrors: vec![RequestMirror { cluster: "shadow".into(), percent: Some(25) }],
            ..Default::default()
        };
        let mut out = routed();
        apply(policy, &rule(RouteMatcher::default()), &mut out).unwrap();

        let mirror = &action_of(&out).request_mirror_policies[0];
        assert_eq!(mirror.cluster, "shadow");
        assert_eq!(mirror.runtime_fraction.as_ref().unwrap().default_value.as_ref().unwrap().numerator, 25);
    }

    #[test]
    fn backend_headers_add_filter_only_to_chains_that_use_it() {
        let policy = BackendFiltersPolicy {
            request_header_modifier: Some(HeaderModifier {
                set: vec![HttpHeader { name: "x-canary".into(), value: "true".into() }],
                ..Default::default()
            }),
            ..Default::default()
        };
        let att = PolicyAtt::new(Arc::new(policy));
        let used = FilterChainCommon::named("used");
        let unused = FilterChainCommon::named("unused");
        let backend = HttpBackend::new(BackendRefIr::to_cluster("echo", 1));

        let mut pass = BackendFiltersPass::default();
        let mut out = TypedFilterConfigMap::new();
        pass.apply_for_route_backend(
            &RouteBackendContext { policy: &att, filter_chain: &used, backend: &backend },
            &mut out,
        )
        .unwrap();

        let per_route: HeaderMutationPerRoute = decode_any(
            out.get(names::HEADER_MUTATION).unwrap(),
            type_urls::HEADER_MUTATION_PER_ROUTE,
        )
        .unwrap();
        assert_eq!(per_route.mutations.unwrap().request_mutations.len(), 1);

        assert_eq!(pass.http_filters(&used).unwrap().len(), 1);
        assert!(pass.http_filters(&unused).unwrap().is_empty());
    }
}
