//! Terminal HTTP filters.

use super::{any_from_message, names, type_urls};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::http::upstream_codec::v3::UpstreamCodec;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_filter, HttpFilter,
};

/// The upstream codec, which must terminate a non-empty upstream filter list.
pub fn upstream_codec_filter() -> HttpFilter {
    HttpFilter {
        name: names::UPSTREAM_CODEC.to_string(),
        config_type: Some(http_filter::ConfigType::TypedConfig(any_from_message(
            type_urls::UPSTREAM_CODEC,
            &UpstreamCodec::default(),
        ))),
        ..Default::default()
    }
}

/// Build the router filter.
///
/// Upstream filters run after cluster selection, so they live on the router
/// rather than in the HCM chain. An empty list leaves the router's default.
pub fn router_filter(sorted_upstream_filters: Vec<HttpFilter>) -> HttpFilter {
    let mut router = Router::default();
    if !sorted_upstream_filters.is_empty() {
        router.upstream_http_filters = sorted_upstream_filters;
        router.upstream_http_filters.push(upstream_codec_filter());
    }

    HttpFilter {
        name: names::ROUTER.to_string(),
        config_type: Some(http_filter::ConfigType::TypedConfig(any_from_message(
            type_urls::ROUTER,
            &router,
        ))),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::filters::decode_any;
    use crate::xds::filters::stage::StageableFilter;

    #[test]
    fn router_without_upstream_filters_is_bare() {
        let filter = router_filter(Vec::new());
        assert_eq!(filter.name, names::ROUTER);
        let router: Router = decode_any(filter.typed_config().unwrap(), type_urls::ROUTER).unwrap();
        assert!(router.upstream_http_filters.is_empty());
    }

    #[test]
    fn upstream_codec_is_appended_last() {
        let upstream = HttpFilter { name: "example.upstream.auth".to_string(), ..Default::default() };
        let filter = router_filter(vec![upstream]);
        let router: Router = decode_any(filter.typed_config().unwrap(), type_urls::ROUTER).unwrap();
        let filter_names: Vec<_> =
            router.upstream_http_filters.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(filter_names, vec!["example.upstream.auth", names::UPSTREAM_CODEC]);
    }
}
