//! Filter helpers shared by the listener translator and the plugins.
//!
//! - [`stage`]: total ordering of staged HTTP and network filters
//! - [`http`]: the terminal router filter and the upstream codec

pub mod http;
pub mod stage;

use envoy_types::pb::google::protobuf::Any;
use prost::Message;

pub use stage::{
    sort_staged, sorted_filters, FilterStage, StageableFilter, StagedFilter, StagedHttpFilter,
    StagedNetworkFilter, WellKnownStage,
};

/// Well-known Envoy extension names
pub mod names {
    pub const HTTP_CONNECTION_MANAGER: &str = "envoy.filters.network.http_connection_manager";
    pub const TCP_PROXY: &str = "envoy.filters.network.tcp_proxy";
    pub const ROUTER: &str = "envoy.filters.http.router";
    pub const UPSTREAM_CODEC: &str = "envoy.filters.http.upstream_codec";
    pub const HEADER_MUTATION: &str = "envoy.filters.http.header_mutation";
    pub const TLS_INSPECTOR: &str = "envoy.filters.listener.tls_inspector";
    pub const TRANSPORT_SOCKET_TLS: &str = "envoy.transport_sockets.tls";
    pub const FILE_ACCESS_LOG: &str = "envoy.access_loggers.file";
}

/// Type URLs of the messages packed into `Any` by the translator
pub mod type_urls {
    pub const HTTP_CONNECTION_MANAGER: &str = "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
    pub const TCP_PROXY: &str =
        "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
    pub const ROUTER: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
    pub const UPSTREAM_CODEC: &str =
        "type.googleapis.com/envoy.extensions.filters.http.upstream_codec.v3.UpstreamCodec";
    pub const HEADER_MUTATION: &str =
        "type.googleapis.com/envoy.extensions.filters.http.header_mutation.v3.HeaderMutation";
    pub const HEADER_MUTATION_PER_ROUTE: &str =
        "type.googleapis.com/envoy.extensions.filters.http.header_mutation.v3.HeaderMutationPerRoute";
    pub const TLS_INSPECTOR: &str =
        "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";
    pub const DOWNSTREAM_TLS_CONTEXT: &str =
        "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";
    pub const UPSTREAM_TLS_CONTEXT: &str =
        "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";
    pub const FILE_ACCESS_LOG: &str =
        "type.googleapis.com/envoy.extensions.access_loggers.file.v3.FileAccessLog";
}

/// Pack a protobuf message into `google.protobuf.Any`.
pub fn any_from_message<M: Message>(type_url: impl Into<String>, msg: &M) -> Any {
    Any { type_url: type_url.into(), value: msg.encode_to_vec() }
}

/// Unpack an `Any` whose type URL is expected to be `type_url`.
pub fn decode_any<M: Message + Default>(any: &Any, type_url: &str) -> crate::Result<M> {
    if any.type_url != type_url {
        return Err(crate::Error::internal(format!(
            "expected {} but found {}",
            type_url, any.type_url
        )));
    }
    M::decode(any.value.as_slice()).map_err(|e| {
        crate::Error::internal(format!("failed to decode {}: {}", type_url, e))
    })
}
