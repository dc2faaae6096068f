//! # Intermediate representation
//!
//! Wire-format independent model of gateways, listeners, routes and backends,
//! plus the connected-client identity and discovered endpoints that drive
//! per-client variation. The types carry no behavior beyond identity and
//! equality; translation lives in [`crate::xds`].

pub mod backend;
pub mod client;
pub mod document;
pub mod endpoints;
pub mod gateway;
pub mod policy;
pub mod source;

pub use backend::{BackendObjectIr, BackendPayload};
pub use client::{Locality, UniquelyConnectedClient};
pub use document::GatewayDocument;
pub use endpoints::{EndpointWithMd, EndpointsForBackend};
pub use gateway::{
    BackendRefIr, CustomNetworkFilter, FilterChainCommon, FilterChainMatch, GatewayIr,
    HeaderMatch, HttpBackend, HttpFilterChainIr, HttpRouteIr, HttpRouteRuleMatchIr, ListenerIr,
    MatchType, PathMatch, QueryParamMatch, RouteMatcher, TcpIr, TlsBundle, VirtualHostIr,
};
pub use policy::{downcast_policy, AttachedPolicies, PolicyAtt, PolicyIr, PolicyTargetRef};
pub use source::{GroupKind, ObjectSource};
