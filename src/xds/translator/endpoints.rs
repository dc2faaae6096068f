//! Locality-aware load assignments.

use crate::ir::{EndpointsForBackend, Locality, UniquelyConnectedClient};
use crate::xds::plugins::static_backend::lb_endpoint_for;
use envoy_types::pb::envoy::config::core::v3::Locality as EnvoyLocality;
use envoy_types::pb::envoy::config::endpoint::v3::{ClusterLoadAssignment, LocalityLbEndpoints};
use envoy_types::pb::google::protobuf::UInt32Value;
use std::collections::{BTreeMap, BTreeSet};

/// Priority of localities in a failed-over-from region the client should
/// not fail over to.
const FAILOVER_DEMOTED: u32 = 4;

/// Build the load assignment `client` sees for `endpoints`.
///
/// Localities closer to the client get lower priorities: same subzone 0,
/// same zone 1, same region 2, anything else 3. `failover` maps a client
/// region to the region it fails over to; other remote regions are demoted
/// below it. Priorities are renumbered densely afterwards. A client without a
/// locality sees everything at priority 0.
pub fn prioritize(
    client: &UniquelyConnectedClient,
    endpoints: &EndpointsForBackend,
    failover: &BTreeMap<String, String>,
) -> ClusterLoadAssignment {
    let mut localities: Vec<LocalityLbEndpoints> = endpoints
        .lb_eps
        .iter()
        .map(|(locality, eps)| {
            let mut sorted: Vec<_> = eps.iter().collect();
            sorted.sort_by(|a, b| {
                a.address
                    .cmp(&b.address)
                    .then(a.port.cmp(&b.port))
                    .then(a.load_balancing_weight.cmp(&b.load_balancing_weight))
                    .then(a.labels.cmp(&b.labels))
            });
            let lb_endpoints = sorted
                .into_iter()
                .map(|ep| {
                    let mut lb = lb_endpoint_for(&ep.address, ep.port);
                    lb.load_balancing_weight = ep.load_balancing_weight.map(|value| UInt32Value { value });
                    lb
                })
                .collect();
            LocalityLbEndpoints {
                locality: Some(EnvoyLocality {
                    region: locality.region.clone(),
                    zone: locality.zone.clone(),
                    sub_zone: locality.subzone.clone(),
                }),
                lb_endpoints,
                priority: locality_priority(&client.locality, locality, failover),
                ..Default::default()
            }
        })
        .collect();

    renumber_priorities(&mut localities);

    ClusterLoadAssignment {
        cluster_name: endpoints.cluster_name.clone(),
        endpoints: localities,
        ..Default::default()
    }
}

fn locality_priority(
    client: &Locality,
    endpoint: &Locality,
    failover: &BTreeMap<String, String>,
) -> u32 {
    if client.is_empty() {
        return 0;
    }

    let region = client.region == endpoint.region;
    let zone = region && client.zone == endpoint.zone;
    let subzone = zone && client.subzone == endpoint.subzone;
    let priority = match (region, zone, subzone) {
        (true, true, true) => 0,
        (true, true, false) => 1,
        (true, false, _) => 2,
        _ => 3,
    };

    match failover.get(&client.region) {
        Some(target) if !region && endpoint.region != *target => FAILOVER_DEMOTED,
        _ => priority,
    }
}

/// Map the distinct priorities onto 0..n, keeping their order.
fn renumber_priorities(localities: &mut [LocalityLbEndpoints]) {
    let distinct: BTreeSet<u32> = localities.iter().map(|l| l.priority).collect();
    let dense: BTreeMap<u32, u32> =
        distinct.into_iter().enumerate().map(|(index, p)| (p, index as u32)).collect();
    for locality in localities {
        locality.priority = dense.get(&locality.priority).copied().unwrap_or(0);
    }
}
