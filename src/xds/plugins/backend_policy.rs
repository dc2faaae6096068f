//! Connection settings attached to backends: connect timeout, load balancing,
//! circuit breakers and buffer limits.

use super::{expect_policy, PolicyPlugin, GANTRY_GROUP};
use crate::errors::{GantryError, Result};
use crate::ir::{BackendObjectIr, GroupKind, PolicyAtt, PolicyIr};
use chrono::{DateTime, Utc};
use envoy_types::pb::envoy::config::cluster::v3::circuit_breakers::Thresholds as CircuitThresholds;
use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    self, LbPolicy, LeastRequestLbConfig, MaglevLbConfig, RingHashLbConfig,
};
use envoy_types::pb::envoy::config::cluster::v3::{CircuitBreakers, Cluster};
use envoy_types::pb::envoy::config::core::v3::RoutingPriority;
use envoy_types::pb::google::protobuf::{Duration, UInt32Value, UInt64Value};
use serde::{Deserialize, Serialize};
use std::any::Any;
use tracing::debug;

const PLUGIN_NAME: &str = "backend-policy";

pub fn group_kind() -> GroupKind {
    GroupKind::new(GANTRY_GROUP, "BackendConfigPolicy")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum LoadBalancerConfig {
    RoundRobin,
    Random,
    LeastRequest {
        #[serde(default)]
        choice_count: Option<u32>,
    },
    RingHash {
        #[serde(default)]
        minimum_ring_size: Option<u64>,
        #[serde(default)]
        maximum_ring_size: Option<u64>,
    },
    Maglev {
        #[serde(default)]
        table_size: Option<u64>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub max_pending_requests: Option<u32>,
    #[serde(default)]
    pub max_requests: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakersConfig {
    #[serde(default)]
    pub default: Option<ThresholdsConfig>,
    #[serde(default)]
    pub high: Option<ThresholdsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfigPolicy {
    #[serde(default)]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerConfig>,
    #[serde(default)]
    pub circuit_breakers: Option<CircuitBreakersConfig>,
    #[serde(default)]
    pub per_connection_buffer_limit_bytes: Option<u32>,
}

impl PolicyIr for BackendConfigPolicy {
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

pub struct BackendPolicyPlugin;

impl PolicyPlugin for BackendPolicyPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn process_backend(
        &self,
        policy: &PolicyAtt,
        backend: &BackendObjectIr,
        out: &mut Cluster,
    ) -> Result<()> {
        let policy: &BackendConfigPolicy = expect_policy(PLUGIN_NAME, policy)?;

        if let Some(ms) = policy.connect_timeout_ms {
            if ms == 0 {
                return Err(GantryError::plugin(
                    PLUGIN_NAME,
                    format!("connect timeout for {} must be positive", backend.resource_name()),
                ));
            }
            out.connect_timeout = Some(millis_to_duration(ms));
        }

        if let Some(lb) = &policy.load_balancer {
            let (lb_policy, lb_config) = map_lb_policy(lb);
            out.lb_policy = lb_policy;
            out.lb_config = lb_config;
        }

        if let Some(cb) = &policy.circuit_breakers {
            let built = build_circuit_breakers(cb);
            if !built.thresholds.is_empty() {
                out.circuit_breakers = Some(built);
            }
        }

        if let Some(limit) = policy.per_connection_buffer_limit_bytes {
            out.per_connection_buffer_limit_bytes = uint32(Some(limit));
        }

        debug!(cluster = %out.name, "Applied backend config policy");
        Ok(())
    }
}

fn map_lb_policy(config: &LoadBalancerConfig) -> (i32, Option<cluster::LbConfig>) {
    match config {
        LoadBalancerConfig::RoundRobin => (LbPolicy::RoundRobin as i32, None),
        LoadBalancerConfig::Random => (LbPolicy::Random as i32, None),
        LoadBalancerConfig::LeastRequest { choice_count } => {
            let lb_config = LeastRequestLbConfig {
                choice_count: uint32(*choice_count),
                ..Default::default()
            };
            (
                LbPolicy::LeastRequest as i32,
                Some(cluster::LbConfig::LeastRequestLbConfig(lb_config)),
            )
        }
        LoadBalancerConfig::RingHash { minimum_ring_size, maximum_ring_size } => {
            let lb_config = RingHashLbConfig {
                minimum_ring_size: uint64(*minimum_ring_size),
                maximum_ring_size: uint64(*maximum_ring_size),
                ..Default::default()
            };
            (LbPolicy::RingHash as i32, Some(cluster::LbConfig::RingHashLbConfig(lb_config)))
        }
        LoadBalancerConfig::Maglev { table_size } => {
            let lb_config = MaglevLbConfig { table_size: uint64(*table_size), ..Default::default() };
            (LbPolicy::Maglev as i32, Some(cluster::LbConfig::MaglevLbConfig(lb_config)))
        }
    }
}

pub(crate) fn millis_to_duration(ms: u64) -> Duration {
    Duration { seconds: (ms / 1000) as i64, nanos: ((ms % 1000) * 1_000_000) as i32 }
}

fn uint32(value: Option<u32>) -> Option<UInt32Value> {
    value.map(|v| UInt32Value { value: v })
}

fn uint64(value: Option<u64>) -> Option<UInt64Value> {
    value.map(|v| UInt64Value { value: v })
}

fn build_circuit_breakers(config: &CircuitBreakersConfig) -> CircuitBreakers {
    let mut thresholds = Vec::new();

    if let Some(default) = &config.default {
        thresholds.push(build_threshold(default, RoutingPriority::Default));
    }

    if let Some(high) = &config.high {
        thresholds.push(build_threshold(high, RoutingPriority::High));
    }

    CircuitBreakers { thresholds, ..Default::default() }
}

fn build_threshold(config: &ThresholdsConfig, priority: RoutingPriority) -> CircuitThresholds {
    CircuitThresholds {
        priority: priority as i32,
        max_connections: uint32(config.max_connections),
        max_pending_requests: uint32(config.max_pending_requests),
        max_requests: uint32(config.max_requests),
        max_retries: uint32(config.max_retries),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ObjectSource;
    use std::sync::Arc;

    fn process(policy: BackendConfigPolicy) -> Result<Cluster> {
        let backend = BackendObjectIr::new(ObjectSource::new("", "Service", "default", "echo"), 80);
        let mut cluster = Cluster { name: backend.cluster_name(), ..Default::default() };
        BackendPolicyPlugin.process_backend(&PolicyAtt::new(Arc::new(policy)), &backend, &mut cluster)?;
        Ok(cluster)
    }

    #[test]
    fn connect_timeout_is_converted_from_millis() {
        let cluster = process(BackendConfigPolicy { connect_timeout_ms: Some(2500), ..Default::default() })
            .unwrap();
        let timeout = cluster.connect_timeout.unwrap();
        assert_eq!(timeout.seconds, 2);
        assert_eq!(timeout.nanos, 500_000_000);
    }

    #[test]
    fn zero_connect_timeout_is_rejected() {
        assert!(process(BackendConfigPolicy { connect_timeout_ms: Some(0), ..Default::default() })
            .is_err());
    }

    #[test]
    fn least_request_policy_sets_lb_config() {
        let cluster = process(BackendConfigPolicy {
            load_balancer: Some(LoadBalancerConfig::LeastRequest { choice_count: Some(3) }),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cluster.lb_policy, LbPolicy::LeastRequest as i32);
        match cluster.lb_config {
            Some(cluster::LbConfig::LeastRequestLbConfig(cfg)) => {
                assert_eq!(cfg.choice_count.map(|v| v.value), Some(3));
            }
            other => panic!("unexpected lb config {:?}", other),
        }
    }

    #[test]
    fn circuit_breakers_and_buffer_limit_are_applied() {
        let cluster = process(BackendConfigPolicy {
            circuit_breakers: Some(CircuitBreakersConfig {
                default: Some(ThresholdsConfig { max_connections: Some(100), ..Default::default() }),
                high: Some(ThresholdsConfig { max_requests: Some(50), ..Default::default() }),
            }),
            per_connection_buffer_limit_bytes: Some(32 * 1024),
            ..Default::default()
        })
        .unwrap();

        let thresholds = cluster.circuit_breakers.unwrap().thresholds;
        assert_eq!(thresholds.len(), 2);
        assert_eq!(thresholds[0].priority, RoutingPriority::Default as i32);
        assert_eq!(thresholds[0].max_connections.as_ref().map(|v| v.value), Some(100));
        assert_eq!(thresholds[1].priority, RoutingPriority::High as i32);
        assert_eq!(cluster.per_connection_buffer_limit_bytes.map(|v| v.value), Some(32 * 1024));
    }

    #[test]
    fn policy_deserializes_tagged_lb_config() {
        let policy: BackendConfigPolicy = serde_yaml::from_str(
            "load_balancer: { type: ring_hash, minimum_ring_size: 1024 }\nconnect_timeout_ms: 750\n",
        )
        .unwrap();
        assert_eq!(
            policy.load_balancer,
            Some(LoadBalancerConfig::RingHash { minimum_ring_size: Some(1024), maximum_ring_size: None })
        );
    }
}
