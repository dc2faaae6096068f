//! Total ordering for staged HTTP and network filters.
//!
//! A filter is placed relative to a [`WellKnownStage`] with a small weight.
//! Ties fall through to filter name, type URL, and config bytes, and finally
//! to the original position, so identical input always yields identical
//! output.

use envoy_types::pb::envoy::config::listener::v3::{filter, Filter};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_filter, HttpFilter,
};
use envoy_types::pb::google::protobuf::Any;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Declaration order is sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WellKnownStage {
    Fault,
    Cors,
    Waf,
    AuthN,
    AuthZ,
    RateLimit,
    Accepted,
    OutAuth,
    Route,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterStage {
    pub relative_to: WellKnownStage,
    pub weight: i32,
}

impl FilterStage {
    pub fn before(stage: WellKnownStage) -> Self {
        Self { relative_to: stage, weight: -1 }
    }

    pub fn during(stage: WellKnownStage) -> Self {
        Self { relative_to: stage, weight: 0 }
    }

    pub fn after(stage: WellKnownStage) -> Self {
        Self { relative_to: stage, weight: 1 }
    }
}

impl PartialOrd for FilterStage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilterStage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.relative_to.cmp(&other.relative_to).then(self.weight.cmp(&other.weight))
    }
}

/// Filter messages that can be staged.
pub trait StageableFilter {
    fn filter_name(&self) -> &str;

    fn typed_config(&self) -> Option<&Any>;
}

impl StageableFilter for HttpFilter {
    fn filter_name(&self) -> &str {
        &self.name
    }

    fn typed_config(&self) -> Option<&Any> {
        match &self.config_type {
            Some(http_filter::ConfigType::TypedConfig(any)) => Some(any),
            _ => None,
        }
    }
}

impl StageableFilter for Filter {
    fn filter_name(&self) -> &str {
        &self.name
    }

    fn typed_config(&self) -> Option<&Any> {
        match &self.config_type {
            Some(filter::ConfigType::TypedConfig(any)) => Some(any),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedFilter<F> {
    pub filter: F,
    pub stage: FilterStage,
}

pub type StagedHttpFilter = StagedFilter<HttpFilter>;
pub type StagedNetworkFilter = StagedFilter<Filter>;

impl<F: StageableFilter> StagedFilter<F> {
    pub fn new(filter: F, stage: FilterStage) -> Self {
        Self { filter, stage }
    }

    fn compare(&self, other: &Self) -> Ordering {
        let empty: &[u8] = &[];
        let (a_url, a_bytes) = self
            .filter
            .typed_config()
            .map(|any| (any.type_url.as_str(), any.value.as_slice()))
            .unwrap_or(("", empty));
        let (b_url, b_bytes) = other
            .filter
            .typed_config()
            .map(|any| (any.type_url.as_str(), any.value.as_slice()))
            .unwrap_or(("", empty));

        self.stage
            .cmp(&other.stage)
            .then_with(|| self.filter.filter_name().cmp(other.filter.filter_name()))
            .then_with(|| a_url.cmp(b_url))
            .then_with(|| a_bytes.cmp(b_bytes))
    }
}

impl StagedHttpFilter {
    /// Stage an HTTP filter carrying `config` as its typed config.
    pub fn http(name: impl Into<String>, config: Any, stage: FilterStage) -> Self {
        Self::new(
            HttpFilter {
                name: name.into(),
                config_type: Some(http_filter::ConfigType::TypedConfig(config)),
                ..Default::default()
            },
            stage,
        )
    }
}

impl StagedNetworkFilter {
    /// Stage a network filter carrying `config` as its typed config.
    pub fn network(name: impl Into<String>, config: Option<Any>, stage: FilterStage) -> Self {
        Self::new(
            Filter { name: name.into(), config_type: config.map(filter::ConfigType::TypedConfig) },
            stage,
        )
    }
}

/// Sort staged filters into their final order.
///
/// The sort is stable, so filters that compare equal keep their input order.
pub fn sort_staged<F: StageableFilter>(mut filters: Vec<StagedFilter<F>>) -> Vec<StagedFilter<F>> {
    filters.sort_by(|a, b| a.compare(b));
    filters
}

/// Sort and unwrap to bare filter messages.
pub fn sorted_filters<F: StageableFilter>(filters: Vec<StagedFilter<F>>) -> Vec<F> {
    sort_staged(filters).into_iter().map(|staged| staged.filter).collect()
}
