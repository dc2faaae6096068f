//! Status conditions produced during translation.
//!
//! Translation never fails as a whole; problems are recorded here against the
//! gateway, listener or route that caused them and handed to the status
//! writer.

use crate::ir::ObjectSource;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ConditionType {
    Accepted,
    Programmed,
    PartiallyInvalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConditionReason {
    Invalid,
    IncompatibleFilters,
    UnsupportedValue,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: bool,
    pub reason: ConditionReason,
    pub message: String,
}

impl Condition {
    pub fn new(
        condition_type: ConditionType,
        status: bool,
        reason: ConditionReason,
        message: impl Into<String>,
    ) -> Self {
        Self { condition_type, status, reason, message: message.into() }
    }
}

/// Conditions of one object, at most one per condition type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectReport {
    conditions: Vec<Condition>,
}

impl ObjectReport {
    /// Record a condition. A second condition of the same type and status
    /// appends its message; a different status replaces the old one.
    pub fn set_condition(&mut self, condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.condition_type == condition.condition_type) {
            Some(existing) if existing.status == condition.status => {
                if !existing.message.split("; ").any(|m| m == condition.message) {
                    existing.message = format!("{}; {}", existing.message, condition.message);
                }
            }
            Some(existing) => *existing = condition,
            None => {
                self.conditions.push(condition);
                self.conditions.sort_by_key(|c| c.condition_type);
            }
        }
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.condition_type == condition_type)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayReport {
    #[serde(flatten)]
    pub report: ObjectReport,
    pub listeners: BTreeMap<String, ObjectReport>,
}

/// All conditions of one translation, keyed by resource name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportMap {
    pub gateways: BTreeMap<String, GatewayReport>,
    /// route → parent gateway → report
    pub routes: BTreeMap<String, BTreeMap<String, ObjectReport>>,
}

impl ReportMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gateway(&mut self, gateway: &ObjectSource) -> &mut ObjectReport {
        &mut self.gateways.entry(gateway.resource_name()).or_default().report
    }

    pub fn listener(&mut self, gateway: &ObjectSource, listener: &str) -> &mut ObjectReport {
        self.gateways
            .entry(gateway.resource_name())
            .or_default()
            .listeners
            .entry(listener.to_string())
            .or_default()
    }

    pub fn route(&mut self, route: &ObjectSource, parent: &ObjectSource) -> &mut ObjectReport {
        self.routes
            .entry(route.resource_name())
            .or_default()
            .entry(parent.resource_name())
            .or_default()
    }

    pub fn get_route(&self, route: &ObjectSource, parent: &ObjectSource) -> Option<&ObjectReport> {
        self.routes.get(&route.resource_name())?.get(&parent.resource_name())
    }

    pub fn get_listener(&self, gateway: &ObjectSource, listener: &str) -> Option<&ObjectReport> {
        self.gateways.get(&gateway.resource_name())?.listeners.get(listener)
    }

    pub fn get_gateway(&self, gateway: &ObjectSource) -> Option<&ObjectReport> {
        self.gateways.get(&gateway.resource_name()).map(|g| &g.report)
    }

    /// Fold another report map into this one.
    pub fn merge(&mut self, other: &ReportMap) {
        for (gw, gw_report) in &other.gateways {
            let target = self.gateways.entry(gw.clone()).or_default();
            for condition in gw_report.report.conditions() {
                target.report.set_condition(condition.clone());
            }
            for (listener, report) in &gw_report.listeners {
                let listener_target = target.listeners.entry(listener.clone()).or_default();
                for condition in report.conditions() {
                    listener_target.set_condition(condition.clone());
                }
            }
        }
        for (route, parents) in &other.routes {
            let target = self.routes.entry(route.clone()).or_default();
            for (parent, report) in parents {
                let parent_target = target.entry(parent.clone()).or_default();
                for condition in report.conditions() {
                    parent_target.set_condition(condition.clone());
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty() && self.routes.is_empty()
    }
}
