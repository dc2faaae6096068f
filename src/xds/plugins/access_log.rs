//! HTTP access logging attached to listeners.
//!
//! Each policy carries one or more file sinks with an optional text or JSON
//! format and an optional filter tree. Logs are appended to the HCM of every
//! filter chain the policy reaches.

use super::{
    expect_policy, HcmContext, PassContext, PolicyPlugin, ProxyTranslationPass, GANTRY_GROUP,
};
use crate::errors::{GantryError, Result};
use crate::ir::{GroupKind, HeaderMatch, PolicyIr};
use crate::xds::filters::{any_from_message, names, type_urls};
use crate::xds::translator::route::header_matcher;
use chrono::{DateTime, Utc};
use envoy_types::pb::envoy::config::accesslog::v3::{
    access_log, access_log_filter::FilterSpecifier, comparison_filter, AccessLog, AccessLogFilter,
    AndFilter, ComparisonFilter, DurationFilter, HeaderFilter, NotHealthCheckFilter, OrFilter,
    ResponseFlagFilter, StatusCodeFilter, TraceableFilter,
};
use envoy_types::pb::envoy::config::core::v3::{
    data_source, substitution_format_string, DataSource, RuntimeUInt32, SubstitutionFormatString,
};
use envoy_types::pb::envoy::extensions::access_loggers::file::v3::{
    file_access_log::AccessLogFormat, FileAccessLog,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpConnectionManager;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;

const PLUGIN_NAME: &str = "access-log";

pub fn group_kind() -> GroupKind {
    GroupKind::new(GANTRY_GROUP, "AccessLogPolicy")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessLogPolicy {
    #[serde(default)]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub access_logs: Vec<AccessLogConfig>,
}

impl PolicyIr for AccessLogPolicy {
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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessLogConfig {
    #[serde(default)]
    pub file_sink: Option<FileSink>,
    #[serde(default)]
    pub filter: Option<AccessLogFilterConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSink {
    /// Falls back to the translator's default access log path
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub string_format: Option<String>,
    #[serde(default)]
    pub json_format: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComparisonOp {
    Eq,
    Ge,
    Le,
}

impl From<ComparisonOp> for comparison_filter::Op {
    fn from(op: ComparisonOp) -> Self {
        match op {
            ComparisonOp::Eq => comparison_filter::Op::Eq,
            ComparisonOp::Ge => comparison_filter::Op::Ge,
            ComparisonOp::Le => comparison_filter::Op::Le,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    pub op: ComparisonOp,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLogFilterConfig {
    StatusCode(Comparison),
    Duration(Comparison),
    NotHealthCheck,
    Traceable,
    ResponseFlags(Vec<String>),
    Header(HeaderMatch),
    And(Vec<AccessLogFilterConfig>),
    Or(Vec<AccessLogFilterConfig>),
}

pub struct AccessLogPlugin;

impl PolicyPlugin for AccessLogPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn new_gateway_translation_pass(&self, ctx: PassContext<'_>) -> Box<dyn ProxyTranslationPass> {
        Box::new(AccessLogPass { default_path: ctx.config.default_access_log_path.clone() })
    }
}

struct AccessLogPass {
    default_path: String,
}

impl ProxyTranslationPass for AccessLogPass {
    fn apply_hcm(&mut self, ctx: &HcmContext<'_>, out: &mut HttpConnectionManager) -> Result<()> {
        let policy: &AccessLogPolicy = expect_policy(PLUGIN_NAME, ctx.policy)?;
        for config in &policy.access_logs {
            out.access_log.push(translate_access_log(config, &self.default_path)?);
        }
        Ok(())
    }
}

/// Build one Envoy access log from its policy form.
pub fn translate_access_log(config: &AccessLogConfig, default_path: &str) -> Result<AccessLog> {
    let sink = config
        .file_sink
        .as_ref()
        .ok_or_else(|| GantryError::plugin(PLUGIN_NAME, "access log requires a file sink"))?;
    let path = sink.path.clone().unwrap_or_else(|| default_path.to_string());

    let typed_config = match (&sink.string_format, &sink.json_format) {
        (Some(_), Some(_)) => {
            return Err(GantryError::plugin(
                PLUGIN_NAME,
                "only one of string_format or json_format may be set on a file sink",
            ))
        }
        (None, Some(json)) => {
            let serde_json::Value::Object(fields) = json else {
                return Err(GantryError::plugin(PLUGIN_NAME, "json_format must be an object"));
            };
            let file_access_log = JsonFileAccessLog {
                path,
                log_format: Some(JsonLogFormat { json_format: Some(SortedStruct::from_json(fields)) }),
            };
            any_from_message(type_urls::FILE_ACCESS_LOG, &file_access_log)
        }
        (text, None) => {
            let file_access_log = FileAccessLog {
                path,
                access_log_format: text.as_ref().map(|text| {
                    AccessLogFormat::LogFormat(SubstitutionFormatString {
                        format: Some(substitution_format_string::Format::TextFormatSource(
                            DataSource {
                                specifier: Some(data_source::Specifier::InlineString(text.clone())),
                                ..Default::default()
                            },
                        )),
                        ..Default::default()
                    })
                }),
            };
            any_from_message(type_urls::FILE_ACCESS_LOG, &file_access_log)
        }
    };

    Ok(AccessLog {
        name: names::FILE_ACCESS_LOG.to_string(),
        filter: config.filter.as_ref().map(translate_filter).transpose()?,
        config_type: Some(access_log::ConfigType::TypedConfig(typed_config)),
    })
}

// Wire-compatible subset of `FileAccessLog` carrying a JSON log format.
// `google.protobuf.Struct` keeps its fields in a HashMap, whose encoding order
// changes between runs; these mirrors encode the fields sorted by key.

#[derive(Clone, PartialEq, prost::Message)]
struct JsonFileAccessLog {
    #[prost(string, tag = "1")]
    path: String,
    /// `FileAccessLog.log_format`
    #[prost(message, optional, tag = "5")]
    log_format: Option<JsonLogFormat>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct JsonLogFormat {
    /// `SubstitutionFormatString.json_format`
    #[prost(message, optional, tag = "2")]
    json_format: Option<SortedStruct>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SortedStruct {
    #[prost(btree_map = "string, message", tag = "1")]
    fields: BTreeMap<String, SortedValue>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SortedValue {
    #[prost(oneof = "SortedKind", tags = "1, 2, 3, 4, 5, 6")]
    kind: Option<SortedKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
enum SortedKind {
    #[prost(int32, tag = "1")]
    Null(i32),
    #[prost(double, tag = "2")]
    Number(f64),
    #[prost(string, tag = "3")]
    String(String),
    #[prost(bool, tag = "4")]
    Bool(bool),
    #[prost(message, tag = "5")]
    Struct(SortedStruct),
    #[prost(message, tag = "6")]
    List(SortedList),
}

#[derive(Clone, PartialEq, prost::Message)]
struct SortedList {
    #[prost(message, repeated, tag = "1")]
    values: Vec<SortedValue>,
}

impl SortedStruct {
    fn from_json(fields: &serde_json::Map<String, serde_json::Value>) -> Self {
        Self { fields: fields.iter().map(|(k, v)| (k.clone(), SortedValue::from_json(v))).collect() }
    }
}

impl SortedValue {
    fn from_json(value: &serde_json::Value) -> Self {
        let kind = match value {
            serde_json::Value::Null => SortedKind::Null(0),
            serde_json::Value::Bool(b) => SortedKind::Bool(*b),
            serde_json::Value::Number(n) => SortedKind::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => SortedKind::String(s.clone()),
            serde_json::Value::Array(items) => {
                SortedKind::List(SortedList { values: items.iter().map(Self::from_json).collect() })
            }
            serde_json::Value::Object(obj) => SortedKind::Struct(SortedStruct::from_json(obj)),
        };
        Self { kind: Some(kind) }
    }
}

fn comparison(runtime_key: &str, cmp: &Comparison) -> ComparisonFilter {
    ComparisonFilter {
        op: comparison_filter::Op::from(cmp.op) as i32,
        value: Some(RuntimeUInt32 { default_value: cmp.value, runtime_key: runtime_key.to_string() }),
    }
}

fn translate_filter(filter: &AccessLogFilterConfig) -> Result<AccessLogFilter> {
    let specifier = match filter {
        AccessLogFilterConfig::StatusCode(cmp) => FilterSpecifier::StatusCodeFilter(StatusCodeFilter {
            comparison: Some(comparison("access_log.status_code_filter", cmp)),
        }),
        AccessLogFilterConfig::Duration(cmp) => FilterSpecifier::DurationFilter(DurationFilter {
            comparison: Some(comparison("access_log.duration_filter", cmp)),
        }),
        AccessLogFilterConfig::NotHealthCheck => {
            FilterSpecifier::NotHealthCheckFilter(NotHealthCheckFilter {})
        }
        AccessLogFilterConfig::Traceable => FilterSpecifier::TraceableFilter(TraceableFilter {}),
        AccessLogFilterConfig::ResponseFlags(flags) => {
            FilterSpecifier::ResponseFlagFilter(ResponseFlagFilter { flags: flags.clone() })
        }
        AccessLogFilterConfig::Header(header) => {
            FilterSpecifier::HeaderFilter(HeaderFilter { header: Some(header_matcher(header)) })
        }
        AccessLogFilterConfig::And(filters) => {
            FilterSpecifier::AndFilter(AndFilter { filters: translate_group("and", filters)? })
        }
        AccessLogFilterConfig::Or(filters) => {
            FilterSpecifier::OrFilter(OrFilter { filters: translate_group("or", filters)? })
        }
    };
    Ok(AccessLogFilter { filter_specifier: Some(specifier) })
}

fn translate_group(op: &str, filters: &[AccessLogFilterConfig]) -> Result<Vec<AccessLogFilter>> {
    if filters.len() < 2 {
        return Err(GantryError::plugin(
            PLUGIN_NAME,
            format!("'{}' access log filter needs at least two filters", op),
        ));
    }
    filters.iter().map(translate_filter).collect()
}
