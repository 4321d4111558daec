// src/normalize/mod.rs
//! Normalization of source payloads into canonical [`Template`]s.
//!
//! Accepted payload shapes: a bare array of records, an object with a `templates`
//! array, or a single record object. Each record is mapped through the alias table
//! in [`aliases`]; records missing what their kind requires are dropped with a
//! [`NormalizeWarning`] instead of being emitted half-filled.

pub mod aliases;

use metrics::counter;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ingest::types::RawPayload;
use crate::template::{
    dedup_key, ContainerSpec, DeclaredType, EnvVar, Platform, Repository, SourceAttribution, StackSpec,
    Template, TemplateKind, TemplateSpec, Volume,
};
use aliases::{lookup, lookup_keys, CanonicalField, ENV_DEFAULT_ALIASES};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeWarning {
    #[error("{source_name}: invalid JSON: {message}")]
    Parse {
        source_name: String,
        message: String,
    },
    #[error("{source_name}: unexpected payload shape ({found})")]
    UnexpectedShape {
        source_name: String,
        found: &'static str,
    },
    #[error("{source_name}: record {index} is not an object")]
    NotAnObject { source_name: String, index: usize },
    #[error("{source_name}: record {index} has no title or name")]
    MissingTitle { source_name: String, index: usize },
    #[error("{source_name}: record {index} ('{title}') is a {kind} template without an image")]
    MissingImage {
        source_name: String,
        index: usize,
        title: String,
        kind: &'static str,
    },
    #[error("{source_name}: record {index} ('{title}') is a stack template without a repository url")]
    MissingRepository {
        source_name: String,
        index: usize,
        title: String,
    },
}

/// Records emitted for one source plus the reasons anything was left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub templates: Vec<Template>,
    pub warnings: Vec<NormalizeWarning>,
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalize a fetched payload; failed fetches contribute nothing.
pub fn normalize_payload(payload: &RawPayload) -> Normalized {
    match &payload.body {
        Some(body) if payload.is_success() => {
            let source = SourceAttribution {
                name: payload.source_name.clone(),
                url: payload.source_url.clone(),
            };
            normalize(&source, body)
        }
        _ => Normalized::default(),
    }
}

/// Parse `body` as JSON and turn every record in it into a canonical template.
pub fn normalize(source: &SourceAttribution, body: &[u8]) -> Normalized {
    let value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            let w = NormalizeWarning::Parse {
                source_name: source.name.clone(),
                message: e.to_string(),
            };
            warn!(source = %source.name, error = %e, "payload is not valid JSON");
            return Normalized {
                templates: Vec::new(),
                warnings: vec![w],
            };
        }
    };
    normalize_value(source, &value)
}

/// Same as [`normalize`] for an already-parsed document. Every record is
/// attributed to `source`, whatever `_source` it carries.
pub fn normalize_value(source: &SourceAttribution, value: &Value) -> Normalized {
    normalize_document(source, value, false)
}

/// Reads back a merged collection: a record's embedded `_source` is kept, and
/// `fallback` is used only for records without one.
pub fn normalize_merged_value(fallback: &SourceAttribution, value: &Value) -> Normalized {
    normalize_document(fallback, value, true)
}

fn normalize_document(source: &SourceAttribution, value: &Value, keep_embedded: bool) -> Normalized {
    let records: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => match obj.get("templates") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(other) => {
                warn!(source = %source.name, found = json_kind(other), "'templates' is not an array");
                return Normalized {
                    templates: Vec::new(),
                    warnings: vec![NormalizeWarning::UnexpectedShape {
                        source_name: source.name.clone(),
                        found: json_kind(other),
                    }],
                };
            }
            None => vec![value],
        },
        other => {
            warn!(source = %source.name, found = json_kind(other), "unexpected payload shape");
            return Normalized {
                templates: Vec::new(),
                warnings: vec![NormalizeWarning::UnexpectedShape {
                    source_name: source.name.clone(),
                    found: json_kind(other),
                }],
            };
        }
    };

    let mut out = Normalized::default();
    for (index, raw) in records.into_iter().enumerate() {
        match record_to_template(source, index, raw, keep_embedded) {
            Ok(t) => out.templates.push(t),
            Err(w) => {
                warn!(source = %source.name, index, reason = %w, "dropping record");
                out.warnings.push(w);
            }
        }
    }

    counter!("aggregator_records_normalized_total").increment(out.templates.len() as u64);
    counter!("aggregator_records_dropped_total").increment(out.warnings.len() as u64);
    debug!(
        source = %source.name,
        kept = out.templates.len(),
        dropped = out.warnings.len(),
        "normalized source"
    );
    out
}

/// Map one raw record to a [`Template`] attributed to `source`, or explain why it cannot be one.
pub fn normalize_record(
    source: &SourceAttribution,
    index: usize,
    raw: &Value,
) -> Result<Template, NormalizeWarning> {
    record_to_template(source, index, raw, false)
}

fn record_to_template(
    source: &SourceAttribution,
    index: usize,
    raw: &Value,
    keep_embedded: bool,
) -> Result<Template, NormalizeWarning> {
    let record = raw.as_object().ok_or_else(|| NormalizeWarning::NotAnObject {
        source_name: source.name.clone(),
        index,
    })?;

    let title = text(record, CanonicalField::Title).ok_or_else(|| {
        NormalizeWarning::MissingTitle {
            source_name: source.name.clone(),
            index,
        }
    })?;

    let (kind, declared_type) = match lookup(record, CanonicalField::Type).map(declared_kind) {
        Some(Ok(kind)) => (kind, None),
        Some(Err(declared)) => (TemplateKind::Container, Some(declared)),
        None => (TemplateKind::Container, None),
    };

    let spec = match kind {
        TemplateKind::Stack => {
            let repository = lookup(record, CanonicalField::Repository)
                .and_then(repository)
                .ok_or_else(|| NormalizeWarning::MissingRepository {
                    source_name: source.name.clone(),
                    index,
                    title: title.clone(),
                })?;
            TemplateSpec::Stack(StackSpec { repository })
        }
        TemplateKind::Container | TemplateKind::Swarm => {
            let image = text(record, CanonicalField::Image).ok_or_else(|| {
                NormalizeWarning::MissingImage {
                    source_name: source.name.clone(),
                    index,
                    title: title.clone(),
                    kind: kind.label(),
                }
            })?;
            let c = container_spec(record, image);
            if kind == TemplateKind::Swarm {
                TemplateSpec::Swarm(c)
            } else {
                TemplateSpec::Container(c)
            }
        }
    };

    Ok(Template {
        dedup_key: dedup_key(&title),
        title,
        name: text(record, CanonicalField::Name),
        description: text(record, CanonicalField::Description).unwrap_or_default(),
        note: text(record, CanonicalField::Note),
        categories: lookup(record, CanonicalField::Categories)
            .map(categories)
            .unwrap_or_default(),
        platform: text(record, CanonicalField::Platform).map(|p| Platform::parse(&p)),
        logo: text(record, CanonicalField::Logo),
        env: lookup(record, CanonicalField::Env)
            .map(env_vars)
            .unwrap_or_default(),
        declared_type,
        spec,
        source: lookup(record, CanonicalField::Source)
            .filter(|_| keep_embedded)
            .and_then(embedded_source)
            .unwrap_or_else(|| source.clone()),
    })
}

fn container_spec(record: &Map<String, Value>, image: String) -> ContainerSpec {
    ContainerSpec {
        image,
        ports: lookup(record, CanonicalField::Ports)
            .map(ports)
            .unwrap_or_default(),
        volumes: lookup(record, CanonicalField::Volumes)
            .map(volumes)
            .unwrap_or_default(),
        restart_policy: text(record, CanonicalField::RestartPolicy),
        command: text(record, CanonicalField::Command),
        hostname: text(record, CanonicalField::Hostname),
        network: text(record, CanonicalField::Network),
        privileged: lookup(record, CanonicalField::Privileged).is_some_and(flag),
        interactive: lookup(record, CanonicalField::Interactive).is_some_and(flag),
    }
}

/// Scalars as trimmed text; arrays/objects are not text.
fn scalar_text(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn text(record: &Map<String, Value>, field: CanonicalField) -> Option<String> {
    lookup(record, field).and_then(scalar_text)
}

/// Kind named by a raw `type`, or the value itself when it names none.
fn declared_kind(v: &Value) -> Result<TemplateKind, DeclaredType> {
    let code = match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    match code {
        Some(c) => TemplateKind::from_code(c).ok_or(DeclaredType::Code(c)),
        None => Err(DeclaredType::Invalid(
            scalar_text(v).unwrap_or_else(|| v.to_string()),
        )),
    }
}

fn flag(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}

fn categories(v: &Value) -> Vec<String> {
    let raw: Vec<String> = match v {
        Value::Array(items) => items.iter().filter_map(scalar_text).collect(),
        other => scalar_text(other).into_iter().collect(),
    };
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for c in raw {
        if !out.contains(&c) {
            out.push(c);
        }
    }
    out
}

// {"80/tcp": "8080"} means host 8080 -> container 80/tcp
fn push_port_mapping(out: &mut Vec<String>, obj: &Map<String, Value>) {
    for (container, host) in obj {
        match scalar_text(host) {
            Some(h) => out.push(format!("{h}:{container}")),
            None => out.push(container.trim().to_string()),
        }
    }
}

fn ports(v: &Value) -> Vec<String> {
    let mut out = Vec::new();
    let items: Vec<&Value> = match v {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    for item in items {
        match item {
            Value::Object(obj) => push_port_mapping(&mut out, obj),
            other => out.extend(scalar_text(other)),
        }
    }
    out
}

/// `"host:container"`, `"host:container:ro"` or a bare `"container"` path.
pub fn parse_volume_spec(spec: &str) -> Option<Volume> {
    let spec = spec.trim();
    if spec.is_empty() {
        return None;
    }
    let mut parts: Vec<&str> = spec.split(':').collect();
    let mut readonly = false;
    if parts.len() >= 3 {
        match parts.last().copied() {
            Some("ro") => {
                readonly = true;
                parts.pop();
            }
            Some("rw") => {
                parts.pop();
            }
            _ => {}
        }
    }
    let container = parts.pop()?.trim().to_string();
    if container.is_empty() {
        return None;
    }
    let bind = parts.join(":");
    let bind = bind.trim();
    Some(Volume {
        container,
        bind: (!bind.is_empty()).then(|| bind.to_string()),
        readonly,
    })
}

fn volumes(v: &Value) -> Vec<Volume> {
    let items: Vec<&Value> = match v {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => parse_volume_spec(s),
            Value::Object(obj) => {
                let container = obj.get("container").and_then(scalar_text)?;
                Some(Volume {
                    container,
                    bind: obj.get("bind").and_then(scalar_text),
                    readonly: obj.get("readonly").is_some_and(flag),
                })
            }
            _ => None,
        })
        .collect()
}

fn env_entry(item: &Value) -> EnvVar {
    match item {
        Value::Object(obj) => EnvVar {
            name: obj.get("name").and_then(scalar_text).unwrap_or_default(),
            label: obj.get("label").and_then(scalar_text).unwrap_or_default(),
            default: lookup_keys(obj, ENV_DEFAULT_ALIASES).and_then(scalar_text),
            description: obj.get("description").and_then(scalar_text),
        },
        Value::String(s) => {
            let (name, default) = match s.split_once('=') {
                Some((n, d)) => (n.trim(), Some(d.trim()).filter(|d| !d.is_empty())),
                None => (s.trim(), None),
            };
            EnvVar {
                name: name.to_string(),
                label: String::new(),
                default: default.map(str::to_string),
                description: None,
            }
        }
        _ => EnvVar {
            name: String::new(),
            label: String::new(),
            default: None,
            description: None,
        },
    }
}

fn env_vars(v: &Value) -> Vec<EnvVar> {
    match v {
        Value::Array(items) => items.iter().map(env_entry).collect(),
        // compose-style map: {"TZ": "UTC"}
        Value::Object(obj) => obj
            .iter()
            .map(|(name, default)| EnvVar {
                name: name.trim().to_string(),
                label: String::new(),
                default: scalar_text(default),
                description: None,
            })
            .collect(),
        other => vec![env_entry(other)],
    }
}

fn repository(v: &Value) -> Option<Repository> {
    let obj = v.as_object()?;
    let url = obj.get("url").and_then(scalar_text)?;
    Some(Repository {
        url,
        stackfile: obj
            .get("stackfile")
            .and_then(scalar_text)
            .unwrap_or_default(),
    })
}

fn embedded_source(v: &Value) -> Option<SourceAttribution> {
    let obj = v.as_object()?;
    Some(SourceAttribution {
        name: obj.get("name").and_then(scalar_text)?,
        url: obj.get("url").and_then(scalar_text).unwrap_or_default(),
    })
}
