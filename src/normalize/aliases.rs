// src/normalize/aliases.rs
//! Field-alias table: which raw keys feed which canonical field, in priority order.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    Type,
    Title,
    Name,
    Description,
    Note,
    Categories,
    Platform,
    Logo,
    Image,
    Ports,
    Volumes,
    Env,
    RestartPolicy,
    Repository,
    Command,
    Hostname,
    Network,
    Privileged,
    Interactive,
    Source,
}

/// First alias present wins. `name` doubles as a title fallback.
pub const FIELD_ALIASES: &[(CanonicalField, &[&str])] = &[
    (CanonicalField::Type, &["type"]),
    (CanonicalField::Title, &["title", "name"]),
    (CanonicalField::Name, &["name"]),
    (CanonicalField::Description, &["description"]),
    (CanonicalField::Note, &["note"]),
    (CanonicalField::Categories, &["categories", "category"]),
    (CanonicalField::Platform, &["platform"]),
    (CanonicalField::Logo, &["logo"]),
    (CanonicalField::Image, &["image"]),
    (CanonicalField::Ports, &["ports"]),
    (CanonicalField::Volumes, &["volumes"]),
    (CanonicalField::Env, &["env", "environment"]),
    (CanonicalField::RestartPolicy, &["restart_policy", "restart"]),
    (CanonicalField::Repository, &["repository"]),
    (CanonicalField::Command, &["command"]),
    (CanonicalField::Hostname, &["hostname"]),
    (CanonicalField::Network, &["network"]),
    (CanonicalField::Privileged, &["privileged"]),
    (CanonicalField::Interactive, &["interactive"]),
    (CanonicalField::Source, &["_source"]),
];

/// Aliases accepted inside a single env entry.
pub const ENV_DEFAULT_ALIASES: &[&str] = &["default", "value"];

pub fn aliases_of(field: CanonicalField) -> &'static [&'static str] {
    FIELD_ALIASES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, a)| *a)
        .unwrap_or(&[])
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Raw value of `field`: the first alias holding something other than null or a blank string.
pub fn lookup(record: &Map<String, Value>, field: CanonicalField) -> Option<&Value> {
    lookup_keys(record, aliases_of(field))
}

pub fn lookup_keys<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find(|v| !is_blank(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn every_field_has_aliases() {
        for (field, aliases) in FIELD_ALIASES {
            assert!(!aliases.is_empty(), "{field:?} has no alias");
        }
    }

    #[test]
    fn title_prefers_title_over_name() {
        let r = obj(json!({"name": "redis", "title": "Redis"}));
        assert_eq!(lookup(&r, CanonicalField::Title), Some(&json!("Redis")));
    }

    #[test]
    fn blank_alias_falls_through() {
        let r = obj(json!({"title": "  ", "name": "redis"}));
        assert_eq!(lookup(&r, CanonicalField::Title), Some(&json!("redis")));
        let r = obj(json!({"restart_policy": null, "restart": "always"}));
        assert_eq!(
            lookup(&r, CanonicalField::RestartPolicy),
            Some(&json!("always"))
        );
    }

    #[test]
    fn missing_field_is_none() {
        let r = obj(json!({"title": "x"}));
        assert!(lookup(&r, CanonicalField::Image).is_none());
    }
}
