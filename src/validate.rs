// src/validate.rs
//! Read-only structural checks over the merged collection.
//!
//! Every rule runs for every record; nothing short-circuits and nothing is
//! removed. Issues point back into the validated slice by index.

use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::Url;
use serde::Serialize;
use tracing::info;

use crate::template::{Template, TemplateKind};

pub const VALID_RESTART_POLICIES: &[&str] = &["no", "on-failure", "always", "unless-stopped"];
pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub record_index: usize,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub records: usize,
    pub errors: usize,
    pub warnings: usize,
    pub records_with_errors: usize,
    pub records_with_warnings: usize,
}

impl ValidationSummary {
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

type Rule = fn(&Template, &mut IssueSink<'_>);

/// Rule table, applied in this order to each record.
const RULES: &[(&str, Rule)] = &[
    ("required_fields", check_required),
    ("type_code", check_type_code),
    ("platform", check_platform),
    ("ports", check_ports),
    ("image_tag", check_image_tag),
    ("env", check_env),
    ("categories", check_categories),
    ("restart_policy", check_restart_policy),
    ("logo", check_logo),
    ("lengths", check_lengths),
];

struct IssueSink<'a> {
    index: usize,
    out: &'a mut Vec<ValidationIssue>,
}

impl IssueSink<'_> {
    fn push(&mut self, severity: Severity, field: &str, message: impl Into<String>) {
        self.out.push(ValidationIssue {
            severity,
            record_index: self.index,
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.push(Severity::Error, field, message);
    }

    fn warning(&mut self, field: &str, message: impl Into<String>) {
        self.push(Severity::Warning, field, message);
    }
}

/// Run all rules over `records`. Issues come out record by record, rule by rule.
pub fn validate(records: &[Template]) -> Vec<ValidationIssue> {
    let out = collect_issues(records);
    let summary = summarize(records.len(), &out);
    counter!("aggregator_validation_issues_total", "severity" => "error")
        .increment(summary.errors as u64);
    counter!("aggregator_validation_issues_total", "severity" => "warning")
        .increment(summary.warnings as u64);
    info!(
        records = records.len(),
        errors = summary.errors,
        warnings = summary.warnings,
        "validation finished"
    );
    out
}

/// Same issues as [`validate`], without counting them in metrics or logging.
/// For collections whose validation was already recorded.
pub fn collect_issues(records: &[Template]) -> Vec<ValidationIssue> {
    let mut out = Vec::new();
    for (index, t) in records.iter().enumerate() {
        let mut sink = IssueSink {
            index,
            out: &mut out,
        };
        for (_, rule) in RULES {
            rule(t, &mut sink);
        }
    }
    out
}

/// Issues of a single record, indexed as `index`.
pub fn validate_record(t: &Template, index: usize) -> Vec<ValidationIssue> {
    let mut out = Vec::new();
    let mut sink = IssueSink {
        index,
        out: &mut out,
    };
    for (_, rule) in RULES {
        rule(t, &mut sink);
    }
    out
}

pub fn summarize(records: usize, issues: &[ValidationIssue]) -> ValidationSummary {
    let mut s = ValidationSummary {
        records,
        ..ValidationSummary::default()
    };
    let mut err_recs = std::collections::BTreeSet::new();
    let mut warn_recs = std::collections::BTreeSet::new();
    for i in issues {
        match i.severity {
            Severity::Error => {
                s.errors += 1;
                err_recs.insert(i.record_index);
            }
            Severity::Warning => {
                s.warnings += 1;
                warn_recs.insert(i.record_index);
            }
        }
    }
    s.records_with_errors = err_recs.len();
    s.records_with_warnings = warn_recs.len();
    s
}

fn check_required(t: &Template, sink: &mut IssueSink<'_>) {
    if t.title.trim().is_empty() {
        sink.error("title", "Required field 'title' is missing or empty");
    }
    match t.kind() {
        TemplateKind::Container | TemplateKind::Swarm => {
            if t.image().map_or(true, |i| i.trim().is_empty()) {
                sink.error("image", "Required field 'image' is missing or empty");
            }
        }
        TemplateKind::Stack => {
            if t.repository().map_or(true, |r| r.url.trim().is_empty()) {
                sink.error("repository", "Stack template needs a non-empty 'repository.url'");
            }
        }
    }
}

fn check_type_code(t: &Template, sink: &mut IssueSink<'_>) {
    if let Some(declared) = &t.declared_type {
        sink.error("type", format!("Template type {declared} is not one of 1, 2, 3"));
    }
}

fn check_platform(t: &Template, sink: &mut IssueSink<'_>) {
    match &t.platform {
        None => sink.warning("platform", "Platform is not set (expected 'linux' or 'windows')"),
        Some(p) if !p.is_known() => sink.error(
            "platform",
            format!("Platform '{p}' is not one of 'linux', 'windows'"),
        ),
        Some(_) => {}
    }
}

fn port_patterns() -> &'static (Regex, Regex) {
    static RE: OnceCell<(Regex, Regex)> = OnceCell::new();
    RE.get_or_init(|| {
        (
            Regex::new(r"^\d+:\d+(/tcp|/udp)?$").unwrap(),
            Regex::new(r"^\d+(/tcp|/udp)?$").unwrap(),
        )
    })
}

fn check_ports(t: &Template, sink: &mut IssueSink<'_>) {
    let (mapped, bare) = port_patterns();
    for (i, port) in t.ports().iter().enumerate() {
        if mapped.is_match(port) {
            continue;
        }
        if bare.is_match(port) {
            sink.warning(
                "ports",
                format!("Port '{port}' at index {i} has no host port mapping"),
            );
        } else {
            sink.warning("ports", format!("Port '{port}' at index {i} has invalid format"));
        }
    }
}

/// Tag of an image reference, ignoring a registry host port like `localhost:5000/app`.
fn image_tag(image: &str) -> Option<&str> {
    let last = image.rsplit('/').next().unwrap_or(image);
    let last = last.split('@').next().unwrap_or(last);
    last.split_once(':').map(|(_, tag)| tag)
}

fn check_image_tag(t: &Template, sink: &mut IssueSink<'_>) {
    let Some(image) = t.image().map(str::trim).filter(|i| !i.is_empty()) else {
        return;
    };
    if image.contains('@') {
        return; // pinned by digest
    }
    match image_tag(image) {
        None => sink.warning(
            "image",
            format!("Image '{image}' should specify a tag (e.g. 'nginx:1.25')"),
        ),
        Some("latest") => sink.warning(
            "image",
            format!("Image '{image}' uses the floating ':latest' tag"),
        ),
        Some(_) => {}
    }
}

fn check_env(t: &Template, sink: &mut IssueSink<'_>) {
    for (i, var) in t.env.iter().enumerate() {
        if var.name.trim().is_empty() {
            sink.error("env", format!("Environment variable at index {i} missing 'name'"));
        }
        if var.label.trim().is_empty() {
            sink.warning(
                "env",
                format!("Environment variable at index {i} has no 'label'"),
            );
        }
    }
}

fn check_categories(t: &Template, sink: &mut IssueSink<'_>) {
    if t.categories.is_empty() {
        sink.warning("categories", "Template should have at least one category");
    }
}

fn check_restart_policy(t: &Template, sink: &mut IssueSink<'_>) {
    let Some(policy) = t.container().and_then(|c| c.restart_policy.as_deref()) else {
        return;
    };
    if !VALID_RESTART_POLICIES.contains(&policy) {
        sink.warning(
            "restart_policy",
            format!("Restart policy '{policy}' not in {VALID_RESTART_POLICIES:?}"),
        );
    }
}

fn check_logo(t: &Template, sink: &mut IssueSink<'_>) {
    let Some(logo) = t.logo.as_deref() else {
        return;
    };
    let ok = Url::parse(logo)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false);
    if !ok {
        sink.warning("logo", format!("Logo URL '{logo}' appears to be invalid"));
    }
}

fn check_lengths(t: &Template, sink: &mut IssueSink<'_>) {
    if t.title.chars().count() > MAX_TITLE_CHARS {
        sink.warning(
            "title",
            format!("Title is very long (>{MAX_TITLE_CHARS} characters)"),
        );
    }
    if t.description.chars().count() > MAX_DESCRIPTION_CHARS {
        sink.warning(
            "description",
            format!("Description is very long (>{MAX_DESCRIPTION_CHARS} characters)"),
        );
    }
}
