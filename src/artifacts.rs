// src/artifacts.rs
//! On-disk artifacts written between stages: per-source snapshots, the merged
//! collection, statistics, the validation report and a Markdown summary.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::ingest::types::{FetchStatus, RawPayload, Source};
use crate::normalize::{normalize_merged_value, NormalizeWarning};
use crate::report::Report;
use crate::template::{SourceAttribution, Template};
use crate::validate::{ValidationIssue, ValidationSummary};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotMeta {
    source_name: String,
    source_url: String,
    fetched_at: DateTime<Utc>,
    status: FetchStatus,
    #[serde(default)]
    error: Option<String>,
}

/// `body` holds the payload when it is JSON; anything else is kept verbatim in `body_raw`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    #[serde(rename = "_metadata")]
    metadata: SnapshotMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body_raw: Option<String>,
}

/// File-system safe stem for a source name.
pub fn snapshot_file_name(source_name: &str) -> String {
    let stem: String = source_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}.json")
}

fn ensure_parent(path: &Path) -> Result<(), PipelineError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    }
    Ok(())
}

/// Pretty-print `value` to `path`, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    fs::write(path, bytes).map_err(|e| PipelineError::io(path, e))?;
    debug!(path = %path.display(), "wrote artifact");
    Ok(())
}

fn read_json(path: &Path) -> Result<Value, PipelineError> {
    let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn write_raw_snapshot(dir: &Path, payload: &RawPayload) -> Result<PathBuf, PipelineError> {
    let (body, body_raw) = match &payload.body {
        Some(bytes) => match serde_json::from_slice::<Value>(bytes) {
            Ok(v) => (Some(v), None),
            Err(_) => (None, Some(String::from_utf8_lossy(bytes).into_owned())),
        },
        None => (None, None),
    };
    let snapshot = Snapshot {
        metadata: SnapshotMeta {
            source_name: payload.source_name.clone(),
            source_url: payload.source_url.clone(),
            fetched_at: payload.fetched_at,
            status: payload.status,
            error: payload.error.clone(),
        },
        body,
        body_raw,
    };
    let path = dir.join(snapshot_file_name(&payload.source_name));
    write_json(&path, &snapshot)?;
    Ok(path)
}

pub fn write_raw_snapshots(
    dir: &Path,
    payloads: &BTreeMap<String, RawPayload>,
) -> Result<(), PipelineError> {
    for payload in payloads.values() {
        write_raw_snapshot(dir, payload)?;
    }
    info!(dir = %dir.display(), files = payloads.len(), "saved source snapshots");
    Ok(())
}

pub fn read_raw_snapshot(path: &Path) -> Result<RawPayload, PipelineError> {
    let snapshot: Snapshot = serde_json::from_value(read_json(path)?)?;
    let body = match (snapshot.body, snapshot.body_raw) {
        (Some(v), _) => Some(serde_json::to_vec(&v)?),
        (None, Some(raw)) => Some(raw.into_bytes()),
        (None, None) => None,
    };
    let m = snapshot.metadata;
    Ok(RawPayload {
        source_name: m.source_name,
        source_url: m.source_url,
        fetched_at: m.fetched_at,
        status: m.status,
        body,
        error: m.error,
    })
}

/// Snapshots of `sources`, keyed by source name. Sources never fetched are skipped.
pub fn read_raw_snapshots(
    dir: &Path,
    sources: &[Source],
) -> Result<BTreeMap<String, RawPayload>, PipelineError> {
    let mut out = BTreeMap::new();
    for source in sources {
        let path = dir.join(snapshot_file_name(&source.name));
        if !path.exists() {
            warn!(source = %source.name, path = %path.display(), "no snapshot for source");
            continue;
        }
        out.insert(source.name.clone(), read_raw_snapshot(&path)?);
    }
    Ok(out)
}

#[derive(Serialize)]
struct MergedOut<'a> {
    version: &'a str,
    templates: &'a [Template],
}

pub fn write_merged(path: &Path, version: &str, templates: &[Template]) -> Result<(), PipelineError> {
    write_json(path, &MergedOut { version, templates })?;
    info!(path = %path.display(), templates = templates.len(), "saved merged collection");
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct MergedArtifact {
    pub version: String,
    pub templates: Vec<Template>,
    pub warnings: Vec<NormalizeWarning>,
}

/// Load the merged collection back through the normalizer.
pub fn read_merged(path: &Path) -> Result<MergedArtifact, PipelineError> {
    let doc = read_json(path)?;
    let version = doc
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let fallback = SourceAttribution {
        name: "merged".to_string(),
        url: path.display().to_string(),
    };
    let normalized = normalize_merged_value(&fallback, &doc);
    Ok(MergedArtifact {
        version,
        templates: normalized.templates,
        warnings: normalized.warnings,
    })
}

#[derive(Serialize)]
struct StatisticsOut<'a> {
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    report: &'a Report,
}

pub fn write_statistics(
    path: &Path,
    report: &Report,
    generated_at: DateTime<Utc>,
) -> Result<(), PipelineError> {
    write_json(path, &StatisticsOut { generated_at, report })
}

#[derive(Serialize)]
struct ValidationOut<'a> {
    generated_at: DateTime<Utc>,
    summary: &'a ValidationSummary,
    issues: &'a [ValidationIssue],
}

pub fn write_validation_report(
    path: &Path,
    summary: &ValidationSummary,
    issues: &[ValidationIssue],
    generated_at: DateTime<Utc>,
) -> Result<(), PipelineError> {
    write_json(
        path,
        &ValidationOut {
            generated_at,
            summary,
            issues,
        },
    )
}

fn sorted_counts(map: &BTreeMap<String, usize>) -> Vec<(&str, usize)> {
    let mut v: Vec<(&str, usize)> = map.iter().map(|(k, n)| (k.as_str(), *n)).collect();
    v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    v
}

fn push_count_table(md: &mut String, heading: &str, column: &str, map: &BTreeMap<String, usize>) {
    md.push_str(&format!("## {heading}\n\n| {column} | Count |\n|---|---|\n"));
    for (k, n) in sorted_counts(map) {
        md.push_str(&format!("| {k} | {n} |\n"));
    }
    md.push('\n');
}

/// Human-readable summary of a report.
pub fn render_markdown(report: &Report, generated_at: DateTime<Utc>) -> String {
    let mut md = String::new();
    md.push_str("# Template Collection\n\n");
    md.push_str(&format!(
        "Generated: {}\n\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    md.push_str("## Summary\n\n");
    md.push_str(&format!("- Templates: {}\n", report.total_records));
    md.push_str(&format!("- Categories: {}\n", report.unique_categories));
    md.push_str(&format!(
        "- Sources: {} ok / {} total\n",
        report.successful_sources(),
        report.per_source_health.len()
    ));
    md.push_str(&format!(
        "- Validation: {} errors, {} warnings\n\n",
        report.errors, report.warnings
    ));

    push_count_table(&mut md, "Categories", "Category", &report.per_category);
    push_count_table(&mut md, "Platforms", "Platform", &report.per_platform);
    push_count_table(&mut md, "Types", "Type", &report.per_type);

    md.push_str("## Sources\n\n| Source | Status | Templates | Error |\n|---|---|---|---|\n");
    for (name, h) in &report.per_source_health {
        md.push_str(&format!(
            "| {name} | {} | {} | {} |\n",
            h.status.as_str(),
            h.record_count,
            h.error.as_deref().unwrap_or("")
        ));
    }
    md.push('\n');

    if !report.top_images.is_empty() {
        md.push_str("## Popular images\n\n| Image | Templates |\n|---|---|\n");
        for img in &report.top_images {
            md.push_str(&format!("| {} | {} |\n", img.image, img.count));
        }
        md.push('\n');
    }
    md
}

pub fn write_markdown(
    path: &Path,
    report: &Report,
    generated_at: DateTime<Utc>,
) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    fs::write(path, render_markdown(report, generated_at)).map_err(|e| PipelineError::io(path, e))
}
