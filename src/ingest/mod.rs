// src/ingest/mod.rs
pub mod fetcher;
pub mod types;

use std::collections::BTreeMap;

use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::config::{check_unique_names, PipelineConfig};
use crate::dedup::{filter_categories, merge, MergeOutcome, SourceRecords};
use crate::error::PipelineError;
use crate::ingest::fetcher::fetch_all;
use crate::ingest::types::{PayloadFetcher, RawPayload, Source};
use crate::normalize::{normalize_payload, NormalizeWarning};
use crate::report::{report, Report};
use crate::validate::{validate, ValidationIssue};

/// One-time metrics registration (so series show up with descriptions).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "aggregator_fetch_attempts_total",
            "HTTP attempts made against sources, retries included."
        );
        describe_counter!(
            "aggregator_fetch_failures_total",
            "Sources whose fetch ended as Failed."
        );
        describe_histogram!("aggregator_fetch_ms", "Single fetch attempt time in milliseconds.");
        describe_counter!(
            "aggregator_records_normalized_total",
            "Records emitted by the normalizer."
        );
        describe_counter!(
            "aggregator_records_dropped_total",
            "Records or payloads dropped during normalization."
        );
        describe_counter!(
            "aggregator_dedup_collisions_total",
            "Dedup keys seen more than once during merge."
        );
        describe_counter!(
            "aggregator_validation_issues_total",
            "Validation issues by severity."
        );
        describe_gauge!(
            "aggregator_pipeline_last_run_ts",
            "Unix ts when the pipeline last completed."
        );
    });
}

/// Active sources, optionally restricted to `names` (case-insensitive). Registry order is kept.
pub fn select_sources<S: AsRef<str>>(all: &[Source], names: &[S]) -> Vec<Source> {
    for n in names {
        let n = n.as_ref();
        if !all.iter().any(|s| s.name.eq_ignore_ascii_case(n)) {
            warn!(source = n, "requested source is not configured");
        }
    }
    all.iter()
        .filter(|s| s.active)
        .filter(|s| names.is_empty() || names.iter().any(|n| s.name.eq_ignore_ascii_case(n.as_ref())))
        .cloned()
        .collect()
}

/// Fetch every source. An empty source list is fatal.
pub async fn fetch_stage<F>(
    cfg: &PipelineConfig,
    sources: &[Source],
    fetcher: &F,
) -> Result<BTreeMap<String, RawPayload>, PipelineError>
where
    F: PayloadFetcher + ?Sized,
{
    ensure_metrics_described();
    if sources.is_empty() {
        return Err(PipelineError::NoSources);
    }
    check_unique_names(sources)?;
    Ok(fetch_all(fetcher, sources, cfg.fetch.concurrency).await)
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub per_source: Vec<SourceRecords>,
    pub warnings: Vec<NormalizeWarning>,
}

impl NormalizeOutcome {
    pub fn record_count(&self) -> usize {
        self.per_source.iter().map(|s| s.templates.len()).sum()
    }
}

/// Normalize payloads in registry order; `categories` (if any) filters each source's records.
pub fn normalize_stage(
    sources: &[Source],
    payloads: &BTreeMap<String, RawPayload>,
    categories: &[String],
) -> NormalizeOutcome {
    let mut out = NormalizeOutcome::default();
    for source in sources {
        let Some(payload) = payloads.get(&source.name) else {
            continue;
        };
        if !payload.is_success() {
            info!(
                source = %source.name,
                error = payload.error.as_deref().unwrap_or(""),
                "source failed, contributes no records"
            );
            continue;
        }
        let normalized = normalize_payload(payload);
        out.warnings.extend(normalized.warnings);
        out.per_source.push(SourceRecords {
            source: source.name.clone(),
            templates: filter_categories(normalized.templates, categories),
        });
    }
    out
}

/// Merge per-source records. Nothing to merge is fatal.
pub fn merge_stage(
    cfg: &PipelineConfig,
    per_source: Vec<SourceRecords>,
) -> Result<MergeOutcome, PipelineError> {
    let total: usize = per_source.iter().map(|s| s.templates.len()).sum();
    if total == 0 {
        return Err(PipelineError::NothingToMerge(format!(
            "{} source(s) produced no templates",
            per_source.len()
        )));
    }
    Ok(merge(per_source, cfg.dedup_policy))
}

/// Everything one in-memory run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub payloads: BTreeMap<String, RawPayload>,
    pub merged: MergeOutcome,
    pub normalize_warnings: Vec<NormalizeWarning>,
    pub issues: Vec<ValidationIssue>,
    pub report: Report,
}

impl PipelineOutcome {
    pub fn templates(&self) -> &[crate::template::Template] {
        &self.merged.templates
    }
}

/// Fetch, normalize, merge, validate and report. Writes nothing.
pub async fn run_pipeline<F>(
    cfg: &PipelineConfig,
    sources: &[Source],
    fetcher: &F,
    categories: &[String],
) -> Result<PipelineOutcome, PipelineError>
where
    F: PayloadFetcher + ?Sized,
{
    info!(sources = sources.len(), policy = ?cfg.dedup_policy, "pipeline starting");
    let payloads = fetch_stage(cfg, sources, fetcher).await?;
    let normalized = normalize_stage(sources, &payloads, categories);
    let normalize_warnings = normalized.warnings;
    let merged = merge_stage(cfg, normalized.per_source)?;
    let issues = validate(&merged.templates);
    let report = report(&merged.templates, &issues, &payloads);

    gauge!("aggregator_pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
    info!(
        templates = report.total_records,
        failed_sources = report.failed_sources().count(),
        errors = report.errors,
        warnings = report.warnings,
        "pipeline finished"
    );

    Ok(PipelineOutcome {
        payloads,
        merged,
        normalize_warnings,
        issues,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(name: &str, active: bool) -> Source {
        Source {
            name: name.into(),
            url: format!("https://{name}.test"),
            description: String::new(),
            category: String::new(),
            active,
        }
    }

    #[test]
    fn select_keeps_active_in_registry_order() {
        let all = vec![src("b", true), src("a", true), src("off", false)];
        let names: Vec<String> = select_sources::<&str>(&all, &[])
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);

        let picked = select_sources(&all, &["A", "off"]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "a");
    }

    #[test]
    fn normalize_stage_skips_failed_and_missing() {
        use crate::ingest::types::FetchError;
        let sources = vec![src("alpha", true), src("beta", true), src("gamma", true)];
        let mut payloads = BTreeMap::new();
        payloads.insert(
            "alpha".to_string(),
            RawPayload::success(&sources[0], br#"[{"title":"A","image":"a:1"}]"#.to_vec()),
        );
        payloads.insert(
            "beta".to_string(),
            RawPayload::failed(&sources[1], &FetchError::Timeout),
        );
        let out = normalize_stage(&sources, &payloads, &[]);
        assert_eq!(out.per_source.len(), 1);
        assert_eq!(out.record_count(), 1);
    }

    #[test]
    fn merging_nothing_is_fatal() {
        let cfg = PipelineConfig::default();
        let err = merge_stage(
            &cfg,
            vec![SourceRecords {
                source: "alpha".into(),
                templates: vec![],
            }],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::NothingToMerge(_)));
    }
}
