// src/report.rs
//! Aggregate statistics over the merged collection. Pure: no I/O here.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::ingest::types::{FetchStatus, RawPayload};
use crate::template::Template;
use crate::validate::{summarize, ValidationIssue};

pub const UNCATEGORIZED: &str = "Uncategorized";
pub const UNSPECIFIED_PLATFORM: &str = "unspecified";
pub const TOP_IMAGES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceHealth {
    pub status: FetchStatus,
    pub source_url: String,
    pub record_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageCount {
    pub image: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub total_records: usize,
    pub per_category: BTreeMap<String, usize>,
    pub per_platform: BTreeMap<String, usize>,
    pub per_type: BTreeMap<String, usize>,
    pub per_source_health: BTreeMap<String, SourceHealth>,
    pub errors: usize,
    pub warnings: usize,
    pub unique_categories: usize,
    pub top_images: Vec<ImageCount>,
}

impl Report {
    pub fn failed_sources(&self) -> impl Iterator<Item = (&String, &SourceHealth)> {
        self.per_source_health
            .iter()
            .filter(|(_, h)| h.status == FetchStatus::Failed)
    }

    pub fn successful_sources(&self) -> usize {
        self.per_source_health
            .values()
            .filter(|h| h.status == FetchStatus::Success)
            .count()
    }
}

/// Image reference without its tag or digest: `lscr.io/x/nginx:1.25` -> `lscr.io/x/nginx`.
pub fn base_image(image: &str) -> &str {
    let image = image.trim();
    let no_digest = image.split('@').next().unwrap_or(image);
    let last_start = no_digest.rfind('/').map(|i| i + 1).unwrap_or(0);
    match no_digest[last_start..].find(':') {
        Some(colon) => &no_digest[..last_start + colon],
        None => no_digest,
    }
}

/// Tally the collection. A record counts once under each of its categories.
pub fn report(
    records: &[Template],
    issues: &[ValidationIssue],
    fetch_health: &BTreeMap<String, RawPayload>,
) -> Report {
    let mut per_category: BTreeMap<String, usize> = BTreeMap::new();
    let mut per_platform: BTreeMap<String, usize> = BTreeMap::new();
    let mut per_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut per_source: BTreeMap<&str, usize> = BTreeMap::new();
    let mut images: BTreeMap<&str, usize> = BTreeMap::new();
    let mut categories: BTreeSet<&str> = BTreeSet::new();

    for t in records {
        if t.categories.is_empty() {
            *per_category.entry(UNCATEGORIZED.to_string()).or_default() += 1;
        }
        for c in &t.categories {
            *per_category.entry(c.clone()).or_default() += 1;
            categories.insert(c.as_str());
        }

        let platform = t
            .platform
            .as_ref()
            .map(|p| p.as_str())
            .unwrap_or(UNSPECIFIED_PLATFORM);
        *per_platform.entry(platform.to_string()).or_default() += 1;
        *per_type.entry(t.kind().label().to_string()).or_default() += 1;
        *per_source.entry(t.source.name.as_str()).or_default() += 1;

        if let Some(img) = t.image().map(base_image).filter(|i| !i.is_empty()) {
            *images.entry(img).or_default() += 1;
        }
    }

    let per_source_health = fetch_health
        .iter()
        .map(|(name, payload)| {
            let health = SourceHealth {
                status: payload.status,
                source_url: payload.source_url.clone(),
                record_count: per_source.get(name.as_str()).copied().unwrap_or(0),
                error: payload.error.clone(),
            };
            (name.clone(), health)
        })
        .collect();

    let mut top_images: Vec<ImageCount> = images
        .into_iter()
        .map(|(image, count)| ImageCount {
            image: image.to_string(),
            count,
        })
        .collect();
    top_images.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.image.cmp(&b.image)));
    top_images.truncate(TOP_IMAGES);

    let summary = summarize(records.len(), issues);
    Report {
        total_records: records.len(),
        per_category,
        per_platform,
        per_type,
        per_source_health,
        errors: summary.errors,
        warnings: summary.warnings,
        unique_categories: categories.len(),
        top_images,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{FetchError, Source};
    use crate::normalize::normalize;
    use crate::template::SourceAttribution;
    use crate::validate::validate;

    fn source(name: &str) -> Source {
        Source {
            name: name.into(),
            url: format!("https://{name}.test/t.json"),
            description: String::new(),
            category: String::new(),
            active: true,
        }
    }

    fn records(name: &str, body: &str) -> Vec<Template> {
        let attr = SourceAttribution {
            name: name.into(),
            url: format!("https://{name}.test/t.json"),
        };
        normalize(&attr, body.as_bytes()).templates
    }

    #[test]
    fn base_image_strips_tag_and_digest_only() {
        assert_eq!(base_image("nginx:1.25"), "nginx");
        assert_eq!(base_image("localhost:5000/app"), "localhost:5000/app");
        assert_eq!(base_image("localhost:5000/app:2"), "localhost:5000/app");
        assert_eq!(base_image("redis@sha256:abc"), "redis");
    }

    #[test]
    fn tallies_and_health() {
        let recs = records(
            "alpha",
            r#"[{"title":"A","image":"nginx:1","platform":"linux","categories":["Web","Proxy"]},
                {"title":"B","image":"nginx:2","categories":["Web"]},
                {"type":3,"title":"C","repository":{"url":"https://git.test/c"}}]"#,
        );
        let mut health = BTreeMap::new();
        health.insert(
            "alpha".to_string(),
            RawPayload::success(&source("alpha"), b"[]".to_vec()),
        );
        health.insert(
            "beta".to_string(),
            RawPayload::failed(&source("beta"), &FetchError::Timeout),
        );
        let issues = validate(&recs);
        let r = report(&recs, &issues, &health);

        assert_eq!(r.total_records, 3);
        assert_eq!(r.per_category["Web"], 2);
        assert_eq!(r.per_category["Proxy"], 1);
        assert_eq!(r.per_category[UNCATEGORIZED], 1);
        assert_eq!(r.unique_categories, 2);
        assert_eq!(r.per_platform["linux"], 1);
        assert_eq!(r.per_platform[UNSPECIFIED_PLATFORM], 2);
        assert_eq!(r.per_type["container"], 2);
        assert_eq!(r.per_type["stack"], 1);
        assert_eq!(r.top_images[0], ImageCount { image: "nginx".into(), count: 2 });

        assert_eq!(r.per_source_health["alpha"].record_count, 3);
        let beta = &r.per_source_health["beta"];
        assert_eq!(beta.status, FetchStatus::Failed);
        assert_eq!(beta.record_count, 0);
        assert_eq!(beta.error.as_deref(), Some("Timeout"));
        assert_eq!(r.failed_sources().count(), 1);
        assert_eq!(r.successful_sources(), 1);
        assert_eq!(r.errors + r.warnings, issues.len());
    }

    #[test]
    fn empty_collection_gives_empty_report() {
        let r = report(&[], &[], &BTreeMap::new());
        assert_eq!(r, Report::default());
    }
}
