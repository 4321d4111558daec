// src/dedup.rs
//! Cross-source merge: one template per dedup key, stable output order.

use std::collections::BTreeMap;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::template::Template;

/// Which record survives when several share a dedup key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    #[default]
    FirstWins,
    LastWins,
}

impl std::str::FromStr for DedupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "first_wins" | "first" => Ok(DedupPolicy::FirstWins),
            "last_wins" | "last" | "latest_wins" => Ok(DedupPolicy::LastWins),
            other => Err(format!("unknown dedup policy '{other}'")),
        }
    }
}

/// Normalized records of one source, in the order the source listed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecords {
    pub source: String,
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub key: String,
    pub kept_source: String,
    pub dropped_sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub templates: Vec<Template>,
    pub collisions: Vec<Collision>,
}

/// Keep templates having at least one of `categories` (case-insensitive).
/// An empty filter keeps everything.
pub fn filter_categories(templates: Vec<Template>, categories: &[String]) -> Vec<Template> {
    if categories.is_empty() {
        return templates;
    }
    let wanted: Vec<String> = categories
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();
    templates
        .into_iter()
        .filter(|t| {
            t.categories
                .iter()
                .any(|c| wanted.contains(&c.to_lowercase()))
        })
        .collect()
}

/// Merge per-source records (given in registry order) into one collection.
///
/// Records are flattened source by source, grouped by `dedup_key`, and one winner
/// per group is chosen by `policy`. The result is sorted by primary category and
/// title so identical inputs always give identical output.
pub fn merge(per_source: Vec<SourceRecords>, policy: DedupPolicy) -> MergeOutcome {
    let mut flat: Vec<Option<Template>> = Vec::new();
    for sr in per_source {
        flat.extend(sr.templates.into_iter().map(Some));
    }
    let total = flat.len();

    // key -> indices into `flat`, in encounter order
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, t) in flat.iter().enumerate() {
        if let Some(t) = t {
            groups.entry(t.dedup_key.clone()).or_default().push(i);
        }
    }

    let mut templates = Vec::with_capacity(groups.len());
    let mut collisions = Vec::new();
    for (key, idx) in groups {
        let winner_pos = match policy {
            DedupPolicy::FirstWins => 0,
            DedupPolicy::LastWins => idx.len() - 1,
        };
        let winner_idx = idx[winner_pos];

        if idx.len() > 1 {
            let dropped_sources: Vec<String> = idx
                .iter()
                .filter(|&&i| i != winner_idx)
                .filter_map(|&i| flat[i].as_ref().map(|t| t.source.name.clone()))
                .collect();
            let kept_source = flat[winner_idx]
                .as_ref()
                .map(|t| t.source.name.clone())
                .unwrap_or_default();
            debug!(key = %key, kept = %kept_source, dropped = ?dropped_sources, "duplicate template");
            collisions.push(Collision {
                key,
                kept_source,
                dropped_sources,
            });
        }

        if let Some(t) = flat[winner_idx].take() {
            templates.push(t);
        }
    }

    sort_templates(&mut templates);

    counter!("aggregator_dedup_collisions_total").increment(collisions.len() as u64);
    info!(
        input = total,
        unique = templates.len(),
        collisions = collisions.len(),
        ?policy,
        "merged templates"
    );

    MergeOutcome {
        templates,
        collisions,
    }
}

/// Stable output order: primary category, then title, then dedup key.
pub fn sort_templates(templates: &mut [Template]) {
    templates.sort_by(|a, b| {
        a.primary_category()
            .to_lowercase()
            .cmp(&b.primary_category().to_lowercase())
            .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
            .then_with(|| a.dedup_key.cmp(&b.dedup_key))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::template::SourceAttribution;

    fn records(source: &str, body: &str) -> SourceRecords {
        let attr = SourceAttribution {
            name: source.to_string(),
            url: format!("https://{source}.test/t.json"),
        };
        SourceRecords {
            source: source.to_string(),
            templates: normalize(&attr, body.as_bytes()).templates,
        }
    }

    #[test]
    fn first_wins_keeps_earliest() {
        let a = records("alpha", r#"[{"name":"Redis","image":"redis:7"},{"name":"redis","image":"redis:6"}]"#);
        let out = merge(vec![a], DedupPolicy::FirstWins);
        assert_eq!(out.templates.len(), 1);
        assert_eq!(out.templates[0].image(), Some("redis:7"));
        assert_eq!(
            out.collisions,
            vec![Collision {
                key: "redis".into(),
                kept_source: "alpha".into(),
                dropped_sources: vec!["alpha".into()],
            }]
        );
    }

    #[test]
    fn last_wins_keeps_latest_across_sources() {
        let a = records("alpha", r#"[{"title":"Redis","image":"redis:7"}]"#);
        let b = records("beta", r#"[{"title":" REDIS ","image":"redis:6"}]"#);
        let out = merge(vec![a, b], DedupPolicy::LastWins);
        assert_eq!(out.templates.len(), 1);
        assert_eq!(out.templates[0].source.name, "beta");
        assert_eq!(out.collisions[0].dropped_sources, vec!["alpha".to_string()]);
    }

    #[test]
    fn output_sorted_by_category_then_title() {
        let a = records(
            "alpha",
            r#"[{"title":"Zulu","image":"z:1","categories":["Media"]},
                {"title":"Alpha","image":"a:1","categories":["Tools"]},
                {"title":"Beta","image":"b:1","categories":["Media"]}]"#,
        );
        let out = merge(vec![a], DedupPolicy::FirstWins);
        let titles: Vec<&str> = out.templates.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Beta", "Zulu", "Alpha"]);
    }

    #[test]
    fn category_filter_is_case_insensitive() {
        let a = records(
            "alpha",
            r#"[{"title":"A","image":"a:1","categories":["Media"]},
                {"title":"B","image":"b:1","categories":["Tools"]},
                {"title":"C","image":"c:1"}]"#,
        );
        let kept = filter_categories(a.templates, &["media".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "A");
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!("first_wins".parse::<DedupPolicy>(), Ok(DedupPolicy::FirstWins));
        assert_eq!("latest-wins".parse::<DedupPolicy>(), Ok(DedupPolicy::LastWins));
        assert!("random".parse::<DedupPolicy>().is_err());
    }
}
