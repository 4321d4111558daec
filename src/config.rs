// src/config.rs
//! Source registry file and run settings.
//!
//! The registry is a JSON or TOML document holding `sources` and an optional
//! `settings` table. [`PipelineConfig`] is the value every stage receives;
//! nothing downstream reads the environment.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::artifacts::snapshot_file_name;
use crate::dedup::DedupPolicy;
use crate::error::PipelineError;
use crate::ingest::fetcher::{FetchConfig, DEFAULT_USER_AGENT};
use crate::ingest::types::Source;

pub const ENV_SOURCES_PATH: &str = "TEMPLATE_SOURCES_PATH";
pub const ENV_CONCURRENCY: &str = "AGGREGATOR_CONCURRENCY";
pub const ENV_TIMEOUT_SECS: &str = "AGGREGATOR_TIMEOUT_SECS";
pub const ENV_MAX_RETRIES: &str = "AGGREGATOR_MAX_RETRIES";

pub const DEFAULT_SOURCES_TOML: &str = "config/sources.toml";
pub const DEFAULT_SOURCES_JSON: &str = "config/sources.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub concurrency: usize,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_seconds: u64,
    pub dedup_policy: DedupPolicy,
    pub version: String,
    pub individual_dir: PathBuf,
    pub merged_path: PathBuf,
    pub reports_dir: PathBuf,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout_seconds: 30,
            max_retries: 2,
            backoff_base_ms: 1_000,
            backoff_cap_seconds: 30,
            dedup_policy: DedupPolicy::FirstWins,
            version: "2".to_string(),
            individual_dir: PathBuf::from("templates/individual"),
            merged_path: PathBuf::from("templates/merged/master_templates.json"),
            reports_dir: PathBuf::from("reports"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesFile {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub settings: Settings,
}

/// Load the registry from an explicit path. Supports TOML or JSON.
pub fn load_sources_from(path: &Path) -> Result<SourcesFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let file = parse_sources_file(&content, ext.as_str())
        .with_context(|| format!("parsing sources from {}", path.display()))?;
    info!(path = %path.display(), sources = file.sources.len(), "loaded source registry");
    Ok(file)
}

/// Load the registry using env var + fallbacks:
/// 1) $TEMPLATE_SOURCES_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
///
/// Nothing found yields an empty registry.
pub fn load_sources_default() -> Result<SourcesFile> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        }
        return Err(anyhow!("{ENV_SOURCES_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from(DEFAULT_SOURCES_TOML);
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from(DEFAULT_SOURCES_JSON);
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    warn!("no source registry found");
    Ok(SourcesFile::default())
}

fn parse_sources_file(s: &str, hint_ext: &str) -> Result<SourcesFile> {
    let looks_json = matches!(s.trim_start().chars().next(), Some('{' | '['));
    let try_json_first = hint_ext == "json" || (hint_ext != "toml" && looks_json);
    if try_json_first {
        match parse_json(s) {
            Ok(v) => return Ok(v),
            Err(e) if hint_ext == "json" => return Err(e),
            Err(_) => {}
        }
    }
    match parse_toml(s) {
        Ok(v) => Ok(v),
        Err(e) if hint_ext == "toml" => Err(e),
        Err(_) if !try_json_first => parse_json(s),
        Err(e) => Err(anyhow!("unsupported sources format: {e}")),
    }
}

fn parse_toml(s: &str) -> Result<SourcesFile> {
    Ok(toml::from_str(s)?)
}

/// A JSON registry may also be a bare array of sources.
fn parse_json(s: &str) -> Result<SourcesFile> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum JsonRegistry {
        File(SourcesFile),
        List(Vec<Source>),
    }
    Ok(match serde_json::from_str(s)? {
        JsonRegistry::File(f) => f,
        JsonRegistry::List(sources) => SourcesFile {
            sources,
            settings: Settings::default(),
        },
    })
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring invalid environment override");
            None
        }
    }
}

/// Apply AGGREGATOR_* overrides on top of file settings.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Some(v) = env_parse::<usize>(ENV_CONCURRENCY) {
        settings.concurrency = v;
    }
    if let Some(v) = env_parse::<u64>(ENV_TIMEOUT_SECS) {
        settings.timeout_seconds = v;
    }
    if let Some(v) = env_parse::<u32>(ENV_MAX_RETRIES) {
        settings.max_retries = v;
    }
}

/// Source names key every per-source map and name a snapshot file, and are
/// selected case-insensitively. Two names may not share a snapshot file name,
/// ignoring case.
pub fn check_unique_names(sources: &[Source]) -> Result<(), PipelineError> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    for s in sources {
        if s.name.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "source with url '{}' has an empty name",
                s.url
            )));
        }
        let file = snapshot_file_name(&s.name).to_lowercase();
        if let Some(prev) = seen.insert(file, s.name.as_str()) {
            return Err(PipelineError::Config(if prev == s.name {
                format!("duplicate source name '{}'", s.name)
            } else {
                format!("source names '{prev}' and '{}' collide", s.name)
            }));
        }
    }
    Ok(())
}

/// Everything a run needs, passed explicitly to each stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fetch: FetchConfig,
    pub dedup_policy: DedupPolicy,
    pub version: String,
    pub individual_dir: PathBuf,
    pub merged_path: PathBuf,
    pub reports_dir: PathBuf,
}

impl PipelineConfig {
    pub fn from_settings(s: &Settings) -> Result<Self, PipelineError> {
        if s.concurrency == 0 {
            return Err(PipelineError::Config("concurrency must be at least 1".into()));
        }
        if s.timeout_seconds == 0 {
            return Err(PipelineError::Config("timeout_seconds must be at least 1".into()));
        }
        Ok(Self {
            fetch: FetchConfig {
                concurrency: s.concurrency,
                timeout: Duration::from_secs(s.timeout_seconds),
                max_retries: s.max_retries,
                backoff_base: Duration::from_millis(s.backoff_base_ms),
                backoff_cap: Duration::from_secs(s.backoff_cap_seconds),
                user_agent: s.user_agent.clone(),
            },
            dedup_policy: s.dedup_policy,
            version: s.version.clone(),
            individual_dir: s.individual_dir.clone(),
            merged_path: s.merged_path.clone(),
            reports_dir: s.reports_dir.clone(),
        })
    }

    pub fn statistics_path(&self) -> PathBuf {
        self.merged_dir().join("statistics.json")
    }

    pub fn validation_report_path(&self) -> PathBuf {
        self.reports_dir.join("validation_report.json")
    }

    pub fn readme_path(&self) -> PathBuf {
        self.reports_dir.join("README.md")
    }

    fn merged_dir(&self) -> PathBuf {
        self.merged_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let s = Settings::default();
        Self {
            fetch: FetchConfig::default(),
            dedup_policy: s.dedup_policy,
            version: s.version,
            individual_dir: s.individual_dir,
            merged_path: s.merged_path,
            reports_dir: s.reports_dir,
        }
    }
}
