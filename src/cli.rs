// src/cli.rs
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::artifacts;
use crate::config::{
    apply_env_overrides, check_unique_names, load_sources_default, load_sources_from,
    PipelineConfig, SourcesFile,
};
use crate::error::PipelineError;
use crate::ingest::fetcher::HttpFetcher;
use crate::ingest::types::Source;
use crate::ingest::{
    ensure_metrics_described, fetch_stage, merge_stage, normalize_stage, run_pipeline,
    select_sources,
};
use crate::report::{report, Report};
use crate::validate::{collect_issues, summarize, validate, Severity, ValidationIssue};

/// Aggregate container templates from many sources into one validated collection.
#[derive(Parser, Debug)]
#[command(name = "template-aggregator", version, about)]
pub struct Cli {
    /// Source registry (TOML or JSON); defaults to $TEMPLATE_SOURCES_PATH or config/sources.*
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch sources and save one snapshot per source
    Fetch {
        /// Only these sources (comma separated)
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,
    },
    /// Merge saved snapshots into the master collection
    Merge {
        /// Keep only templates in these categories (comma separated)
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
    },
    /// Validate the merged collection
    Validate {
        /// Print every issue
        #[arg(long)]
        verbose: bool,
    },
    /// Write statistics and the Markdown summary for the merged collection
    Report,
    /// Fetch, merge, validate and report in one run
    Update {
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
        /// Do not fail the run on validation errors
        #[arg(long)]
        no_validate: bool,
    },
    /// List active sources
    Sources,
}

fn load_registry(path: Option<&Path>) -> Result<SourcesFile> {
    let mut file = match path {
        Some(p) => load_sources_from(p)?,
        None => load_sources_default()?,
    };
    apply_env_overrides(&mut file.settings);
    Ok(file)
}

/// CLI entrypoint for main(): `Ok(SUCCESS)` only when the command succeeded.
/// Fatal errors come back as `Err`.
pub async fn run(cli: Cli) -> Result<ExitCode> {
    Ok(if execute(cli).await? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Run one command; `Ok(false)` means a non-fatal failure (validation errors,
/// no records, every source failed).
pub async fn execute(cli: Cli) -> Result<bool> {
    ensure_metrics_described();
    let registry = load_registry(cli.config.as_deref())?;
    let cfg = PipelineConfig::from_settings(&registry.settings)?;
    let sources = registry.sources;
    check_unique_names(&sources)?;

    let active = select_sources::<&str>(&sources, &[]);

    match cli.command {
        Commands::Fetch { sources: names } => {
            fetch(&cfg, &select_sources(&sources, &names)).await
        }
        Commands::Merge { categories } => merge(&cfg, &active, &categories),
        Commands::Validate { verbose } => validate_merged(&cfg, verbose),
        Commands::Report => report_merged(&cfg, &active),
        Commands::Update {
            sources: names,
            categories,
            no_validate,
        } => {
            let selected = select_sources(&sources, &names);
            update(&cfg, &selected, &categories, no_validate).await
        }
        Commands::Sources => {
            for s in &active {
                println!("{:<24} {:<12} {}", s.name, s.category, s.url);
            }
            println!("{} active source(s)", active.len());
            Ok(true)
        }
    }
}

async fn fetch(cfg: &PipelineConfig, sources: &[Source]) -> Result<bool> {
    let fetcher = HttpFetcher::new(&cfg.fetch)?;
    let payloads = fetch_stage(cfg, sources, &fetcher).await?;
    artifacts::write_raw_snapshots(&cfg.individual_dir, &payloads)?;

    let mut ok = 0usize;
    for (name, p) in &payloads {
        match &p.error {
            None => {
                ok += 1;
                println!("  ok      {name}");
            }
            Some(e) => println!("  failed  {name}: {e}"),
        }
    }
    println!("Fetched {ok}/{} sources", payloads.len());
    Ok(ok > 0)
}

fn merge(cfg: &PipelineConfig, sources: &[Source], categories: &[String]) -> Result<bool> {
    let payloads = artifacts::read_raw_snapshots(&cfg.individual_dir, sources)?;
    if payloads.is_empty() {
        return Err(PipelineError::NothingToMerge(format!(
            "no snapshots in {}",
            cfg.individual_dir.display()
        ))
        .into());
    }
    let normalized = normalize_stage(sources, &payloads, categories);
    let merged = merge_stage(cfg, normalized.per_source)?;
    artifacts::write_merged(&cfg.merged_path, &cfg.version, &merged.templates)?;
    println!(
        "Merged {} templates ({} duplicates resolved, {} records dropped) into {}",
        merged.templates.len(),
        merged.collisions.len(),
        normalized.warnings.len(),
        cfg.merged_path.display()
    );
    Ok(true)
}

fn print_issues(issues: &[ValidationIssue], titles: &[&str]) {
    for i in issues {
        let tag = match i.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN ",
        };
        let title = titles.get(i.record_index).copied().unwrap_or("?");
        println!("  {tag} [{}] {title}: {} ({})", i.record_index, i.message, i.field);
    }
}

fn validate_merged(cfg: &PipelineConfig, verbose: bool) -> Result<bool> {
    let merged = artifacts::read_merged(&cfg.merged_path)
        .with_context(|| format!("loading {}", cfg.merged_path.display()))?;
    let issues = validate(&merged.templates);
    let summary = summarize(merged.templates.len(), &issues);
    artifacts::write_validation_report(&cfg.validation_report_path(), &summary, &issues, Utc::now())?;

    if verbose {
        let titles: Vec<&str> = merged.templates.iter().map(|t| t.title.as_str()).collect();
        print_issues(&issues, &titles);
    }
    println!(
        "Validated {} templates: {} errors, {} warnings",
        summary.records, summary.errors, summary.warnings
    );
    Ok(!summary.has_errors() && summary.records > 0)
}

fn write_reports(cfg: &PipelineConfig, report: &Report) -> Result<()> {
    let now = Utc::now();
    artifacts::write_statistics(&cfg.statistics_path(), report, now)?;
    artifacts::write_markdown(&cfg.readme_path(), report, now)?;
    Ok(())
}

fn print_report(report: &Report) {
    println!(
        "{} templates, {} categories, {} of {} sources ok",
        report.total_records,
        report.unique_categories,
        report.successful_sources(),
        report.per_source_health.len()
    );
    for (name, h) in report.failed_sources() {
        println!("  failed  {name}: {}", h.error.as_deref().unwrap_or("unknown error"));
    }
}

fn report_merged(cfg: &PipelineConfig, sources: &[Source]) -> Result<bool> {
    let merged = artifacts::read_merged(&cfg.merged_path)
        .with_context(|| format!("loading {}", cfg.merged_path.display()))?;
    let health = artifacts::read_raw_snapshots(&cfg.individual_dir, sources)?;
    let issues = collect_issues(&merged.templates);
    let r = report(&merged.templates, &issues, &health);
    write_reports(cfg, &r)?;
    print_report(&r);
    Ok(r.total_records > 0)
}

async fn update(
    cfg: &PipelineConfig,
    sources: &[Source],
    categories: &[String],
    no_validate: bool,
) -> Result<bool> {
    let fetcher = HttpFetcher::new(&cfg.fetch)?;
    let outcome = run_pipeline(cfg, sources, &fetcher, categories).await?;

    artifacts::write_raw_snapshots(&cfg.individual_dir, &outcome.payloads)?;
    artifacts::write_merged(&cfg.merged_path, &cfg.version, outcome.templates())?;
    write_reports(cfg, &outcome.report)?;
    print_report(&outcome.report);

    if no_validate {
        return Ok(true);
    }
    let summary = summarize(outcome.templates().len(), &outcome.issues);
    artifacts::write_validation_report(
        &cfg.validation_report_path(),
        &summary,
        &outcome.issues,
        Utc::now(),
    )?;
    if summary.has_errors() {
        error!(errors = summary.errors, "validation found errors");
    } else {
        info!(warnings = summary.warnings, "validation passed");
    }
    println!(
        "Validation: {} errors, {} warnings",
        summary.errors, summary.warnings
    );
    Ok(!summary.has_errors())
}
