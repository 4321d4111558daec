// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod normalize;
pub mod report;
pub mod template;
pub mod validate;

// ---- Re-exports for stable public API ----
pub use crate::dedup::{merge, DedupPolicy};
pub use crate::error::PipelineError;
pub use crate::ingest::fetcher::{fetch_all, FetchConfig, HttpFetcher};
pub use crate::ingest::run_pipeline;
pub use crate::ingest::types::{FetchError, FetchStatus, PayloadFetcher, RawPayload, Source};
pub use crate::normalize::normalize;
pub use crate::report::{report, Report};
pub use crate::template::Template;
pub use crate::validate::{validate, Severity, ValidationIssue};
