// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One configured remote location providing a template collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Failed,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Failed => "failed",
        }
    }
}

/// Outcome of fetching one source. Built once per source per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub source_name: String,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
    pub status: FetchStatus,
    pub body: Option<Vec<u8>>,
    pub error: Option<String>,
}

impl RawPayload {
    pub fn success(source: &Source, body: Vec<u8>) -> Self {
        Self {
            source_name: source.name.clone(),
            source_url: source.url.clone(),
            fetched_at: Utc::now(),
            status: FetchStatus::Success,
            body: Some(body),
            error: None,
        }
    }

    pub fn failed(source: &Source, error: &FetchError) -> Self {
        Self {
            source_name: source.name.clone(),
            source_url: source.url.clone(),
            fetched_at: Utc::now(),
            status: FetchStatus::Failed,
            body: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Timeout")]
    Timeout,
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("HTTP {0}")]
    HttpStatus(u16),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to read body: {0}")]
    Body(String),
    #[error("Request failed: {0}")]
    Request(String),
}

impl FetchError {
    /// Timeouts, connection problems, 5xx answers and truncated bodies are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connect(_) | FetchError::Body(_) => true,
            FetchError::HttpStatus(code) => *code >= 500,
            FetchError::InvalidUrl(_) | FetchError::Request(_) => false,
        }
    }
}

/// Retrieves the raw payload of a single source. Implementations own their retry policy
/// and never fail: a broken source becomes a `Failed` payload.
#[async_trait::async_trait]
pub trait PayloadFetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> RawPayload;
    fn name(&self) -> &'static str;
}
