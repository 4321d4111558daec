// src/ingest/fetcher.rs
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use reqwest::{Client, Url};
use tracing::{debug, info, warn};

use crate::ingest::types::{FetchError, PayloadFetcher, RawPayload, Source};

pub const DEFAULT_USER_AGENT: &str = concat!("template-aggregator/", env!("CARGO_PKG_VERSION"));

/// Knobs of the fetch stage.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Upper bound of fetches in flight (always at least 1).
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff_base * 2^n`, capped at `backoff_cap`.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// HTTP GET fetcher with per-request timeout and exponential backoff between retries.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl HttpFetcher {
    pub fn new(cfg: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .connect_timeout(cfg.timeout.min(Duration::from_secs(10)))
            .timeout(cfg.timeout)
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            max_retries: cfg.max_retries,
            backoff_base: cfg.backoff_base,
            backoff_cap: cfg.backoff_cap,
        })
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }

    async fn attempt(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let bytes = resp.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Body(e.to_string())
            }
        })?;
        Ok(bytes.to_vec())
    }
}

fn parse_source_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::InvalidUrl(format!(
            "{raw}: unsupported scheme '{other}'"
        ))),
    }
}

fn classify_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_builder() {
        FetchError::InvalidUrl(e.to_string())
    } else if e.is_connect() || e.is_request() {
        FetchError::Connect(e.to_string())
    } else if e.is_body() || e.is_decode() {
        FetchError::Body(e.to_string())
    } else {
        FetchError::Request(e.to_string())
    }
}

#[async_trait::async_trait]
impl PayloadFetcher for HttpFetcher {
    async fn fetch(&self, source: &Source) -> RawPayload {
        let url = match parse_source_url(&source.url) {
            Ok(u) => u,
            Err(e) => {
                warn!(source = %source.name, error = %e, "source url rejected");
                counter!("aggregator_fetch_failures_total").increment(1);
                return RawPayload::failed(source, &e);
            }
        };

        let mut attempt: u32 = 0;
        loop {
            let t0 = Instant::now();
            counter!("aggregator_fetch_attempts_total").increment(1);
            let res = self.attempt(&url).await;
            histogram!("aggregator_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

            match res {
                Ok(body) => {
                    debug!(source = %source.name, attempt, bytes = body.len(), "fetched source");
                    return RawPayload::success(source, body);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        source = %source.name,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(source = %source.name, attempt, error = %e, "fetch gave up");
                    counter!("aggregator_fetch_failures_total").increment(1);
                    return RawPayload::failed(source, &e);
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Fetch every source with at most `concurrency` requests in flight.
/// The result holds exactly one payload per distinct source name.
pub async fn fetch_all<F>(
    fetcher: &F,
    sources: &[Source],
    concurrency: usize,
) -> BTreeMap<String, RawPayload>
where
    F: PayloadFetcher + ?Sized,
{
    let limit = concurrency.max(1);
    info!(
        sources = sources.len(),
        concurrency = limit,
        fetcher = fetcher.name(),
        "fetching sources"
    );

    let results: Vec<(String, RawPayload)> = stream::iter(sources.iter().map(|source| async move {
        let payload = fetcher.fetch(source).await;
        (source.name.clone(), payload)
    }))
    .buffer_unordered(limit)
    .collect()
    .await;

    let out: BTreeMap<String, RawPayload> = results.into_iter().collect();
    let failed = out.values().filter(|p| !p.is_success()).count();
    info!(fetched = out.len(), failed, "fetch stage finished");
    out
}
