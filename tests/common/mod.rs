// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use template_aggregator::ingest::fetcher::FetchConfig;
use template_aggregator::{FetchError, PayloadFetcher, RawPayload, Source};

pub fn source(name: &str, url: &str) -> Source {
    Source {
        name: name.to_string(),
        url: url.to_string(),
        description: format!("{name} templates"),
        category: "test".to_string(),
        active: true,
    }
}

/// Serve `app` on an ephemeral local port.
pub async fn serve(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    addr
}

/// Fast settings for tests: short timeout, millisecond backoff.
pub fn fast_fetch_config(max_retries: u32) -> FetchConfig {
    FetchConfig {
        concurrency: 4,
        timeout: Duration::from_millis(300),
        max_retries,
        backoff_base: Duration::from_millis(5),
        backoff_cap: Duration::from_millis(20),
        ..FetchConfig::default()
    }
}

/// In-memory fetcher: each source name maps to a body or a failure.
pub struct MapFetcher {
    pub responses: HashMap<String, Result<String, FetchError>>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
        }
    }

    pub fn ok(mut self, name: &str, body: &str) -> Self {
        self.responses.insert(name.to_string(), Ok(body.to_string()));
        self
    }

    pub fn fail(mut self, name: &str, err: FetchError) -> Self {
        self.responses.insert(name.to_string(), Err(err));
        self
    }
}

#[async_trait]
impl PayloadFetcher for MapFetcher {
    async fn fetch(&self, source: &Source) -> RawPayload {
        match self.responses.get(&source.name) {
            Some(Ok(body)) => RawPayload::success(source, body.clone().into_bytes()),
            Some(Err(e)) => RawPayload::failed(source, e),
            None => RawPayload::failed(source, &FetchError::HttpStatus(404)),
        }
    }

    fn name(&self) -> &'static str {
        "map"
    }
}
