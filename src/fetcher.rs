use crate::types::{PipelineError, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = "f1-news-pipeline/0.1";
const MAX_RETRIES: u32 = 2;
const RETRY_DELAY_SECS: u64 = 2;

/// What a fetch produced.
#[derive(Debug, Clone)]
pub enum FetchBody {
    /// Server says nothing changed since the cached validators.
    NotModified,
    Content(String),
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub body: FetchBody,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub response_time_ms: u64,
}

/// Transport used by source adapters. `Fetcher` is the real HTTP
/// implementation; tests substitute a canned client to exercise the
/// conditional-fetch path without a live server.
#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchOutcome>;
}

/// Shared HTTP layer for all source adapters. One client, per-call timeout,
/// conditional-header support, bounded retry, and a politeness delay so
/// concurrent fetches never hammer the same host back-to-back.
pub struct Fetcher {
    client: Client,
    last_request: Arc<RwLock<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            last_request: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Fetch a source endpoint, honoring ETag / Last-Modified validators
    /// from the previous fetch. Transient failures are retried with
    /// exponential backoff; the final error is returned to the caller,
    /// which isolates it to that source for the cycle.
    pub async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchOutcome> {
        let start = Instant::now();
        debug!("Fetching source endpoint: {}", url);

        self.politeness_delay(url).await?;

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(RETRY_DELAY_SECS),
            initial_interval: Duration::from_secs(RETRY_DELAY_SECS),
            max_interval: Duration::from_secs(RETRY_DELAY_SECS * 8),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(RETRY_DELAY_SECS * 30)),
            ..Default::default()
        };

        let mut last_error: Option<PipelineError> = None;

        for attempt in 0..=MAX_RETRIES {
            match self.send_conditional(url, etag, last_modified).await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::NOT_MODIFIED {
                        debug!("Source not modified: {}", url);
                        return Ok(FetchOutcome {
                            body: FetchBody::NotModified,
                            etag: etag.map(|s| s.to_string()),
                            last_modified: last_modified.map(|s| s.to_string()),
                            response_time_ms: start.elapsed().as_millis() as u64,
                        });
                    }

                    if !status.is_success() {
                        last_error = Some(PipelineError::SourceFetch {
                            source_id: url.to_string(),
                            reason: format!(
                                "HTTP {}: {}",
                                status,
                                status.canonical_reason().unwrap_or("unknown")
                            ),
                        });
                        if attempt < MAX_RETRIES {
                            if let Some(delay) = backoff.next_backoff() {
                                warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                                tokio::time::sleep(delay).await;
                                continue;
                            }
                        }
                        break;
                    }

                    let new_etag = header_value(&response, "etag");
                    let new_last_modified = header_value(&response, "last-modified");

                    match response.text().await {
                        Ok(content) => {
                            debug!("Fetched {} ({} bytes)", url, content.len());
                            return Ok(FetchOutcome {
                                body: FetchBody::Content(content),
                                etag: new_etag,
                                last_modified: new_last_modified,
                                response_time_ms: start.elapsed().as_millis() as u64,
                            });
                        }
                        Err(e) => last_error = Some(PipelineError::Http(e)),
                    }
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRIES {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PipelineError::SourceFetch {
            source_id: url.to_string(),
            reason: "fetch failed with no recorded error".to_string(),
        }))
    }

    async fn send_conditional(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<Response> {
        let mut request = self.client.get(url);

        if let Some(etag) = etag {
            request = request.header("If-None-Match", etag);
        }
        if let Some(last_modified) = last_modified {
            request = request.header("If-Modified-Since", last_modified);
        }

        let response = request.send().await?;
        Ok(response)
    }

    /// Minimum 1s spacing between requests to the same host. The slot is
    /// reserved under the lock, then the wait happens outside it so other
    /// hosts are never stalled behind this one.
    async fn politeness_delay(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url)?;
        let host = parsed.host_str().unwrap_or("").to_string();
        let min_interval = Duration::from_secs(1);

        let wait = {
            let mut last_request = self.last_request.write().await;
            let now = Instant::now();
            let wait = match last_request.get(&host) {
                Some(previous) => (*previous + min_interval).saturating_duration_since(now),
                None => Duration::ZERO,
            };
            last_request.insert(host.clone(), now + wait);
            wait
        };

        if !wait.is_zero() {
            debug!("Spacing requests to {}: waiting {:?}", host, wait);
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}

#[async_trait]
impl FetchClient for Fetcher {
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchOutcome> {
        Fetcher::fetch(self, url, etag, last_modified).await
    }
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
