use crate::config::SourceConfig;
use crate::fetcher::{FetchBody, FetchClient};
use crate::parser::FeedParser;
use crate::sources::{cap_newest, NewsSource};
use crate::types::{PipelineError, RawItem, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Adapter for RSS/Atom feeds. Keeps the previous fetch's cache
/// validators so unchanged feeds cost a single 304 round-trip.
pub struct RssSource {
    config: SourceConfig,
    fetcher: Arc<dyn FetchClient>,
    last_etag: Option<String>,
    last_modified: Option<String>,
}

impl RssSource {
    pub fn new(config: SourceConfig, fetcher: Arc<dyn FetchClient>) -> Self {
        Self {
            config,
            fetcher,
            last_etag: None,
            last_modified: None,
        }
    }
}

#[async_trait]
impl NewsSource for RssSource {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn fetch(&mut self) -> Result<Vec<RawItem>> {
        info!("Fetching RSS source {}: {}", self.config.id, self.config.url);

        let outcome = self
            .fetcher
            .fetch(
                &self.config.url,
                self.last_etag.as_deref(),
                self.last_modified.as_deref(),
            )
            .await?;

        self.last_etag = outcome.etag.clone();
        self.last_modified = outcome.last_modified.clone();

        let content = match outcome.body {
            FetchBody::NotModified => {
                debug!("Source {} not modified, nothing new", self.config.id);
                return Ok(Vec::new());
            }
            FetchBody::Content(content) => content,
        };

        if !FeedParser::looks_like_feed(&content) {
            return Err(PipelineError::Parse(format!(
                "payload from {} does not look like a feed",
                self.config.id
            )));
        }

        let items = FeedParser::parse_feed(&self.config.id, &content, Utc::now())?;
        Ok(cap_newest(items, self.config.max_items))
    }
}
