use crate::config::SourceConfig;
use crate::fetcher::{FetchBody, FetchClient};
use crate::parser::FeedParser;
use crate::sources::{cap_newest, NewsSource};
use crate::types::{RawItem, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Adapter for JSON listing endpoints (news APIs exposing an article array).
pub struct JsonApiSource {
    config: SourceConfig,
    fetcher: Arc<dyn FetchClient>,
    last_etag: Option<String>,
    last_modified: Option<String>,
}

impl JsonApiSource {
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
impl NewsSource for JsonApiSource {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn fetch(&mut self) -> Result<Vec<RawItem>> {
        info!("Fetching JSON source {}: {}", self.config.id, self.config.url);

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

        let items = FeedParser::parse_json_listing(&self.config.id, &content, Utc::now())?;
        Ok(cap_newest(items, self.config.max_items))
    }
}
