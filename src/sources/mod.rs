pub mod json_api;
pub mod rss_feed;

pub use json_api::JsonApiSource;
pub use rss_feed::RssSource;

use crate::config::{SourceConfig, SourceKind};
use crate::fetcher::FetchClient;
use crate::types::{RawItem, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// One external content feed. Adapters are pure transformations of
/// external bytes into `RawItem` values; a failed fetch surfaces as an
/// `Err` that the orchestrator converts into zero items for the cycle.
#[async_trait]
pub trait NewsSource: Send + Sync {
    fn config(&self) -> &SourceConfig;

    fn source_id(&self) -> &str {
        &self.config().id
    }

    /// Fetch and parse the newest items, capped at the source's
    /// `max_items`, newest first.
    async fn fetch(&mut self) -> Result<Vec<RawItem>>;
}

/// Build the adapter matching a source's kind.
pub fn build_source(config: SourceConfig, fetcher: Arc<dyn FetchClient>) -> Box<dyn NewsSource> {
    match config.kind {
        SourceKind::Rss => Box::new(RssSource::new(config, fetcher)),
        SourceKind::JsonApi => Box::new(JsonApiSource::new(config, fetcher)),
    }
}

/// Newest first, then cap at the per-source item limit.
pub(crate) fn cap_newest(mut items: Vec<RawItem>, max_items: usize) -> Vec<RawItem> {
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    items.truncate(max_items);
    items
}
