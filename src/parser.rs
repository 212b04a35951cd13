use crate::types::{PipelineError, RawItem, Result};
use chrono::{DateTime, Utc};
use feed_rs::parser;
use serde::Deserialize;
use tracing::{debug, info};

/// Parses raw source payloads into `RawItem`s. Both strategies tolerate
/// missing optional fields: an absent publish date falls back to fetch
/// time, an absent guid falls back to the entry link.
pub struct FeedParser;

impl FeedParser {
    /// Parse an RSS or Atom document. Entries without any usable
    /// identifier (no guid and no link) are skipped.
    pub fn parse_feed(source_id: &str, content: &str, fetched_at: DateTime<Utc>) -> Result<Vec<RawItem>> {
        debug!("Parsing feed content for {} ({} bytes)", source_id, content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| PipelineError::Parse(format!("failed to parse feed for {}: {}", source_id, e)))?;

        let mut items = Vec::new();

        for entry in feed.entries {
            let link = entry.links.first().map(|l| l.href.clone());

            let external_id = if !entry.id.is_empty() {
                entry.id.clone()
            } else if let Some(ref link) = link {
                link.clone()
            } else {
                debug!("Skipping entry with no guid and no link in {}", source_id);
                continue;
            };

            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());

            // Prefer full content over the summary when both exist.
            let body = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .unwrap_or_default();

            let published_at = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(fetched_at);

            items.push(RawItem {
                source_id: source_id.to_string(),
                external_id,
                title,
                body,
                published_at,
                fetched_at,
            });
        }

        info!("Parsed {} entries from {}", items.len(), source_id);
        Ok(items)
    }

    /// Parse a JSON listing endpoint: an array of article objects, either
    /// top-level or under an `articles`/`items` key.
    pub fn parse_json_listing(
        source_id: &str,
        content: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<RawItem>> {
        debug!("Parsing JSON listing for {} ({} bytes)", source_id, content.len());

        let value: serde_json::Value = serde_json::from_str(content)?;
        let entries = value
            .as_array()
            .cloned()
            .or_else(|| value.get("articles").and_then(|v| v.as_array()).cloned())
            .or_else(|| value.get("items").and_then(|v| v.as_array()).cloned())
            .ok_or_else(|| {
                PipelineError::Parse(format!("no article array in JSON listing for {}", source_id))
            })?;

        let mut items = Vec::new();

        for entry in entries {
            let entry: JsonListingEntry = match serde_json::from_value(entry) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping malformed JSON entry in {}: {}", source_id, e);
                    continue;
                }
            };

            let external_id = match entry.id.or(entry.guid).or_else(|| entry.url.clone()) {
                Some(id) => id,
                None => {
                    debug!("Skipping JSON entry with no id/guid/url in {}", source_id);
                    continue;
                }
            };

            let published_at = entry
                .published_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(fetched_at);

            items.push(RawItem {
                source_id: source_id.to_string(),
                external_id,
                title: entry.title.unwrap_or_else(|| "Untitled".to_string()),
                body: entry
                    .body
                    .or(entry.content)
                    .or(entry.description)
                    .unwrap_or_default(),
                published_at,
                fetched_at,
            });
        }

        info!("Parsed {} entries from {}", items.len(), source_id);
        Ok(items)
    }

    /// Cheap check that a payload might be a feed before handing it to the
    /// full parser, to turn obvious HTML error pages into parse errors early.
    pub fn looks_like_feed(content: &str) -> bool {
        let lower = content.to_lowercase();
        lower.contains("<rss")
            || lower.contains("<feed")
            || lower.contains("<channel")
            || lower.contains("xmlns:atom")
    }
}

#[derive(Debug, Deserialize)]
struct JsonListingEntry {
    id: Option<String>,
    guid: Option<String>,
    url: Option<String>,
    title: Option<String>,
    body: Option<String>,
    content: Option<String>,
    description: Option<String>,
    #[serde(alias = "publishedAt", alias = "published", alias = "date")]
    published_at: Option<String>,
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
