use crate::config::SourceConfig;
use crate::types::{NormalizedContent, RawItem};
use once_cell::sync::Lazy;
use regex::Regex;

const SUMMARY_MAX_CHARS: usize = 200;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static CDATA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Pure, total normalization: strips markup from title and body, derives
/// the summary, and attaches the source's provisional category/priority.
/// An empty raw item yields an empty-but-valid result.
pub fn normalize(item: &RawItem, source: &SourceConfig) -> NormalizedContent {
    let title = clean_text(&item.title);
    let body = clean_text(&item.body);
    let summary = summarize(&body);

    NormalizedContent {
        source_id: item.source_id.clone(),
        external_id: item.external_id.clone(),
        title,
        body,
        summary,
        published_at: item.published_at,
        fetched_at: item.fetched_at,
        provisional_category: source.default_category,
        provisional_priority: source.default_priority,
    }
}

/// Unwrap CDATA sections, drop tags, decode entities, collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let unwrapped = CDATA_RE.replace_all(text, "$1");
    let stripped = TAG_RE.replace_all(&unwrapped, " ");
    let decoded = html_escape::decode_html_entities(&stripped);
    WHITESPACE_RE.replace_all(decoded.trim(), " ").to_string()
}

/// First ~200 characters of the cleaned body, truncated at a word boundary.
pub fn summarize(body: &str) -> String {
    if body.chars().count() <= SUMMARY_MAX_CHARS {
        return body.to_string();
    }

    let truncated: String = body.chars().take(SUMMARY_MAX_CHARS).collect();
    match truncated.rfind(' ') {
        Some(last_space) => format!("{}...", &truncated[..last_space]),
        None => format!("{}...", truncated),
    }
}
