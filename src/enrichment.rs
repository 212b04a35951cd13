use crate::config::TargetLength;
use crate::generator::{GenerationRequest, TextGenerator};
use crate::normalizer::summarize;
use crate::types::{Category, EnrichmentOutcome, GeneratedArticle, NormalizedContent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const WORDS_PER_MINUTE: usize = 200;

/// Keyword -> tag table for deterministic tag derivation. Matching is
/// case-insensitive substring presence over title + content.
const TAG_KEYWORDS: &[(&str, &str)] = &[
    ("verstappen", "verstappen"),
    ("hamilton", "hamilton"),
    ("leclerc", "leclerc"),
    ("norris", "norris"),
    ("ferrari", "ferrari"),
    ("mercedes", "mercedes"),
    ("red bull", "red-bull"),
    ("mclaren", "mclaren"),
    ("aston martin", "aston-martin"),
    ("fia", "fia"),
    ("qualifying", "qualifying"),
    ("grand prix", "grand-prix"),
    ("pole", "qualifying"),
    ("penalty", "stewards"),
    ("steward", "stewards"),
    ("contract", "driver-market"),
    ("transfer", "driver-market"),
    ("upgrade", "car-development"),
    ("aero", "car-development"),
    ("crash", "incident"),
    ("pit stop", "strategy"),
    ("strategy", "strategy"),
];

/// Per-article generation options.
#[derive(Debug, Clone)]
pub struct EnrichmentOptions {
    pub target_length: TargetLength,
    pub tone: String,
    pub category_hint: Option<Category>,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self {
            target_length: TargetLength::Medium,
            tone: "engaging".to_string(),
            category_hint: None,
        }
    }
}

/// Turns normalized content into finished articles. Never raises to the
/// caller: generator errors, timeouts, and malformed responses all route
/// to a deterministic fallback synthesized from the normalized content.
pub struct EnrichmentEngine {
    generator: Arc<dyn TextGenerator>,
    generation_timeout: Duration,
    inter_item_delay: Duration,
}

impl EnrichmentEngine {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            generation_timeout: Duration::from_secs(45),
            inter_item_delay: Duration::from_millis(500),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_inter_item_delay(mut self, delay: Duration) -> Self {
        self.inter_item_delay = delay;
        self
    }

    /// Enrich one item. Exactly one generator attempt; any failure mode
    /// resolves to the fallback article.
    pub async fn enrich(
        &self,
        content: &NormalizedContent,
        options: &EnrichmentOptions,
    ) -> GeneratedArticle {
        let request = self.build_request(content, options);

        let response =
            tokio::time::timeout(self.generation_timeout, self.generator.generate(&request)).await;

        match response {
            Ok(Ok(generated)) => {
                let title = generated.title.trim();
                let body = generated.content.trim();
                // Untrusted variant: accept only a response with both
                // required fields populated.
                if title.is_empty() || body.is_empty() {
                    warn!(
                        "Generator returned incomplete payload for {}, falling back",
                        content.external_id
                    );
                    return self.fallback(content);
                }

                debug!("Enrichment succeeded for {}", content.external_id);
                GeneratedArticle {
                    title: title.to_string(),
                    content: body.to_string(),
                    summary: summarize(body),
                    tags: derive_tags(title, body),
                    estimated_read_time: estimate_read_time(body),
                    enrichment_succeeded: true,
                }
            }
            Ok(Err(e)) => {
                warn!("Generator failed for {}: {}, falling back", content.external_id, e);
                self.fallback(content)
            }
            Err(_) => {
                warn!(
                    "Generator timed out after {:?} for {}, falling back",
                    self.generation_timeout, content.external_id
                );
                self.fallback(content)
            }
        }
    }

    /// Enrich a batch sequentially with a small inter-item delay, to
    /// respect generator rate limits. One item's failure never aborts the
    /// rest; outcomes come back in input order.
    pub async fn enrich_batch(
        &self,
        items: &[NormalizedContent],
        options: &EnrichmentOptions,
    ) -> Vec<EnrichmentOutcome> {
        let mut outcomes = Vec::with_capacity(items.len());

        for (i, item) in items.iter().enumerate() {
            if i > 0 && !self.inter_item_delay.is_zero() {
                tokio::time::sleep(self.inter_item_delay).await;
            }

            let article = self.enrich(item, options).await;
            outcomes.push(EnrichmentOutcome {
                external_id: item.external_id.clone(),
                article,
            });
        }

        let succeeded = outcomes.iter().filter(|o| o.article.enrichment_succeeded).count();
        info!(
            "Enriched batch of {}: {} generated, {} fallback",
            outcomes.len(),
            succeeded,
            outcomes.len() - succeeded
        );

        outcomes
    }

    fn build_request(
        &self,
        content: &NormalizedContent,
        options: &EnrichmentOptions,
    ) -> GenerationRequest {
        let (_, max_words) = options.target_length.word_band();
        let category = options
            .category_hint
            .unwrap_or(content.provisional_category);

        GenerationRequest {
            system: format!(
                "You are a Formula 1 news writer. Rewrite the provided raw story as a polished, {} article in the '{}' category. Keep every factual claim from the source.",
                options.tone, category.as_str()
            ),
            prompt: format!("{}\n\n{}", content.title, content.body),
            max_words,
        }
    }

    /// Deterministic synthesis from the normalized content alone: title
    /// unchanged, cleaned body plus a source-attribution footer, the
    /// normalized summary, and keyword-derived tags.
    fn fallback(&self, content: &NormalizedContent) -> GeneratedArticle {
        let body = if !content.body.is_empty() {
            content.body.clone()
        } else if !content.summary.is_empty() {
            content.summary.clone()
        } else {
            content.title.clone()
        };

        let article_body = format!("{}\n\n---\n\n*Source: {}*", body, content.source_id);

        GeneratedArticle {
            title: content.title.clone(),
            content: article_body.clone(),
            summary: content.summary.clone(),
            tags: derive_tags(&content.title, &content.body),
            estimated_read_time: estimate_read_time(&article_body),
            enrichment_succeeded: false,
        }
    }
}

/// Word count over reading speed, rounded up, minimum one minute.
pub fn estimate_read_time(content: &str) -> u32 {
    let words = content.split_whitespace().count();
    (words.div_ceil(WORDS_PER_MINUTE)).max(1) as u32
}

/// Keyword-presence tags, deduplicated, in table order.
pub fn derive_tags(title: &str, content: &str) -> Vec<String> {
    let haystack = format!("{} {}", title, content).to_lowercase();
    let mut tags = vec!["f1".to_string()];

    for (needle, tag) in TAG_KEYWORDS {
        if haystack.contains(needle) && !tags.iter().any(|t| t == tag) {
            tags.push((*tag).to_string());
        }
    }

    tags.truncate(8);
    tags
}
