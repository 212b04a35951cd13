use crate::config::TargetLength;
use crate::types::{Category, ClassifiedArticle, GeneratedArticle, NormalizedContent, Priority, SourceRef};
use chrono::Utc;
use tracing::debug;

/// Title keywords that force the breaking priority.
const BREAKING_KEYWORDS: &[&str] = &[
    "breaking",
    "crash",
    "red flag",
    "disqualif",
    "banned",
    "stripped",
    "fired",
    "quits",
    "resigns",
    "retires",
    "dies",
    "urgent",
];

// Score weights. Tunable; only monotonicity and determinism are contractual.
const SCORE_BASE: i32 = 40;
const SCORE_ENRICHMENT_BONUS: i32 = 25;
const SCORE_PER_TAG: i32 = 3;
const SCORE_TAG_CAP: i32 = 15;
const SCORE_LENGTH_MAX: i32 = 15;
const SCORE_TRUNCATION_PENALTY: i32 = 10;

/// Pure classification and scoring stage. Cannot fail: every generated
/// article gets a category, a priority, and a bounded quality score.
pub struct Classifier {
    target_length: TargetLength,
}

impl Classifier {
    pub fn new(target_length: TargetLength) -> Self {
        Self { target_length }
    }

    pub fn classify(
        &self,
        article: GeneratedArticle,
        normalized: &NormalizedContent,
    ) -> ClassifiedArticle {
        let priority = self.assign_priority(&article, normalized);
        let category = self.assign_category(&article, normalized, priority);
        let quality_score = self.quality_score(&article);

        debug!(
            "Classified {} as {}/{} with score {}",
            normalized.external_id,
            category.as_str(),
            priority.as_str(),
            quality_score
        );

        ClassifiedArticle {
            article,
            category,
            priority,
            quality_score,
            source_ref: SourceRef {
                source_id: normalized.source_id.clone(),
                external_id: normalized.external_id.clone(),
            },
            created_at: Utc::now(),
        }
    }

    /// Provisional priority, upgraded to breaking on a title keyword match.
    fn assign_priority(&self, article: &GeneratedArticle, normalized: &NormalizedContent) -> Priority {
        let title = article.title.to_lowercase();
        if BREAKING_KEYWORDS.iter().any(|kw| title.contains(kw)) {
            return Priority::Breaking;
        }
        normalized.provisional_priority
    }

    /// Provisional category, with two refinements: breaking priority pulls
    /// the category along, and an unhinted General article is routed by
    /// its tags when they clearly point somewhere.
    fn assign_category(
        &self,
        article: &GeneratedArticle,
        normalized: &NormalizedContent,
        priority: Priority,
    ) -> Category {
        if priority == Priority::Breaking {
            return Category::Breaking;
        }

        if normalized.provisional_category == Category::General {
            if article.tags.iter().any(|t| t == "driver-market") {
                return Category::Transfers;
            }
            if article.tags.iter().any(|t| t == "car-development") {
                return Category::Tech;
            }
        }

        normalized.provisional_category
    }

    /// Bounded 0-100 score: monotonic in "more complete, more on-target
    /// content scores higher", deterministic for identical inputs.
    fn quality_score(&self, article: &GeneratedArticle) -> u8 {
        let mut score = SCORE_BASE;

        if article.enrichment_succeeded {
            score += SCORE_ENRICHMENT_BONUS;
        }

        // "f1" is always present; only the informative tags count.
        let informative_tags = article.tags.len().saturating_sub(1) as i32;
        score += (informative_tags * SCORE_PER_TAG).min(SCORE_TAG_CAP);

        score += self.length_score(&article.content);

        if has_truncation_artifacts(&article.content) {
            score -= SCORE_TRUNCATION_PENALTY;
        }

        score.clamp(0, 100) as u8
    }

    /// Full credit inside the target word band, linear partial credit
    /// approaching it from either side.
    fn length_score(&self, content: &str) -> i32 {
        let words = content.split_whitespace().count();
        let (low, high) = self.target_length.word_band();

        if words >= low && words <= high {
            SCORE_LENGTH_MAX
        } else if words < low {
            ((words as f64 / low as f64) * SCORE_LENGTH_MAX as f64) as i32
        } else {
            ((high as f64 / words as f64) * SCORE_LENGTH_MAX as f64) as i32
        }
    }
}

fn has_truncation_artifacts(content: &str) -> bool {
    let trimmed = content.trim_end();
    trimmed.ends_with("...") || trimmed.ends_with('…') || trimmed.ends_with('[')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::summarize;
    use chrono::Utc;

    fn normalized(title: &str, category: Category, priority: Priority) -> NormalizedContent {
        let now = Utc::now();
        NormalizedContent {
            source_id: "autosport".to_string(),
            external_id: "https://example.com/a1".to_string(),
            title: title.to_string(),
            body: "Body.".to_string(),
            summary: summarize("Body."),
            published_at: now,
            fetched_at: now,
            provisional_category: category,
            provisional_priority: priority,
        }
    }

    fn article(title: &str, words: usize, succeeded: bool, tags: Vec<&str>) -> GeneratedArticle {
        GeneratedArticle {
            title: title.to_string(),
            content: "word ".repeat(words).trim_end().to_string(),
            summary: "summary".to_string(),
            tags: tags.into_iter().map(String::from).collect(),
            estimated_read_time: 1,
            enrichment_succeeded: succeeded,
        }
    }

    #[test]
    fn breaking_keyword_upgrades_priority_and_category() {
        let classifier = Classifier::new(TargetLength::Medium);
        let normalized = normalized("t", Category::Tech, Priority::Regular);
        let article = article("Crash brings out the red flag in Monaco", 400, true, vec!["f1"]);

        let classified = classifier.classify(article, &normalized);
        assert_eq!(classified.priority, Priority::Breaking);
        assert_eq!(classified.category, Category::Breaking);
    }

    #[test]
    fn provisional_values_kept_without_keyword_match() {
        let classifier = Classifier::new(TargetLength::Medium);
        let normalized = normalized("t", Category::Gossip, Priority::Trending);
        let article = article("Paddock whispers ahead of Suzuka", 400, true, vec!["f1"]);

        let classified = classifier.classify(article, &normalized);
        assert_eq!(classified.priority, Priority::Trending);
        assert_eq!(classified.category, Category::Gossip);
    }

    #[test]
    fn tags_route_general_articles() {
        let classifier = Classifier::new(TargetLength::Medium);
        let normalized = normalized("t", Category::General, Priority::Regular);
        let article = article(
            "Driver weighs options for next season",
            400,
            true,
            vec!["f1", "driver-market"],
        );

        let classified = classifier.classify(article, &normalized);
        assert_eq!(classified.category, Category::Transfers);
    }

    #[test]
    fn enrichment_success_scores_higher() {
        let classifier = Classifier::new(TargetLength::Medium);
        let normalized = normalized("t", Category::General, Priority::Regular);

        let enriched = classifier.classify(article("t", 400, true, vec!["f1"]), &normalized);
        let fallback = classifier.classify(article("t", 400, false, vec!["f1"]), &normalized);
        assert!(enriched.quality_score > fallback.quality_score);
    }

    #[test]
    fn score_is_deterministic_and_bounded() {
        let classifier = Classifier::new(TargetLength::Medium);
        let normalized = normalized("t", Category::General, Priority::Regular);
        let a = article("t", 400, true, vec!["f1", "ferrari", "qualifying"]);

        let first = classifier.classify(a.clone(), &normalized).quality_score;
        let second = classifier.classify(a, &normalized).quality_score;
        assert_eq!(first, second);
        assert!(first <= 100);
    }

    #[test]
    fn more_tags_never_lowers_score() {
        let classifier = Classifier::new(TargetLength::Medium);
        let normalized = normalized("t", Category::General, Priority::Regular);

        let few = classifier.classify(article("t", 400, true, vec!["f1"]), &normalized);
        let many = classifier.classify(
            article("t", 400, true, vec!["f1", "ferrari", "qualifying", "strategy"]),
            &normalized,
        );
        assert!(many.quality_score >= few.quality_score);
    }

    #[test]
    fn truncated_content_is_penalized() {
        let classifier = Classifier::new(TargetLength::Medium);
        let normalized = normalized("t", Category::General, Priority::Regular);

        let clean = classifier.classify(article("t", 400, true, vec!["f1"]), &normalized);
        let mut cut = article("t", 400, true, vec!["f1"]);
        cut.content.push_str("...");
        let cut = classifier.classify(cut, &normalized);
        assert!(cut.quality_score < clean.quality_score);
    }

    #[test]
    fn export_eligibility_uses_threshold() {
        let classifier = Classifier::new(TargetLength::Medium);
        let normalized = normalized("t", Category::General, Priority::Regular);
        let classified = classifier.classify(
            article("t", 400, true, vec!["f1", "ferrari", "qualifying"]),
            &normalized,
        );

        assert!(classified.eligible_for_export(classified.quality_score));
        assert!(!classified.eligible_for_export(classified.quality_score + 1));
    }
}
