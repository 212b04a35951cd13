use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Article category assigned during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Breaking,
    Trending,
    Tech,
    Gossip,
    Transfers,
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Breaking => "breaking",
            Category::Trending => "trending",
            Category::Tech => "tech",
            Category::Gossip => "gossip",
            Category::Transfers => "transfers",
            Category::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "breaking" => Some(Category::Breaking),
            "trending" => Some(Category::Trending),
            "tech" | "technical" => Some(Category::Tech),
            "gossip" => Some(Category::Gossip),
            "transfers" | "transfer" => Some(Category::Transfers),
            "general" => Some(Category::General),
            _ => None,
        }
    }
}

/// Publishing priority, ordered from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Breaking,
    Trending,
    Regular,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Breaking => "breaking",
            Priority::Trending => "trending",
            Priority::Regular => "regular",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "breaking" | "high" => Some(Priority::Breaking),
            "trending" | "medium" => Some(Priority::Trending),
            "regular" | "normal" | "low" => Some(Priority::Regular),
            _ => None,
        }
    }
}

/// One fetched, unprocessed entry from a source.
///
/// `external_id` is the source's stable identifier (GUID or link) and is
/// what the dedup store keys on. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub source_id: String,
    pub external_id: String,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// A `RawItem` after markup stripping and provisional tagging.
///
/// Intermediate value owned by the cycle that produced it; never persisted.
#[derive(Debug, Clone)]
pub struct NormalizedContent {
    pub source_id: String,
    pub external_id: String,
    pub title: String,
    pub body: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub provisional_category: Category,
    pub provisional_priority: Priority,
}

/// Output of the enrichment engine, produced on both the generator path
/// and the deterministic fallback path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedArticle {
    pub title: String,
    pub content: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub estimated_read_time: u32,
    pub enrichment_succeeded: bool,
}

/// Back-reference from an article to the raw item it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_id: String,
    pub external_id: String,
}

/// Finished article with routing metadata, ready for persistence.
/// Append-only: never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedArticle {
    pub article: GeneratedArticle,
    pub category: Category,
    pub priority: Priority,
    pub quality_score: u8,
    pub source_ref: SourceRef,
    pub created_at: DateTime<Utc>,
}

impl ClassifiedArticle {
    /// Whether this article clears the caller's threshold for
    /// training-data export. The export itself happens elsewhere.
    pub fn eligible_for_export(&self, threshold: u8) -> bool {
        self.quality_score >= threshold
    }
}

/// Filter for the article read path (news UI and training-data export).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleFilter {
    pub category: Option<Category>,
    pub priority: Option<Priority>,
    pub min_quality_score: Option<u8>,
    pub limit: Option<usize>,
}

/// Orchestrator phase. A failed cycle parks the orchestrator in `Failed`
/// until the next tick runs; the timer itself keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    Idle,
    Running,
    Failed,
}

/// Counters for the most recent cycle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CycleCounters {
    pub items_fetched: usize,
    pub items_deduped: usize,
    pub articles_produced: usize,
    pub articles_failed: usize,
}

/// Snapshot of the orchestrator's bookkeeping, as exposed to the route layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunState {
    pub is_running: bool,
    pub scheduled: bool,
    pub phase: PipelinePhase,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_completed_at: Option<DateTime<Utc>>,
    pub cycle_interval_minutes: u64,
    pub max_items_per_cycle: usize,
    pub counters: CycleCounters,
}

/// Structured response for control operations, so the route layer can
/// always return a well-formed payload even when the pipeline is degraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResponse {
    pub success: bool,
    pub message: String,
}

impl OpResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// Per-item outcome of a batch enrichment run, in input order.
#[derive(Debug, Clone)]
pub struct EnrichmentOutcome {
    pub external_id: String,
    pub article: GeneratedArticle,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source fetch failed for {source_id}: {reason}")]
    SourceFetch { source_id: String, reason: String },

    #[error("Enrichment failed: {0}")]
    Enrichment(String),

    #[error("Persistence failed for {external_id}: {reason}")]
    Persistence { external_id: String, reason: String },

    #[error("Cycle failed: {0}")]
    Cycle(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
