use crate::types::{Category, PipelineError, Priority, Result};
use serde::{Deserialize, Serialize};

/// Which parse strategy a source uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// RSS or Atom feed XML.
    Rss,
    /// JSON listing endpoint (array of objects with title/link/body fields).
    JsonApi,
}

/// Target length band for generated articles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLength {
    Short,
    Medium,
    Long,
}

impl TargetLength {
    /// Approximate word-count band for each target length.
    pub fn word_band(&self) -> (usize, usize) {
        match self {
            TargetLength::Short => (150, 350),
            TargetLength::Medium => (350, 700),
            TargetLength::Long => (700, 1400),
        }
    }
}

/// Static configuration for one external feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable identifier for the source, used on every RawItem it yields.
    pub id: String,
    pub url: String,
    pub kind: SourceKind,
    /// Take at most the newest N items per fetch.
    pub max_items: usize,
    /// Best-effort category hint; classification may override it.
    pub default_category: Category,
    /// Best-effort priority hint; classification may override it.
    pub default_priority: Priority,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, url: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            kind,
            max_items: 10,
            default_category: Category::General,
            default_priority: Priority::Regular,
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_defaults(mut self, category: Category, priority: Priority) -> Self {
        self.default_category = category;
        self.default_priority = priority;
        self
    }
}

/// Live pipeline configuration. Validated on `start` and on every update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub cycle_interval_minutes: u64,
    pub max_items_per_cycle: usize,
    /// Allow-list on provisional category. Empty means all categories pass.
    pub enabled_categories: Vec<Category>,
    pub quality_threshold_for_export: u8,
    pub target_length: TargetLength,
    pub tone: String,
    pub fetch_concurrency: usize,
    pub fetch_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    /// Delay between consecutive generator calls within one cycle.
    pub enrichment_delay_ms: u64,
    /// Dedup entries older than this are pruned after a successful cycle.
    pub dedup_retention_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_minutes: 60,
            max_items_per_cycle: 10,
            enabled_categories: Vec::new(),
            quality_threshold_for_export: 70,
            target_length: TargetLength::Medium,
            tone: "engaging".to_string(),
            fetch_concurrency: 4,
            fetch_timeout_secs: 30,
            generation_timeout_secs: 45,
            enrichment_delay_ms: 500,
            dedup_retention_days: 90,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cycle_interval_minutes == 0 {
            return Err(PipelineError::Config(
                "cycle_interval_minutes must be positive".to_string(),
            ));
        }
        if self.max_items_per_cycle == 0 {
            return Err(PipelineError::Config(
                "max_items_per_cycle must be positive".to_string(),
            ));
        }
        if self.fetch_concurrency == 0 {
            return Err(PipelineError::Config(
                "fetch_concurrency must be positive".to_string(),
            ));
        }
        if self.quality_threshold_for_export > 100 {
            return Err(PipelineError::Config(
                "quality_threshold_for_export must be within 0-100".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a provisional category passes the allow-list filter.
    pub fn category_enabled(&self, category: Category) -> bool {
        self.enabled_categories.is_empty() || self.enabled_categories.contains(&category)
    }

    /// Merge a partial update into this config. Takes effect on the next
    /// cycle; the caller validates the merged result before applying it.
    pub fn merged(&self, update: &PipelineConfigUpdate) -> Self {
        let mut merged = self.clone();
        if let Some(v) = update.cycle_interval_minutes {
            merged.cycle_interval_minutes = v;
        }
        if let Some(v) = update.max_items_per_cycle {
            merged.max_items_per_cycle = v;
        }
        if let Some(ref v) = update.enabled_categories {
            merged.enabled_categories = v.clone();
        }
        if let Some(v) = update.quality_threshold_for_export {
            merged.quality_threshold_for_export = v;
        }
        if let Some(v) = update.target_length {
            merged.target_length = v;
        }
        if let Some(ref v) = update.tone {
            merged.tone = v.clone();
        }
        if let Some(v) = update.enrichment_delay_ms {
            merged.enrichment_delay_ms = v;
        }
        merged
    }
}

/// Partial configuration update accepted by `update_config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfigUpdate {
    pub cycle_interval_minutes: Option<u64>,
    pub max_items_per_cycle: Option<usize>,
    pub enabled_categories: Option<Vec<Category>>,
    pub quality_threshold_for_export: Option<u8>,
    pub target_length: Option<TargetLength>,
    pub tone: Option<String>,
    pub enrichment_delay_ms: Option<u64>,
}
