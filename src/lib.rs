pub mod classifier;
pub mod config;
pub mod dedup;
pub mod enrichment;
pub mod fetcher;
pub mod generator;
pub mod normalizer;
pub mod orchestrator;
pub mod parser;
pub mod sources;
pub mod store;
pub mod types;

pub use classifier::Classifier;
pub use config::{PipelineConfig, PipelineConfigUpdate, SourceConfig, SourceKind, TargetLength};
pub use dedup::{DedupStore, MemoryDedupStore, PgDedupStore};
pub use enrichment::{EnrichmentEngine, EnrichmentOptions};
pub use fetcher::{FetchClient, Fetcher};
pub use generator::{HttpGenerator, MockGenerator, TextGenerator};
pub use orchestrator::PipelineOrchestrator;
pub use parser::FeedParser;
pub use sources::NewsSource;
pub use store::{MemoryStore, PersistenceGateway, PgStore};
pub use types::*;
