use async_trait::async_trait;
use chrono::Utc;
use f1_news_pipeline::config::{PipelineConfig, SourceConfig, SourceKind};
use f1_news_pipeline::dedup::{DedupStore, MemoryDedupStore};
use f1_news_pipeline::generator::MockGenerator;
use f1_news_pipeline::orchestrator::PipelineOrchestrator;
use f1_news_pipeline::sources::NewsSource;
use f1_news_pipeline::store::MemoryStore;
use f1_news_pipeline::types::{ArticleFilter, Category, PipelinePhase, Priority, RawItem, Result};
use std::sync::Arc;
use tracing::info;

/// Source double that replays the same canned items on every fetch,
/// mimicking an unchanged upstream feed.
struct StaticSource {
    config: SourceConfig,
    items: Vec<RawItem>,
}

impl StaticSource {
    fn new(id: &str, items: Vec<RawItem>) -> Self {
        Self {
            config: SourceConfig::new(id, format!("https://example.com/{}", id), SourceKind::Rss),
            items,
        }
    }

    fn with_config(mut self, config: SourceConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl NewsSource for StaticSource {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn fetch(&mut self) -> Result<Vec<RawItem>> {
        Ok(self.items.clone())
    }
}

/// Source double whose fetch always fails.
struct BrokenSource {
    config: SourceConfig,
}

impl BrokenSource {
    fn new(id: &str) -> Self {
        Self {
            config: SourceConfig::new(id, format!("https://example.com/{}", id), SourceKind::Rss),
        }
    }
}

#[async_trait]
impl NewsSource for BrokenSource {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn fetch(&mut self) -> Result<Vec<RawItem>> {
        Err(f1_news_pipeline::types::PipelineError::SourceFetch {
            source_id: self.config.id.clone(),
            reason: "connection refused".to_string(),
        })
    }
}

fn raw_item(source_id: &str, external_id: &str, title: &str) -> RawItem {
    let now = Utc::now();
    RawItem {
        source_id: source_id.to_string(),
        external_id: external_id.to_string(),
        title: title.to_string(),
        body: format!("{} - full report from the paddock with plenty of detail.", title),
        published_at: now,
        fetched_at: now,
    }
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        enrichment_delay_ms: 0,
        ..Default::default()
    }
}

struct TestHarness {
    orchestrator: Arc<PipelineOrchestrator>,
    dedup: Arc<MemoryDedupStore>,
    store: Arc<MemoryStore>,
}

fn harness(config: PipelineConfig) -> TestHarness {
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).try_init();

    let dedup = Arc::new(MemoryDedupStore::new());
    let store = Arc::new(MemoryStore::new());
    let generator = Arc::new(MockGenerator::new("test"));
    let orchestrator = Arc::new(
        PipelineOrchestrator::new(dedup.clone(), store.clone(), generator, config).unwrap(),
    );

    TestHarness { orchestrator, dedup, store }
}

fn harness_with_generator(
    config: PipelineConfig,
    generator: MockGenerator,
) -> TestHarness {
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).try_init();

    let dedup = Arc::new(MemoryDedupStore::new());
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Arc::new(
        PipelineOrchestrator::new(dedup.clone(), store.clone(), Arc::new(generator), config)
            .unwrap(),
    );

    TestHarness { orchestrator, dedup, store }
}

#[tokio::test]
async fn second_cycle_against_unchanged_sources_produces_nothing() {
    let h = harness(test_config());
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "autosport",
            vec![
                raw_item("autosport", "a1", "Verstappen takes pole"),
                raw_item("autosport", "a2", "Ferrari confirm upgrade"),
                raw_item("autosport", "a3", "Alonso extends contract"),
            ],
        )))
        .await;

    let first = h.orchestrator.run_cycle().await;
    assert!(first.success, "{}", first.message);
    let status = h.orchestrator.get_status().await;
    assert_eq!(status.counters.articles_produced, 3);

    let second = h.orchestrator.run_cycle().await;
    assert!(second.success, "{}", second.message);
    let status = h.orchestrator.get_status().await;
    assert_eq!(status.counters.items_fetched, 3);
    assert_eq!(status.counters.items_deduped, 3);
    assert_eq!(status.counters.articles_produced, 0);
    assert_eq!(h.store.article_count().await, 3);
}

#[tokio::test]
async fn two_source_scenario_counts_fetched_deduped_produced() {
    let h = harness(test_config());
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "source-a",
            vec![
                raw_item("source-a", "a1", "Story one"),
                raw_item("source-a", "a2", "Story two"),
                raw_item("source-a", "a3", "Story three"),
            ],
        )))
        .await;
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "source-b",
            vec![
                raw_item("source-b", "b1", "Story four"),
                raw_item("source-b", "b2", "Story five"),
            ],
        )))
        .await;

    // a3 was ingested in some earlier cycle.
    h.dedup.mark_seen("a3", "source-a").await.unwrap();

    let response = h.orchestrator.run_cycle().await;
    assert!(response.success, "{}", response.message);

    let status = h.orchestrator.get_status().await;
    assert_eq!(status.counters.items_fetched, 5);
    assert_eq!(status.counters.items_deduped, 1);
    assert_eq!(status.counters.articles_produced, 4);
    assert_eq!(status.counters.articles_failed, 0);

    for id in ["a1", "a2", "b1", "b2"] {
        assert!(h.dedup.has_seen(id).await.unwrap(), "{} should be marked seen", id);
    }
}

#[tokio::test]
async fn start_while_running_is_rejected_without_disturbing_the_run() {
    let h = harness(test_config());
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "autosport",
            vec![raw_item("autosport", "a1", "Story")],
        )))
        .await;

    let first = h.orchestrator.start(test_config()).await;
    assert!(first.success);

    let second = h.orchestrator.start(test_config()).await;
    assert!(!second.success);
    info!("Second start rejected: {}", second.message);

    let status = h.orchestrator.get_status().await;
    assert!(status.scheduled, "original schedule must remain live");

    let stopped = h.orchestrator.stop().await;
    assert!(stopped.success);
    let stopped_again = h.orchestrator.stop().await;
    assert!(!stopped_again.success);
}

#[tokio::test]
async fn concurrent_manual_trigger_is_rejected_not_queued() {
    // Slow generator keeps the first cycle in flight long enough for the
    // second trigger to observe it.
    let h = harness_with_generator(test_config(), MockGenerator::new("slow").with_delay(300));
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "autosport",
            vec![raw_item("autosport", "a1", "Story")],
        )))
        .await;

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.run_cycle().await });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let second = h.orchestrator.run_cycle().await;
    assert!(!second.success);
    assert!(second.message.contains("already in progress"));

    let first = first.await.unwrap();
    assert!(first.success, "{}", first.message);
}

#[tokio::test]
async fn start_during_manual_cycle_is_rejected_and_leaves_nothing_scheduled() {
    let h = harness_with_generator(test_config(), MockGenerator::new("slow").with_delay(300));
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "autosport",
            vec![raw_item("autosport", "a1", "Story")],
        )))
        .await;

    let orchestrator = h.orchestrator.clone();
    let manual = tokio::spawn(async move { orchestrator.run_cycle().await });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let started = h.orchestrator.start(test_config()).await;
    assert!(!started.success);
    assert!(started.message.contains("already in progress"));

    let status = h.orchestrator.get_status().await;
    assert!(!status.scheduled, "rejected start must not leave a schedule behind");

    let manual = manual.await.unwrap();
    assert!(manual.success, "{}", manual.message);
    let completed_after_manual = h.orchestrator.get_status().await.last_run_completed_at;

    // With the manual cycle done, starting works and runs its first
    // cycle right away.
    let started = h.orchestrator.start(test_config()).await;
    assert!(started.success, "{}", started.message);
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let status = h.orchestrator.get_status().await;
    assert!(
        status.last_run_completed_at > completed_after_manual,
        "first scheduled cycle must actually run"
    );
    assert!(h.orchestrator.stop().await.success);
}

#[tokio::test]
async fn generator_outage_produces_fallback_articles_not_failures() {
    let items = vec![
        raw_item("autosport", "a1", "Story one"),
        raw_item("autosport", "a2", "Story two"),
    ];

    let down = harness_with_generator(test_config(), MockGenerator::new("down").failing());
    down.orchestrator
        .add_source_adapter(Box::new(StaticSource::new("autosport", items.clone())))
        .await;
    let response = down.orchestrator.run_cycle().await;
    assert!(response.success, "{}", response.message);

    let status = down.orchestrator.get_status().await;
    assert_eq!(status.counters.articles_produced, 2);
    assert_eq!(status.counters.articles_failed, 0, "fallback is success, not failure");

    let up = harness(test_config());
    up.orchestrator
        .add_source_adapter(Box::new(StaticSource::new("autosport", items)))
        .await;
    assert!(up.orchestrator.run_cycle().await.success);

    let fallback_articles = down.orchestrator.query_articles(&ArticleFilter::default()).await.unwrap();
    let enriched_articles = up.orchestrator.query_articles(&ArticleFilter::default()).await.unwrap();
    assert_eq!(fallback_articles.len(), 2);

    for fallback in &fallback_articles {
        assert!(!fallback.article.enrichment_succeeded);
        let enriched = enriched_articles
            .iter()
            .find(|a| a.source_ref.external_id == fallback.source_ref.external_id)
            .unwrap();
        assert!(enriched.article.enrichment_succeeded);
        assert!(
            fallback.quality_score < enriched.quality_score,
            "fallback score must be uniformly lower"
        );
    }
}

#[tokio::test]
async fn one_broken_source_does_not_abort_the_cycle() {
    let h = harness(test_config());
    h.orchestrator
        .add_source_adapter(Box::new(BrokenSource::new("flaky-feed")))
        .await;
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "autosport",
            vec![raw_item("autosport", "a1", "Story")],
        )))
        .await;

    let response = h.orchestrator.run_cycle().await;
    assert!(response.success, "{}", response.message);

    let status = h.orchestrator.get_status().await;
    assert_eq!(status.counters.items_fetched, 1);
    assert_eq!(status.counters.articles_produced, 1);

    let health = h.orchestrator.source_health().await;
    assert_eq!(health["flaky-feed"].consecutive_errors, 1);
    assert!(health["flaky-feed"].last_error.is_some());
    assert_eq!(health["autosport"].consecutive_errors, 0);
}

#[tokio::test]
async fn unreachable_dedup_store_fails_the_cycle_but_not_the_pipeline() {
    let h = harness(test_config());
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "autosport",
            vec![raw_item("autosport", "a1", "Story")],
        )))
        .await;

    h.dedup.set_available(false);
    let response = h.orchestrator.run_cycle().await;
    assert!(!response.success);

    let status = h.orchestrator.get_status().await;
    assert_eq!(status.phase, PipelinePhase::Failed);
    assert_eq!(h.store.article_count().await, 0, "no articles may be published");

    // Store comes back; the next tick succeeds.
    h.dedup.set_available(true);
    let response = h.orchestrator.run_cycle().await;
    assert!(response.success, "{}", response.message);
    let status = h.orchestrator.get_status().await;
    assert_eq!(status.phase, PipelinePhase::Idle);
    assert_eq!(status.counters.articles_produced, 1);
}

#[tokio::test]
async fn persistence_failure_is_isolated_and_item_stays_unseen() {
    let h = harness(test_config());
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "autosport",
            vec![
                raw_item("autosport", "a1", "Story one"),
                raw_item("autosport", "a2", "Story two"),
            ],
        )))
        .await;

    h.store.fail_inserts_for("a2").await;

    let response = h.orchestrator.run_cycle().await;
    assert!(response.success, "{}", response.message);

    let status = h.orchestrator.get_status().await;
    assert_eq!(status.counters.articles_produced, 1);
    assert_eq!(status.counters.articles_failed, 1);

    // The failed item was never marked seen, so a later cycle retries it.
    assert!(h.dedup.has_seen("a1").await.unwrap());
    assert!(!h.dedup.has_seen("a2").await.unwrap());
}

#[tokio::test]
async fn malformed_items_still_become_articles() {
    let h = harness(test_config());
    let now = Utc::now();
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "autosport",
            vec![RawItem {
                source_id: "autosport".to_string(),
                external_id: "empty-1".to_string(),
                title: String::new(),
                body: String::new(),
                published_at: now,
                fetched_at: now,
            }],
        )))
        .await;

    let response = h.orchestrator.run_cycle().await;
    assert!(response.success, "{}", response.message);

    let status = h.orchestrator.get_status().await;
    assert_eq!(status.counters.articles_produced, 1);
    assert_eq!(status.counters.articles_failed, 0);
}

#[tokio::test]
async fn category_allow_list_filters_provisional_categories() {
    let mut config = test_config();
    config.enabled_categories = vec![Category::Tech];

    let h = harness(config);
    let tech = SourceConfig::new("tech-feed", "https://example.com/tech", SourceKind::Rss)
        .with_defaults(Category::Tech, Priority::Regular);
    h.orchestrator
        .add_source_adapter(Box::new(
            StaticSource::new("tech-feed", vec![raw_item("tech-feed", "t1", "Floor upgrade")])
                .with_config(tech),
        ))
        .await;
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "gossip-feed",
            vec![raw_item("gossip-feed", "g1", "Paddock whispers")],
        )))
        .await;

    let response = h.orchestrator.run_cycle().await;
    assert!(response.success, "{}", response.message);

    let status = h.orchestrator.get_status().await;
    assert_eq!(status.counters.items_fetched, 2);
    assert_eq!(status.counters.articles_produced, 1);

    let articles = h.orchestrator.query_articles(&ArticleFilter::default()).await.unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].source_ref.external_id, "t1");
}

#[tokio::test]
async fn update_config_applies_on_next_cycle_and_rejects_bad_input() {
    let h = harness(test_config());
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "autosport",
            vec![
                raw_item("autosport", "a1", "Story one"),
                raw_item("autosport", "a2", "Story two"),
                raw_item("autosport", "a3", "Story three"),
            ],
        )))
        .await;

    let bad = f1_news_pipeline::PipelineConfigUpdate {
        cycle_interval_minutes: Some(0),
        ..Default::default()
    };
    let response = h.orchestrator.update_config(bad).await;
    assert!(!response.success);

    let update = f1_news_pipeline::PipelineConfigUpdate {
        max_items_per_cycle: Some(2),
        ..Default::default()
    };
    assert!(h.orchestrator.update_config(update).await.success);

    let response = h.orchestrator.run_cycle().await;
    assert!(response.success, "{}", response.message);
    let status = h.orchestrator.get_status().await;
    assert_eq!(status.counters.articles_produced, 2, "per-cycle cap applies");
    assert_eq!(status.max_items_per_cycle, 2);
}

#[tokio::test]
async fn article_read_path_filters_by_score_threshold() {
    let h = harness(test_config());
    h.orchestrator
        .add_source_adapter(Box::new(StaticSource::new(
            "autosport",
            vec![raw_item("autosport", "a1", "Verstappen and Ferrari strategy story")],
        )))
        .await;

    assert!(h.orchestrator.run_cycle().await.success);

    let all = h.orchestrator.query_articles(&ArticleFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    let score = all[0].quality_score;

    let filter = ArticleFilter { min_quality_score: Some(score), ..Default::default() };
    assert_eq!(h.orchestrator.query_articles(&filter).await.unwrap().len(), 1);

    let filter = ArticleFilter { min_quality_score: Some(score + 1), ..Default::default() };
    assert_eq!(h.orchestrator.query_articles(&filter).await.unwrap().len(), 0);
}
