use crate::classifier::Classifier;
use crate::config::{PipelineConfig, PipelineConfigUpdate, SourceConfig};
use crate::dedup::DedupStore;
use crate::enrichment::{EnrichmentEngine, EnrichmentOptions};
use crate::fetcher::Fetcher;
use crate::generator::TextGenerator;
use crate::normalizer::normalize;
use crate::sources::{build_source, NewsSource};
use crate::store::PersistenceGateway;
use crate::types::{
    ArticleFilter, ClassifiedArticle, CycleCounters, NormalizedContent, OpResponse, PipelineError,
    PipelinePhase, PipelineRunState, RawItem, Result,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

/// Health snapshot for one source, exposed alongside pipeline status.
#[derive(Debug, Clone, Default)]
pub struct SourceHealth {
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub last_successful_fetch: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct RunBookkeeping {
    phase: Option<PipelinePhase>,
    last_run_started_at: Option<DateTime<Utc>>,
    last_run_completed_at: Option<DateTime<Utc>>,
    counters: CycleCounters,
    source_health: HashMap<String, SourceHealth>,
}

struct Inner {
    sources: Mutex<Vec<Arc<Mutex<Box<dyn NewsSource>>>>>,
    dedup: Arc<dyn DedupStore>,
    gateway: Arc<dyn PersistenceGateway>,
    generator: Arc<dyn TextGenerator>,
    config: RwLock<PipelineConfig>,
    bookkeeping: RwLock<RunBookkeeping>,
    /// Guards the "no concurrent cycles" invariant via compare-and-set.
    cycle_running: AtomicBool,
    /// Orthogonal to `cycle_running`: whether the recurring timer is live.
    scheduled: AtomicBool,
    /// Bumped on every `start`; a scheduler task exits when its epoch is
    /// stale, so a stop/start pair can never leave two live timers.
    scheduler_epoch: AtomicU64,
    stop_notify: Notify,
}

/// Handle object owning the ingest -> normalize -> dedupe -> enrich ->
/// classify -> persist pipeline. The embedding process holds at most one;
/// concurrent `start`/`run_cycle` calls on the same handle are rejected by
/// the atomic state flags, never queued or merged.
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
    fetcher: Arc<Fetcher>,
}

impl PipelineOrchestrator {
    pub fn new(
        dedup: Arc<dyn DedupStore>,
        gateway: Arc<dyn PersistenceGateway>,
        generator: Arc<dyn TextGenerator>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let fetcher = Arc::new(Fetcher::new(config.fetch_timeout_secs)?);
        Ok(Self {
            inner: Arc::new(Inner {
                sources: Mutex::new(Vec::new()),
                dedup,
                gateway,
                generator,
                config: RwLock::new(config),
                bookkeeping: RwLock::new(RunBookkeeping::default()),
                cycle_running: AtomicBool::new(false),
                scheduled: AtomicBool::new(false),
                scheduler_epoch: AtomicU64::new(0),
                stop_notify: Notify::new(),
            }),
            fetcher,
        })
    }

    /// Register a source by configuration, building the adapter that
    /// matches its kind.
    pub async fn add_source(&self, config: SourceConfig) {
        info!("Adding source {} ({})", config.id, config.url);
        let source = build_source(config, self.fetcher.clone());
        self.inner.sources.lock().await.push(Arc::new(Mutex::new(source)));
    }

    /// Register a pre-built adapter (used by tests and embedders with
    /// custom source types).
    pub async fn add_source_adapter(&self, source: Box<dyn NewsSource>) {
        info!("Adding source adapter {}", source.source_id());
        self.inner.sources.lock().await.push(Arc::new(Mutex::new(source)));
    }

    /// Start the recurring schedule and immediately trigger one cycle.
    /// Rejected if already scheduled or while a cycle is in flight; the
    /// existing run is left untouched.
    pub async fn start(&self, config: PipelineConfig) -> OpResponse {
        if let Err(e) = config.validate() {
            return OpResponse::rejected(e.to_string());
        }

        if self
            .inner
            .scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return OpResponse::rejected("pipeline is already running");
        }

        // A manual cycle still in flight would swallow the immediate
        // first cycle this call promises.
        if self.inner.cycle_running.load(Ordering::SeqCst) {
            self.inner.scheduled.store(false, Ordering::SeqCst);
            return OpResponse::rejected("a cycle is already in progress");
        }

        *self.inner.config.write().await = config;
        let epoch = self.inner.scheduler_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            info!("Pipeline scheduler started");
            loop {
                let response = Inner::try_run_cycle(&inner).await;
                if !response.success {
                    debug!("Scheduled cycle skipped: {}", response.message);
                }

                let interval_minutes = inner.config.read().await.cycle_interval_minutes;
                let sleep = tokio::time::sleep(Duration::from_secs(interval_minutes * 60));

                tokio::select! {
                    _ = sleep => {}
                    _ = inner.stop_notify.notified() => {}
                }

                let stale = inner.scheduler_epoch.load(Ordering::SeqCst) != epoch;
                if stale || !inner.scheduled.load(Ordering::SeqCst) {
                    info!("Pipeline scheduler stopped");
                    break;
                }
            }
        });

        OpResponse::ok("pipeline started")
    }

    /// Cancel the timer. An in-flight cycle is allowed to finish.
    pub async fn stop(&self) -> OpResponse {
        if self
            .inner
            .scheduled
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return OpResponse::rejected("pipeline is not running");
        }

        self.inner.stop_notify.notify_waiters();
        OpResponse::ok("pipeline stopped")
    }

    /// Manual trigger, safe with or without an active schedule. Rejected
    /// while another cycle is in flight.
    pub async fn run_cycle(&self) -> OpResponse {
        Inner::try_run_cycle(&self.inner).await
    }

    /// Merge a partial update into the live configuration; effective on
    /// the next cycle. Invalid updates are rejected with no state change.
    pub async fn update_config(&self, update: PipelineConfigUpdate) -> OpResponse {
        let merged = self.inner.config.read().await.merged(&update);
        if let Err(e) = merged.validate() {
            return OpResponse::rejected(e.to_string());
        }

        *self.inner.config.write().await = merged;
        info!("Pipeline configuration updated");
        OpResponse::ok("configuration updated")
    }

    pub async fn get_status(&self) -> PipelineRunState {
        let config = self.inner.config.read().await;
        let bookkeeping = self.inner.bookkeeping.read().await;
        let is_running = self.inner.cycle_running.load(Ordering::SeqCst);

        PipelineRunState {
            is_running,
            scheduled: self.inner.scheduled.load(Ordering::SeqCst),
            phase: if is_running {
                PipelinePhase::Running
            } else {
                bookkeeping.phase.unwrap_or(PipelinePhase::Idle)
            },
            last_run_started_at: bookkeeping.last_run_started_at,
            last_run_completed_at: bookkeeping.last_run_completed_at,
            cycle_interval_minutes: config.cycle_interval_minutes,
            max_items_per_cycle: config.max_items_per_cycle,
            counters: bookkeeping.counters,
        }
    }

    pub async fn source_health(&self) -> HashMap<String, SourceHealth> {
        self.inner.bookkeeping.read().await.source_health.clone()
    }

    /// Read path for finished articles, passed through to the gateway.
    pub async fn query_articles(&self, filter: &ArticleFilter) -> Result<Vec<ClassifiedArticle>> {
        self.inner.gateway.query_articles(filter).await
    }
}

impl Inner {
    /// Single entry point for both scheduled and manual cycles; the CAS
    /// here is what makes concurrent triggers rejections instead of queues.
    async fn try_run_cycle(inner: &Arc<Inner>) -> OpResponse {
        if inner
            .cycle_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return OpResponse::rejected("a cycle is already in progress");
        }

        let result = inner.execute_cycle().await;
        inner.cycle_running.store(false, Ordering::SeqCst);

        match result {
            Ok(counters) => OpResponse::ok(format!(
                "cycle complete: {} fetched, {} deduped, {} produced, {} failed",
                counters.items_fetched,
                counters.items_deduped,
                counters.articles_produced,
                counters.articles_failed
            )),
            Err(e) => {
                error!("Cycle failed: {}", e);
                OpResponse::rejected(format!("cycle failed: {}", e))
            }
        }
    }

    async fn execute_cycle(&self) -> Result<CycleCounters> {
        let started_at = Utc::now();
        {
            let mut bookkeeping = self.bookkeeping.write().await;
            bookkeeping.phase = Some(PipelinePhase::Running);
            bookkeeping.last_run_started_at = Some(started_at);
            bookkeeping.counters = CycleCounters::default();
        }

        let result = self.run_stages().await;

        let mut bookkeeping = self.bookkeeping.write().await;
        match result {
            Ok(counters) => {
                bookkeeping.phase = Some(PipelinePhase::Idle);
                bookkeeping.last_run_completed_at = Some(Utc::now());
                bookkeeping.counters = counters;
                info!(
                    "Cycle complete: fetched={} deduped={} produced={} failed={}",
                    counters.items_fetched,
                    counters.items_deduped,
                    counters.articles_produced,
                    counters.articles_failed
                );
                Ok(counters)
            }
            Err(e) => {
                bookkeeping.phase = Some(PipelinePhase::Failed);
                bookkeeping.last_run_completed_at = Some(Utc::now());
                Err(e)
            }
        }
    }

    async fn run_stages(&self) -> Result<CycleCounters> {
        let config = self.config.read().await.clone();
        let mut counters = CycleCounters::default();

        // Stage 1: fetch all sources with bounded fan-out. One source's
        // failure yields zero items for that source, nothing more.
        let (fetched, source_configs) = self.fetch_all_sources(&config).await;
        counters.items_fetched = fetched.len();

        // Stage 2: dedupe. In-batch duplicates are dropped first, then the
        // persistent store is consulted. A store error here is a
        // cycle-level failure: correctness over liveness.
        let mut batch_seen: HashSet<String> = HashSet::new();
        let mut fresh: Vec<RawItem> = Vec::new();
        for item in fetched {
            if !batch_seen.insert(item.external_id.clone()) {
                counters.items_deduped += 1;
                continue;
            }
            if self.dedup.has_seen(&item.external_id).await? {
                counters.items_deduped += 1;
                continue;
            }
            fresh.push(item);
        }

        if fresh.len() > config.max_items_per_cycle {
            debug!(
                "Capping cycle at {} items ({} deferred to later cycles)",
                config.max_items_per_cycle,
                fresh.len() - config.max_items_per_cycle
            );
            fresh.truncate(config.max_items_per_cycle);
        }

        // Stage 3: normalize, then apply the category allow-list.
        let mut pipeline_items: Vec<(RawItem, NormalizedContent)> = Vec::new();
        for item in fresh {
            let source_config = source_configs.get(&item.source_id);
            let normalized = match source_config {
                Some(sc) => normalize(&item, sc),
                None => {
                    warn!("No source config for {}, skipping item", item.source_id);
                    continue;
                }
            };

            if !config.category_enabled(normalized.provisional_category) {
                debug!(
                    "Skipping {} (category {} disabled)",
                    normalized.external_id,
                    normalized.provisional_category.as_str()
                );
                continue;
            }

            pipeline_items.push((item, normalized));
        }

        // Stage 4: enrich sequentially with rate-limit spacing.
        let engine = EnrichmentEngine::new(self.generator.clone())
            .with_timeout(Duration::from_secs(config.generation_timeout_secs))
            .with_inter_item_delay(Duration::from_millis(config.enrichment_delay_ms));
        let options = EnrichmentOptions {
            target_length: config.target_length,
            tone: config.tone.clone(),
            category_hint: None,
        };

        let normalized_batch: Vec<NormalizedContent> =
            pipeline_items.iter().map(|(_, n)| n.clone()).collect();
        let outcomes = engine.enrich_batch(&normalized_batch, &options).await;

        // Stage 5: classify and persist, per-item isolation.
        let classifier = Classifier::new(config.target_length);
        for ((raw, normalized), outcome) in pipeline_items.into_iter().zip(outcomes) {
            let classified = classifier.classify(outcome.article, &normalized);

            if let Err(e) = self.persist_item(&raw, &classified).await {
                warn!("Persistence failed for {}: {}", raw.external_id, e);
                counters.articles_failed += 1;
                continue;
            }

            // Marking seen last means a persistence failure leaves the
            // item eligible for a later cycle. Store errors here are
            // cycle-level, same as the has_seen path.
            self.dedup.mark_seen(&raw.external_id, &raw.source_id).await?;
            if let Err(e) = self.gateway.mark_raw_item_processed(&raw.external_id).await {
                warn!("Failed to mark {} processed: {}", raw.external_id, e);
            }

            counters.articles_produced += 1;
        }

        // Retention is best-effort: a prune failure only costs storage.
        let cutoff = Utc::now() - ChronoDuration::days(config.dedup_retention_days as i64);
        if let Err(e) = self.dedup.prune_before(cutoff).await {
            warn!("Dedup prune failed: {}", e);
        }

        Ok(counters)
    }

    /// Fan out over all sources with bounded concurrency. Returns every
    /// fetched item plus a source-id -> config map for normalization.
    async fn fetch_all_sources(
        &self,
        config: &PipelineConfig,
    ) -> (Vec<RawItem>, HashMap<String, SourceConfig>) {
        let sources = self.sources.lock().await.clone();
        let mut source_configs = HashMap::new();

        let mut futures = FuturesUnordered::new();
        let mut pending = sources.into_iter();
        let mut items = Vec::new();
        let mut results: Vec<(String, Result<Vec<RawItem>>)> = Vec::new();

        loop {
            while futures.len() < config.fetch_concurrency {
                let Some(source) = pending.next() else { break };
                futures.push(async move {
                    let mut source = source.lock().await;
                    let id = source.source_id().to_string();
                    let config = source.config().clone();
                    let result = source.fetch().await;
                    (id, config, result)
                });
            }

            let Some((id, source_config, result)) = futures.next().await else { break };
            source_configs.insert(id.clone(), source_config);
            results.push((id, result));
        }

        let mut bookkeeping = self.bookkeeping.write().await;
        for (id, result) in results {
            let health = bookkeeping.source_health.entry(id.clone()).or_default();
            match result {
                Ok(fetched) => {
                    info!("Source {} yielded {} items", id, fetched.len());
                    health.consecutive_errors = 0;
                    health.last_error = None;
                    health.last_successful_fetch = Some(Utc::now());
                    items.extend(fetched);
                }
                Err(e) => {
                    // Primary failure-isolation boundary: the source
                    // contributes nothing this cycle and the cycle goes on.
                    error!("Source {} failed: {}", id, e);
                    health.consecutive_errors += 1;
                    health.last_error = Some(e.to_string());
                }
            }
        }

        (items, source_configs)
    }

    async fn persist_item(&self, raw: &RawItem, classified: &ClassifiedArticle) -> Result<()> {
        self.gateway
            .insert_raw_item(raw)
            .await
            .map_err(|e| PipelineError::Persistence {
                external_id: raw.external_id.clone(),
                reason: e.to_string(),
            })?;

        self.gateway
            .insert_article(classified)
            .await
            .map_err(|e| PipelineError::Persistence {
                external_id: raw.external_id.clone(),
                reason: e.to_string(),
            })?;

        Ok(())
    }
}
