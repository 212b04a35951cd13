use crate::types::{
    ArticleFilter, Category, ClassifiedArticle, GeneratedArticle, PipelineError, Priority, RawItem,
    Result, SourceRef,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// The only component that writes finished articles and raw items to
/// durable storage. Each call is a per-item transactional boundary; a
/// failure affects that item only.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn insert_raw_item(&self, item: &RawItem) -> Result<()>;

    async fn mark_raw_item_processed(&self, external_id: &str) -> Result<()>;

    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool>;

    async fn insert_article(&self, article: &ClassifiedArticle) -> Result<()>;

    /// Read path for the news UI and the training-data export consumer.
    async fn query_articles(&self, filter: &ArticleFilter) -> Result<Vec<ClassifiedArticle>>;
}

/// Postgres-backed gateway over the `raw_items` and `articles` tables.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceGateway for PgStore {
    async fn insert_raw_item(&self, item: &RawItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO raw_items (external_id, source_id, title, body, published_at, fetched_at, processed)
            VALUES ($1, $2, $3, $4, $5, $6, false)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(&item.external_id)
        .bind(&item.source_id)
        .bind(&item.title)
        .bind(&item.body)
        .bind(item.published_at)
        .bind(item.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_raw_item_processed(&self, external_id: &str) -> Result<()> {
        sqlx::query("UPDATE raw_items SET processed = true WHERE external_id = $1")
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM raw_items WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_article(&self, article: &ClassifiedArticle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO articles
                (id, title, content, summary, tags, estimated_read_time, enrichment_succeeded,
                 category, priority, quality_score, source_id, external_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&article.article.title)
        .bind(&article.article.content)
        .bind(&article.article.summary)
        .bind(&article.article.tags)
        .bind(article.article.estimated_read_time as i32)
        .bind(article.article.enrichment_succeeded)
        .bind(article.category.as_str())
        .bind(article.priority.as_str())
        .bind(article.quality_score as i32)
        .bind(&article.source_ref.source_id)
        .bind(&article.source_ref.external_id)
        .bind(article.created_at)
        .execute(&self.pool)
        .await?;

        debug!("Stored article for {}", article.source_ref.external_id);
        Ok(())
    }

    async fn query_articles(&self, filter: &ArticleFilter) -> Result<Vec<ClassifiedArticle>> {
        let limit = filter.limit.unwrap_or(100) as i64;

        let rows = sqlx::query(
            r#"
            SELECT title, content, summary, tags, estimated_read_time, enrichment_succeeded,
                   category, priority, quality_score, source_id, external_id, created_at
            FROM articles
            WHERE ($1::text IS NULL OR category = $1)
              AND ($2::text IS NULL OR priority = $2)
              AND ($3::int IS NULL OR quality_score >= $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(filter.category.map(|c| c.as_str().to_string()))
        .bind(filter.priority.map(|p| p.as_str().to_string()))
        .bind(filter.min_quality_score.map(|s| s as i32))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let articles = rows
            .into_iter()
            .map(|row| {
                let category: String = row.try_get("category").unwrap_or_default();
                let priority: String = row.try_get("priority").unwrap_or_default();
                ClassifiedArticle {
                    article: GeneratedArticle {
                        title: row.try_get("title").unwrap_or_default(),
                        content: row.try_get("content").unwrap_or_default(),
                        summary: row.try_get("summary").unwrap_or_default(),
                        tags: row.try_get("tags").unwrap_or_default(),
                        estimated_read_time: row.try_get::<i32, _>("estimated_read_time").unwrap_or(1)
                            as u32,
                        enrichment_succeeded: row.try_get("enrichment_succeeded").unwrap_or(false),
                    },
                    category: Category::parse(&category).unwrap_or(Category::General),
                    priority: Priority::parse(&priority).unwrap_or(Priority::Regular),
                    quality_score: row.try_get::<i32, _>("quality_score").unwrap_or(0) as u8,
                    source_ref: SourceRef {
                        source_id: row.try_get("source_id").unwrap_or_default(),
                        external_id: row.try_get("external_id").unwrap_or_default(),
                    },
                    created_at: row
                        .try_get::<DateTime<Utc>, _>("created_at")
                        .unwrap_or_else(|_| Utc::now()),
                }
            })
            .collect();

        Ok(articles)
    }
}

/// In-memory gateway for tests and local development. Individual article
/// inserts can be forced to fail to exercise per-item persistence error
/// handling.
#[derive(Default)]
pub struct MemoryStore {
    raw_items: Mutex<HashMap<String, (RawItem, bool)>>,
    articles: Mutex<Vec<ClassifiedArticle>>,
    failing_external_ids: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force `insert_article` to fail for this external id.
    pub async fn fail_inserts_for(&self, external_id: &str) {
        self.failing_external_ids
            .lock()
            .await
            .insert(external_id.to_string());
    }

    pub async fn article_count(&self) -> usize {
        self.articles.lock().await.len()
    }

    pub async fn raw_item_count(&self) -> usize {
        self.raw_items.lock().await.len()
    }

    pub async fn is_processed(&self, external_id: &str) -> Option<bool> {
        self.raw_items
            .lock()
            .await
            .get(external_id)
            .map(|(_, processed)| *processed)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn insert_raw_item(&self, item: &RawItem) -> Result<()> {
        self.raw_items
            .lock()
            .await
            .entry(item.external_id.clone())
            .or_insert_with(|| (item.clone(), false));
        Ok(())
    }

    async fn mark_raw_item_processed(&self, external_id: &str) -> Result<()> {
        if let Some((_, processed)) = self.raw_items.lock().await.get_mut(external_id) {
            *processed = true;
        }
        Ok(())
    }

    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool> {
        Ok(self.raw_items.lock().await.contains_key(external_id))
    }

    async fn insert_article(&self, article: &ClassifiedArticle) -> Result<()> {
        if self
            .failing_external_ids
            .lock()
            .await
            .contains(&article.source_ref.external_id)
        {
            return Err(PipelineError::Persistence {
                external_id: article.source_ref.external_id.clone(),
                reason: "simulated write failure".to_string(),
            });
        }

        self.articles.lock().await.push(article.clone());
        Ok(())
    }

    async fn query_articles(&self, filter: &ArticleFilter) -> Result<Vec<ClassifiedArticle>> {
        let articles = self.articles.lock().await;
        let mut matched: Vec<ClassifiedArticle> = articles
            .iter()
            .filter(|a| filter.category.map_or(true, |c| a.category == c))
            .filter(|a| filter.priority.map_or(true, |p| a.priority == p))
            .filter(|a| filter.min_quality_score.map_or(true, |s| a.quality_score >= s))
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}
