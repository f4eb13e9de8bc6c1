//! Record Store Adapter: a narrow interface over Postgres, idempotent on
//! the `(task_id, url)` key. Pool setup and embedded-migration loading
//! follow the teacher's `Storage`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crawlhub_core::{
    CrawlError, FetchOutcome, PageMetadataFields, Pagination, RecordStore, TaskConfig, TaskCounters,
    UrlFilter, UrlRecord, UrlStatus,
};

pub mod testing;

#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, CrawlError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| CrawlError::StoreError(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), CrawlError> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::StoreError(e.to_string()))?;
        Ok(())
    }

    pub async fn insert_task(
        &self,
        config: &crawlhub_core::TaskConfig,
    ) -> Result<(), CrawlError> {
        sqlx::query(
            "INSERT INTO tasks (id, seed_url, strategy, max_depth, worker_count, request_interval_secs, retry_times, respect_robots, allow_cross_domain)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&config.id)
        .bind(&config.seed_url)
        .bind(strategy_str(config.strategy))
        .bind(config.max_depth as i32)
        .bind(config.worker_count as i32)
        .bind(config.request_interval.as_secs_f64())
        .bind(config.retry_times as i32)
        .bind(config.respect_robots)
        .bind(config.allow_cross_domain)
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlError::StoreError(e.to_string()))?;
        Ok(())
    }

    /// Idempotent: a second `offer` of a URL the frontier already accepted
    /// never reaches here, but a restart rehydration pass may call this
    /// again for the same key, so conflicts are silently ignored.
    pub async fn upsert_pending(&self, task_id: &str, url: &str, depth: u32) -> Result<(), CrawlError> {
        sqlx::query(
            "INSERT INTO url_records (task_id, url, depth, status)
             VALUES ($1, $2, $3, 'pending')
             ON CONFLICT (task_id, url) DO NOTHING",
        )
        .bind(task_id)
        .bind(url)
        .bind(depth as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlError::StoreError(e.to_string()))?;
        Ok(())
    }

    pub async fn mark_robots_blocked(&self, task_id: &str, url: &str, depth: u32) -> Result<(), CrawlError> {
        sqlx::query(
            "INSERT INTO url_records (task_id, url, depth, status, completed_at)
             VALUES ($1, $2, $3, 'robots_blocked', NOW())
             ON CONFLICT (task_id, url) DO UPDATE SET status = 'robots_blocked', completed_at = NOW()",
        )
        .bind(task_id)
        .bind(url)
        .bind(depth as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlError::StoreError(e.to_string()))?;
        Ok(())
    }

    pub async fn finalize(&self, task_id: &str, url: &str, outcome: &FetchOutcome) -> Result<(), CrawlError> {
        match outcome {
            FetchOutcome::Completed {
                status_code,
                response_time_seconds,
                file_size_bytes,
                content_type,
                metadata,
            } => self.finalize_completed(
                task_id,
                url,
                *status_code,
                *response_time_seconds,
                *file_size_bytes,
                content_type.as_deref(),
                metadata,
            ).await,
            FetchOutcome::Failed {
                error_message,
                status_code,
            } => self.finalize_failed(task_id, url, error_message, *status_code).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize_completed(
        &self,
        task_id: &str,
        url: &str,
        status_code: u16,
        response_time_seconds: f64,
        file_size_bytes: u64,
        content_type: Option<&str>,
        metadata: &PageMetadataFields,
    ) -> Result<(), CrawlError> {
        sqlx::query(
            "INSERT INTO url_records (task_id, url, depth, status, status_code, response_time_seconds, file_size_bytes, content_type, title, author, description, keywords, publish_time, completed_at)
             VALUES ($1, $2, 0, 'completed', $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
             ON CONFLICT (task_id, url) DO UPDATE SET
                status = 'completed',
                status_code = $3,
                response_time_seconds = $4,
                file_size_bytes = $5,
                content_type = $6,
                title = $7,
                author = $8,
                description = $9,
                keywords = $10,
                publish_time = $11,
                completed_at = NOW()",
        )
        .bind(task_id)
        .bind(url)
        .bind(status_code as i32)
        .bind(response_time_seconds)
        .bind(file_size_bytes as i64)
        .bind(content_type)
        .bind(&metadata.title)
        .bind(&metadata.author)
        .bind(&metadata.description)
        .bind(&metadata.keywords)
        .bind(&metadata.publish_time)
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlError::StoreError(e.to_string()))?;
        Ok(())
    }

    async fn finalize_failed(
        &self,
        task_id: &str,
        url: &str,
        error_message: &str,
        status_code: Option<u16>,
    ) -> Result<(), CrawlError> {
        sqlx::query(
            "INSERT INTO url_records (task_id, url, depth, status, status_code, error_message, completed_at)
             VALUES ($1, $2, 0, 'failed', $3, $4, NOW())
             ON CONFLICT (task_id, url) DO UPDATE SET
                status = 'failed',
                status_code = $3,
                error_message = $4,
                completed_at = NOW()",
        )
        .bind(task_id)
        .bind(url)
        .bind(status_code.map(|c| c as i32))
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlError::StoreError(e.to_string()))?;
        Ok(())
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<(), CrawlError> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::StoreError(e.to_string()))?;
        Ok(())
    }

    pub async fn list_urls(
        &self,
        task_id: &str,
        filter: UrlFilter,
        pagination: Pagination,
    ) -> Result<Vec<UrlRecord>, CrawlError> {
        let rows = match filter.status {
            Some(status) => {
                sqlx::query(
                    "SELECT task_id, url, depth, status, status_code, response_time_seconds, file_size_bytes, content_type, title, author, description, keywords, publish_time, error_message, created_at, completed_at
                     FROM url_records WHERE task_id = $1 AND status = $2
                     ORDER BY created_at LIMIT $3 OFFSET $4",
                )
                .bind(task_id)
                .bind(status_str(status))
                .bind(pagination.limit)
                .bind(pagination.offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT task_id, url, depth, status, status_code, response_time_seconds, file_size_bytes, content_type, title, author, description, keywords, publish_time, error_message, created_at, completed_at
                     FROM url_records WHERE task_id = $1
                     ORDER BY created_at LIMIT $2 OFFSET $3",
                )
                .bind(task_id)
                .bind(pagination.limit)
                .bind(pagination.offset)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| CrawlError::StoreError(e.to_string()))?;

        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn aggregate_stats(&self, task_id: &str) -> Result<TaskCounters, CrawlError> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'robots_blocked') AS robots_blocked,
                COALESCE(SUM(file_size_bytes) FILTER (WHERE status = 'completed'), 0) AS bytes,
                COALESCE(SUM(response_time_seconds) FILTER (WHERE status = 'completed'), 0.0) AS response_time_sum
             FROM url_records WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CrawlError::StoreError(e.to_string()))?;

        Ok(TaskCounters {
            total_discovered: row.try_get::<i64, _>("total").unwrap_or(0) as u64,
            completed: row.try_get::<i64, _>("completed").unwrap_or(0) as u64,
            failed: row.try_get::<i64, _>("failed").unwrap_or(0) as u64,
            robots_blocked: row.try_get::<i64, _>("robots_blocked").unwrap_or(0) as u64,
            bytes: row.try_get::<i64, _>("bytes").unwrap_or(0) as u64,
            response_time_sum_seconds: row.try_get::<f64, _>("response_time_sum").unwrap_or(0.0),
            cross_domain_blocked: 0,
            depth_blocked: 0,
            duplicate_rejected: 0,
        })
    }

    /// All URLs this task has already recorded (pending, terminal, or
    /// blocked), for rehydrating the frontier's seen-set on restart.
    pub async fn load_known_urls(&self, task_id: &str) -> Result<Vec<String>, CrawlError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM url_records WHERE task_id = $1")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CrawlError::StoreError(e.to_string()))?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Thin forwarding impl so the engine can depend on `RecordStore` instead
/// of this crate's `sqlx`/Postgres stack directly.
#[async_trait]
impl RecordStore for Storage {
    async fn insert_task(&self, config: &TaskConfig) -> Result<(), CrawlError> {
        Storage::insert_task(self, config).await
    }

    async fn upsert_pending(&self, task_id: &str, url: &str, depth: u32) -> Result<(), CrawlError> {
        Storage::upsert_pending(self, task_id, url, depth).await
    }

    async fn mark_robots_blocked(&self, task_id: &str, url: &str, depth: u32) -> Result<(), CrawlError> {
        Storage::mark_robots_blocked(self, task_id, url, depth).await
    }

    async fn finalize(&self, task_id: &str, url: &str, outcome: &FetchOutcome) -> Result<(), CrawlError> {
        Storage::finalize(self, task_id, url, outcome).await
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), CrawlError> {
        Storage::delete_task(self, task_id).await
    }

    async fn list_urls(
        &self,
        task_id: &str,
        filter: UrlFilter,
        pagination: Pagination,
    ) -> Result<Vec<UrlRecord>, CrawlError> {
        Storage::list_urls(self, task_id, filter, pagination).await
    }

    async fn aggregate_stats(&self, task_id: &str) -> Result<TaskCounters, CrawlError> {
        Storage::aggregate_stats(self, task_id).await
    }

    async fn load_known_urls(&self, task_id: &str) -> Result<Vec<String>, CrawlError> {
        Storage::load_known_urls(self, task_id).await
    }
}

fn strategy_str(strategy: crawlhub_core::Strategy) -> &'static str {
    match strategy {
        crawlhub_core::Strategy::Breadth => "breadth",
        crawlhub_core::Strategy::Depth => "depth",
        crawlhub_core::Strategy::Priority => "priority",
    }
}

fn status_str(status: UrlStatus) -> &'static str {
    match status {
        UrlStatus::Pending => "pending",
        UrlStatus::Completed => "completed",
        UrlStatus::Failed => "failed",
        UrlStatus::RobotsBlocked => "robots_blocked",
    }
}

fn row_to_record(row: sqlx::postgres::PgRow) -> Result<UrlRecord, CrawlError> {
    let status_raw: String = row.try_get("status").map_err(|e| CrawlError::StoreError(e.to_string()))?;
    let status = match status_raw.as_str() {
        "pending" => UrlStatus::Pending,
        "completed" => UrlStatus::Completed,
        "failed" => UrlStatus::Failed,
        "robots_blocked" => UrlStatus::RobotsBlocked,
        other => return Err(CrawlError::StoreError(format!("unknown url status: {other}"))),
    };

    Ok(UrlRecord {
        task_id: row.try_get("task_id").map_err(|e| CrawlError::StoreError(e.to_string()))?,
        url: row.try_get("url").map_err(|e| CrawlError::StoreError(e.to_string()))?,
        depth: row.try_get::<i32, _>("depth").map_err(|e| CrawlError::StoreError(e.to_string()))? as u32,
        status,
        status_code: row
            .try_get::<Option<i32>, _>("status_code")
            .map_err(|e| CrawlError::StoreError(e.to_string()))?
            .map(|c| c as u16),
        response_time_seconds: row
            .try_get("response_time_seconds")
            .map_err(|e| CrawlError::StoreError(e.to_string()))?,
        file_size_bytes: row
            .try_get::<Option<i64>, _>("file_size_bytes")
            .map_err(|e| CrawlError::StoreError(e.to_string()))?
            .map(|b| b as u64),
        content_type: row.try_get("content_type").map_err(|e| CrawlError::StoreError(e.to_string()))?,
        metadata: PageMetadataFields {
            title: row.try_get("title").map_err(|e| CrawlError::StoreError(e.to_string()))?,
            author: row.try_get("author").map_err(|e| CrawlError::StoreError(e.to_string()))?,
            description: row.try_get("description").map_err(|e| CrawlError::StoreError(e.to_string()))?,
            keywords: row.try_get("keywords").map_err(|e| CrawlError::StoreError(e.to_string()))?,
            publish_time: row.try_get("publish_time").map_err(|e| CrawlError::StoreError(e.to_string()))?,
        },
        error_message: row.try_get("error_message").map_err(|e| CrawlError::StoreError(e.to_string()))?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| CrawlError::StoreError(e.to_string()))?,
        completed_at: row
            .try_get("completed_at")
            .map_err(|e| CrawlError::StoreError(e.to_string()))?,
    })
}
