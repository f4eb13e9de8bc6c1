//! Narrow interface over the durable store (spec.md §4.6). Kept in `core`
//! so every crate that needs to depend on "a record store" — engine, and
//! any future API crate — can do so without depending on `crawlhub-storage`
//! and its `sqlx`/Postgres stack directly. Mirrors the teacher's
//! `NetworkDriver` trait placement in `core::types`.

use async_trait::async_trait;

use crate::error::CrawlError;
use crate::types::{FetchOutcome, TaskConfig, TaskCounters, UrlRecord, UrlStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct UrlFilter {
    pub status: Option<UrlStatus>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// All upserts are idempotent on the `(task_id, url)` key. Implementations
/// must commit a URL's final state before the caller increments its
/// in-memory `completed`/`failed` counter, so a snapshot never claims more
/// than the store has durably recorded.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_task(&self, config: &TaskConfig) -> Result<(), CrawlError>;
    async fn upsert_pending(&self, task_id: &str, url: &str, depth: u32) -> Result<(), CrawlError>;
    async fn mark_robots_blocked(&self, task_id: &str, url: &str, depth: u32) -> Result<(), CrawlError>;
    async fn finalize(&self, task_id: &str, url: &str, outcome: &FetchOutcome) -> Result<(), CrawlError>;
    /// Cascades to every URL record for the task.
    async fn delete_task(&self, task_id: &str) -> Result<(), CrawlError>;
    async fn list_urls(
        &self,
        task_id: &str,
        filter: UrlFilter,
        pagination: Pagination,
    ) -> Result<Vec<UrlRecord>, CrawlError>;
    async fn aggregate_stats(&self, task_id: &str) -> Result<TaskCounters, CrawlError>;
    /// Every URL this task has ever recorded (pending, terminal, or
    /// blocked), used to rehydrate a frontier's seen-set on restart.
    async fn load_known_urls(&self, task_id: &str) -> Result<Vec<String>, CrawlError>;
}
