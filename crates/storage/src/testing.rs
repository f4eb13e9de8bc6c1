//! An in-memory [`RecordStore`] double, for engine integration tests that
//! need a durable-looking store without a real Postgres instance. Mirrors
//! the shape of `Storage` closely enough that swapping one for the other
//! changes no call site.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crawlhub_core::{
    CrawlError, FetchOutcome, Pagination, RecordStore, TaskConfig, TaskCounters, UrlFilter, UrlRecord,
    UrlStatus,
};

#[derive(Default)]
pub struct InMemoryStore {
    tasks: Mutex<HashMap<String, TaskConfig>>,
    records: Mutex<HashMap<(String, String), UrlRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: a snapshot of every record stored for a task,
    /// regardless of status, in insertion order.
    pub fn all_records(&self, task_id: &str) -> Vec<UrlRecord> {
        let records = self.records.lock().unwrap();
        let mut out: Vec<_> = records
            .iter()
            .filter(|((t, _), _)| t == task_id)
            .map(|(_, r)| r.clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.url.cmp(&b.url)));
        out
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_task(&self, config: &TaskConfig) -> Result<(), CrawlError> {
        self.tasks
            .lock()
            .unwrap()
            .entry(config.id.clone())
            .or_insert_with(|| config.clone());
        Ok(())
    }

    async fn upsert_pending(&self, task_id: &str, url: &str, depth: u32) -> Result<(), CrawlError> {
        let mut records = self.records.lock().unwrap();
        records
            .entry((task_id.to_string(), url.to_string()))
            .or_insert_with(|| UrlRecord {
                task_id: task_id.to_string(),
                url: url.to_string(),
                depth,
                status: UrlStatus::Pending,
                status_code: None,
                response_time_seconds: None,
                file_size_bytes: None,
                content_type: None,
                metadata: Default::default(),
                error_message: None,
                created_at: Utc::now(),
                completed_at: None,
            });
        Ok(())
    }

    async fn mark_robots_blocked(&self, task_id: &str, url: &str, depth: u32) -> Result<(), CrawlError> {
        let mut records = self.records.lock().unwrap();
        let entry = records
            .entry((task_id.to_string(), url.to_string()))
            .or_insert_with(|| blank_record(task_id, url, depth));
        entry.status = UrlStatus::RobotsBlocked;
        entry.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn finalize(&self, task_id: &str, url: &str, outcome: &FetchOutcome) -> Result<(), CrawlError> {
        let mut records = self.records.lock().unwrap();
        let depth = records
            .get(&(task_id.to_string(), url.to_string()))
            .map(|r| r.depth)
            .unwrap_or(0);
        let entry = records
            .entry((task_id.to_string(), url.to_string()))
            .or_insert_with(|| blank_record(task_id, url, depth));

        match outcome {
            FetchOutcome::Completed {
                status_code,
                response_time_seconds,
                file_size_bytes,
                content_type,
                metadata,
            } => {
                entry.status = UrlStatus::Completed;
                entry.status_code = Some(*status_code);
                entry.response_time_seconds = Some(*response_time_seconds);
                entry.file_size_bytes = Some(*file_size_bytes);
                entry.content_type = content_type.clone();
                entry.metadata = metadata.clone();
                entry.completed_at = Some(Utc::now());
            }
            FetchOutcome::Failed {
                error_message,
                status_code,
            } => {
                entry.status = UrlStatus::Failed;
                entry.status_code = *status_code;
                entry.error_message = Some(error_message.clone());
                entry.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), CrawlError> {
        self.tasks.lock().unwrap().remove(task_id);
        self.records.lock().unwrap().retain(|(t, _), _| t != task_id);
        Ok(())
    }

    async fn list_urls(
        &self,
        task_id: &str,
        filter: UrlFilter,
        pagination: Pagination,
    ) -> Result<Vec<UrlRecord>, CrawlError> {
        let mut out = self.all_records(task_id);
        if let Some(status) = filter.status {
            out.retain(|r| r.status == status);
        }
        let start = pagination.offset.max(0) as usize;
        let end = (start + pagination.limit.max(0) as usize).min(out.len());
        Ok(if start >= out.len() {
            Vec::new()
        } else {
            out[start..end].to_vec()
        })
    }

    async fn aggregate_stats(&self, task_id: &str) -> Result<TaskCounters, CrawlError> {
        let records = self.all_records(task_id);
        let mut counters = TaskCounters {
            total_discovered: records.len() as u64,
            ..Default::default()
        };
        for r in &records {
            match r.status {
                UrlStatus::Completed => {
                    counters.completed += 1;
                    counters.bytes += r.file_size_bytes.unwrap_or(0);
                    counters.response_time_sum_seconds += r.response_time_seconds.unwrap_or(0.0);
                }
                UrlStatus::Failed => counters.failed += 1,
                UrlStatus::RobotsBlocked => counters.robots_blocked += 1,
                UrlStatus::Pending => {}
            }
        }
        Ok(counters)
    }

    async fn load_known_urls(&self, task_id: &str) -> Result<Vec<String>, CrawlError> {
        Ok(self.all_records(task_id).into_iter().map(|r| r.url).collect())
    }
}

fn blank_record(task_id: &str, url: &str, depth: u32) -> UrlRecord {
    UrlRecord {
        task_id: task_id.to_string(),
        url: url.to_string(),
        depth,
        status: UrlStatus::Pending,
        status_code: None,
        response_time_seconds: None,
        file_size_bytes: None,
        content_type: None,
        metadata: Default::default(),
        error_message: None,
        created_at: Utc::now(),
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlhub_core::{PageMetadataFields, Strategy};
    use std::time::Duration;

    fn task_config() -> TaskConfig {
        TaskConfig {
            id: "t1".to_string(),
            seed_url: "https://example.com/".to_string(),
            strategy: Strategy::Breadth,
            max_depth: 3,
            worker_count: 1,
            request_interval: Duration::from_secs(0),
            retry_times: 0,
            respect_robots: false,
            allow_cross_domain: false,
        }
    }

    #[tokio::test]
    async fn finalize_is_idempotent_on_task_id_and_url() {
        let store = InMemoryStore::new();
        store.insert_task(&task_config()).await.unwrap();
        store.upsert_pending("t1", "https://example.com/a", 0).await.unwrap();
        store
            .finalize(
                "t1",
                "https://example.com/a",
                &FetchOutcome::Completed {
                    status_code: 200,
                    response_time_seconds: 0.1,
                    file_size_bytes: 10,
                    content_type: Some("text/html".to_string()),
                    metadata: PageMetadataFields::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(store.all_records("t1").len(), 1);
        let stats = store.aggregate_stats("t1").await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total_discovered, 1);
    }

    #[tokio::test]
    async fn delete_task_cascades_to_records() {
        let store = InMemoryStore::new();
        store.insert_task(&task_config()).await.unwrap();
        store.upsert_pending("t1", "https://example.com/a", 0).await.unwrap();
        store.delete_task("t1").await.unwrap();
        assert!(store.all_records("t1").is_empty());
    }
}
