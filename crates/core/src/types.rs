use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CrawlError;

pub type TaskId = String;

/// Frontier traversal order. Selected once, at controller construction —
/// workers never observe a changed strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Breadth,
    Depth,
    Priority,
}

/// Immutable once a controller starts. Mutating a task's configuration
/// requires no live controller for that task (enforced by the registry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: TaskId,
    pub seed_url: String,
    pub strategy: Strategy,
    pub max_depth: u32,
    pub worker_count: usize,
    #[serde(with = "duration_seconds")]
    pub request_interval: Duration,
    pub retry_times: u32,
    pub respect_robots: bool,
    pub allow_cross_domain: bool,
}

impl TaskConfig {
    /// Reject configurations that violate spec.md §3's declared ranges
    /// before they ever reach a controller.
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.id.trim().is_empty() {
            return Err(CrawlError::InvalidConfig("task id must not be empty".into()));
        }
        if url::Url::parse(&self.seed_url).is_err() {
            return Err(CrawlError::InvalidConfig(format!(
                "seed_url is not an absolute URL: {}",
                self.seed_url
            )));
        }
        if !(1..=10).contains(&self.max_depth) {
            return Err(CrawlError::InvalidConfig(
                "max_depth must be in [1, 10]".into(),
            ));
        }
        if !(1..=10).contains(&self.worker_count) {
            return Err(CrawlError::InvalidConfig(
                "worker_count must be in [1, 10]".into(),
            ));
        }
        Ok(())
    }
}

mod duration_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// One row per unique (task_id, normalized url).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Pending,
    Completed,
    Failed,
    RobotsBlocked,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadataFields {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub publish_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub task_id: TaskId,
    pub url: String,
    pub depth: u32,
    pub status: UrlStatus,
    pub status_code: Option<u16>,
    pub response_time_seconds: Option<f64>,
    pub file_size_bytes: Option<u64>,
    pub content_type: Option<String>,
    pub metadata: PageMetadataFields,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome of a single worker fetch, as reported to the Record Store Adapter.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Completed {
        status_code: u16,
        response_time_seconds: f64,
        file_size_bytes: u64,
        content_type: Option<String>,
        metadata: PageMetadataFields,
    },
    Failed {
        error_message: String,
        status_code: Option<u16>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Fetching,
    Paused,
    Error,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerState {
    pub index: usize,
    pub status: WorkerStatus,
    pub current_url: Option<String>,
    pub completed: u64,
    pub failed: u64,
    pub bytes: u64,
}

impl WorkerState {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            status: WorkerStatus::Idle,
            current_url: None,
            completed: 0,
            failed: 0,
            bytes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Pending,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontierState {
    Active,
    Paused,
}

/// Aggregate counters mutated under one short-held lock; see
/// `crawlhub_engine::controller` for the guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCounters {
    pub total_discovered: u64,
    pub completed: u64,
    pub failed: u64,
    pub robots_blocked: u64,
    pub bytes: u64,
    pub response_time_sum_seconds: f64,
    pub cross_domain_blocked: u64,
    pub depth_blocked: u64,
    pub duplicate_rejected: u64,
}

impl TaskCounters {
    pub fn average_response_time_seconds(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.response_time_sum_seconds / self.completed as f64
        }
    }
}

/// A consistent read of everything the telemetry consumer needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub lifecycle: Lifecycle,
    pub frontier_state: FrontierState,
    pub frontier_size: usize,
    pub counters: TaskCounters,
    pub workers: Vec<WorkerState>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_body_size: usize,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_body_size: 20 * 1024 * 1024,
            max_redirects: 10,
            user_agent: "crawlhub/0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub final_url: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub response_time_seconds: f64,
}
