//! State shared between a `TaskController` and the workers it spawns.
//!
//! Frontier, robots cache, and storage pool all survive across
//! pause/resume/restart; only the cancellation token is replaced each time
//! `start()` runs, so a stale worker from a previous run can never observe
//! a new run's token as live.

use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crawlhub_core::{FetchConfig, Lifecycle, RecordStore, TaskConfig, TaskCounters, WorkerState, WorkerStatus};
use crawlhub_fetch::Fetcher;
use crawlhub_frontier::CrawlFrontier;
use crawlhub_robots::RobotsCache;

pub(crate) struct TaskShared {
    pub config: TaskConfig,
    pub fetch_config: FetchConfig,
    pub frontier: CrawlFrontier,
    pub robots: RobotsCache,
    pub fetcher: Arc<dyn Fetcher>,
    pub storage: Arc<dyn RecordStore>,
    pub counters: Mutex<TaskCounters>,
    pub workers: Mutex<Vec<WorkerState>>,
    pub lifecycle: Mutex<Lifecycle>,
    pub paused: AtomicBool,
    pub pause_gate: Notify,
    pub in_flight: AtomicUsize,
    pub run: Mutex<CancellationToken>,
}

impl TaskShared {
    pub fn new(
        config: TaskConfig,
        fetch_config: FetchConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn RecordStore>,
        user_agent: String,
    ) -> Self {
        let base_domain = url::Url::parse(&config.seed_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let frontier = CrawlFrontier::new(
            config.strategy,
            config.max_depth,
            config.allow_cross_domain,
            base_domain,
        );
        let robots = RobotsCache::new(fetcher.clone(), user_agent);
        let worker_count = config.worker_count;

        Self {
            config,
            fetch_config,
            frontier,
            robots,
            fetcher,
            storage,
            counters: Mutex::new(TaskCounters::default()),
            workers: Mutex::new((0..worker_count).map(WorkerState::new).collect()),
            lifecycle: Mutex::new(Lifecycle::Pending),
            paused: AtomicBool::new(false),
            pause_gate: Notify::new(),
            in_flight: AtomicUsize::new(0),
            run: Mutex::new(CancellationToken::new()),
        }
    }

    pub async fn all_workers_idle(&self) -> bool {
        self.workers
            .lock()
            .await
            .iter()
            .all(|w| matches!(w.status, WorkerStatus::Idle | WorkerStatus::Stopped))
    }

    /// Marks the task permanently failed and releases its workers. Used
    /// only for `ControllerBug`/`StoreError` escalation, never for an
    /// ordinary `stop()`.
    pub async fn mark_failed(&self, reason: &str) {
        tracing::error!(task_id = %self.config.id, reason, "task transitioning to failed");
        *self.lifecycle.lock().await = Lifecycle::Failed;
        self.run.lock().await.cancel();
    }
}
