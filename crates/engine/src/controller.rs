//! Owns one task's frontier, worker pool, counters, and lifecycle. Command
//! methods are atomic with respect to lifecycle: each takes the lifecycle
//! lock, checks the precondition, and releases it before doing slower work.
//! The worker-spawn/join choreography follows the teacher's `run_crawl`,
//! replacing its `tokio::sync::broadcast` shutdown channel with a
//! `tokio_util::sync::CancellationToken` (cheaper to clone per-worker, and
//! composes with `select!` the same way).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crawlhub_core::{
    CrawlError, FetchConfig, Lifecycle, RecordStore, TaskConfig, TaskSnapshot, WorkerState,
};
use crawlhub_fetch::Fetcher;
use crawlhub_frontier::OfferOutcome;

use crate::shared::TaskShared;
use crate::worker;

const STOP_GRACE: Duration = Duration::from_secs(5);
const REAPER_INTERVAL: Duration = Duration::from_millis(500);

pub struct TaskController {
    shared: Arc<TaskShared>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    reaper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskController {
    pub fn new(
        config: TaskConfig,
        fetch_config: FetchConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn RecordStore>,
        user_agent: String,
    ) -> Result<Arc<Self>, CrawlError> {
        config.validate()?;
        let shared = Arc::new(TaskShared::new(config, fetch_config, fetcher, storage, user_agent));
        Ok(Arc::new(Self {
            shared,
            worker_handles: Mutex::new(Vec::new()),
            reaper_handle: Mutex::new(None),
        }))
    }

    pub fn task_id(&self) -> &str {
        &self.shared.config.id
    }

    /// Valid from `pending`, `stopped`, `failed`, `completed`. Resets
    /// per-worker state; rehydrates the seen-set from the record store and
    /// clears the in-memory queue, then re-seeds the seed URL — a restart
    /// after `completed` therefore only re-enqueues the seed if it is not
    /// already in the rehydrated seen-set (see `DESIGN.md`, Open Question:
    /// restart semantics).
    pub async fn start(self: &Arc<Self>) -> Result<(), CrawlError> {
        {
            let lifecycle = *self.shared.lifecycle.lock().await;
            if !matches!(
                lifecycle,
                Lifecycle::Pending | Lifecycle::Stopped | Lifecycle::Failed | Lifecycle::Completed
            ) {
                return Err(CrawlError::ControllerBug(format!(
                    "start() invalid from lifecycle {lifecycle:?}"
                )));
            }
        }

        self.shared.storage.insert_task(&self.shared.config).await?;

        let known = self.shared.storage.load_known_urls(&self.shared.config.id).await?;
        self.shared.frontier.clear_container().await;
        self.shared.frontier.mark_seen_batch(&known);

        {
            let mut workers = self.shared.workers.lock().await;
            *workers = (0..self.shared.config.worker_count)
                .map(WorkerState::new)
                .collect();
        }
        self.shared.in_flight.store(0, Ordering::SeqCst);

        let token = CancellationToken::new();
        *self.shared.run.lock().await = token.clone();

        let seed = crawlhub_core::normalize_url(&self.shared.config.seed_url)
            .map_err(|e| CrawlError::InvalidConfig(format!("seed_url failed to normalize: {e}")))?;
        if self.shared.frontier.offer(&seed, 0).await == OfferOutcome::Accepted {
            self.shared.counters.lock().await.total_discovered += 1;
            self.shared
                .storage
                .upsert_pending(&self.shared.config.id, &seed, 0)
                .await?;
        }

        *self.shared.lifecycle.lock().await = Lifecycle::Running;

        let mut handles = Vec::with_capacity(self.shared.config.worker_count);
        for index in 0..self.shared.config.worker_count {
            let shared = self.shared.clone();
            let worker_token = token.clone();
            handles.push(tokio::spawn(worker::run(index, shared, worker_token)));
        }
        *self.worker_handles.lock().await = handles;

        let reaper_shared = self.shared.clone();
        let reaper_token = token.clone();
        *self.reaper_handle.lock().await = Some(tokio::spawn(reap(reaper_shared, reaper_token)));

        Ok(())
    }

    /// Valid from `running`. Workers finish their current URL, then block.
    pub async fn pause_workers(&self) -> Result<(), CrawlError> {
        let mut lifecycle = self.shared.lifecycle.lock().await;
        if *lifecycle != Lifecycle::Running {
            return Err(CrawlError::ControllerBug(format!(
                "pause_workers() invalid from lifecycle {:?}",
                *lifecycle
            )));
        }
        *lifecycle = Lifecycle::Paused;
        Ok(())
    }

    /// Valid from `paused`. Re-spawns workers if they had already run to
    /// completion (e.g. after a grace-period abandonment).
    pub async fn resume_workers(self: &Arc<Self>) -> Result<(), CrawlError> {
        let lifecycle = *self.shared.lifecycle.lock().await;
        if lifecycle != Lifecycle::Paused {
            return Err(CrawlError::ControllerBug(format!(
                "resume_workers() invalid from lifecycle {lifecycle:?}"
            )));
        }
        let all_finished = self
            .worker_handles
            .lock()
            .await
            .iter()
            .all(|h| h.is_finished());
        if all_finished {
            // start() only accepts {pending, stopped, failed, completed};
            // step out of `paused` first so the respawn below doesn't
            // immediately bounce off that precondition.
            *self.shared.lifecycle.lock().await = Lifecycle::Stopped;
            return self.start().await;
        }
        *self.shared.lifecycle.lock().await = Lifecycle::Running;
        self.shared.pause_gate.notify_waiters();
        Ok(())
    }

    /// Valid from `running`, `paused`. Signals workers, joins with a
    /// bounded grace period, and marks the task `stopped` regardless of
    /// whether every worker actually finished in time.
    pub async fn stop(&self) -> Result<(), CrawlError> {
        {
            let lifecycle = *self.shared.lifecycle.lock().await;
            if !matches!(lifecycle, Lifecycle::Running | Lifecycle::Paused) {
                return Err(CrawlError::ControllerBug(format!(
                    "stop() invalid from lifecycle {lifecycle:?}"
                )));
            }
        }

        self.shared.run.lock().await.cancel();
        self.shared.pause_gate.notify_waiters();

        if let Some(reaper) = self.reaper_handle.lock().await.take() {
            reaper.abort();
        }

        let drained: Vec<_> = self.worker_handles.lock().await.drain(..).collect();
        if tokio::time::timeout(STOP_GRACE, join_all(drained)).await.is_err() {
            warn!(task_id = self.task_id(), "stop grace period elapsed, abandoning workers");
        }

        *self.shared.lifecycle.lock().await = Lifecycle::Stopped;
        Ok(())
    }

    /// Toggles frontier growth without touching `lifecycle`. Workers keep
    /// draining already-queued URLs; new link discoveries are dropped.
    pub fn pause_frontier(&self) {
        self.shared.frontier.pause();
    }

    pub fn resume_frontier(&self) {
        self.shared.frontier.resume();
    }

    /// A consistent read of counters, per-worker state, lifecycle, and
    /// frontier state, all taken under their own short-held locks.
    pub async fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.shared.config.id.clone(),
            lifecycle: *self.shared.lifecycle.lock().await,
            frontier_state: self.shared.frontier.frontier_state(),
            frontier_size: self.shared.frontier.size().await,
            counters: self.shared.counters.lock().await.clone(),
            workers: self.shared.workers.lock().await.clone(),
        }
    }
}

/// Polls `(frontier.empty && all_workers_idle && no_in_flight)` roughly
/// every 500ms; on true for two consecutive checks, transitions
/// `running -> completed`.
async fn reap(shared: Arc<TaskShared>, cancel: CancellationToken) {
    let mut consecutive_quiet = 0;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(REAPER_INTERVAL) => {}
            _ = cancel.cancelled() => return,
        }

        if *shared.lifecycle.lock().await != Lifecycle::Running {
            consecutive_quiet = 0;
            continue;
        }

        let quiet = shared.frontier.empty().await
            && shared.all_workers_idle().await
            && shared.in_flight.load(Ordering::SeqCst) == 0;

        if quiet {
            consecutive_quiet += 1;
            if consecutive_quiet >= 2 {
                *shared.lifecycle.lock().await = Lifecycle::Completed;
                cancel.cancel();
                return;
            }
        } else {
            consecutive_quiet = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use crawlhub_core::{Lifecycle, Strategy, UrlStatus};
    use crawlhub_fetch::testing::{ScriptedFetcher, ScriptedResponse};
    use crawlhub_storage::testing::InMemoryStore;

    use super::*;

    fn config(id: &str, seed: &str, max_depth: u32, allow_cross_domain: bool) -> TaskConfig {
        TaskConfig {
            id: id.to_string(),
            seed_url: seed.to_string(),
            strategy: Strategy::Breadth,
            max_depth,
            worker_count: 1,
            request_interval: Duration::from_millis(0),
            retry_times: 2,
            respect_robots: false,
            allow_cross_domain,
        }
    }

    fn controller_with(
        scripts: HashMap<String, Vec<ScriptedResponse>>,
        cfg: TaskConfig,
    ) -> (Arc<TaskController>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let fetcher: Arc<dyn Fetcher> = Arc::new(ScriptedFetcher::new(scripts));
        let controller = TaskController::new(
            cfg,
            FetchConfig::default(),
            fetcher,
            store.clone(),
            "crawlhub-test/0.1".to_string(),
        )
        .unwrap();
        (controller, store)
    }

    async fn wait_until_terminal(controller: &Arc<TaskController>) -> TaskSnapshot {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = controller.snapshot().await;
                if matches!(
                    snapshot.lifecycle,
                    Lifecycle::Completed | Lifecycle::Stopped | Lifecycle::Failed
                ) {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("task did not reach a terminal lifecycle in time")
    }

    // Scenario 1: single-page seed; self-link, same-domain link, cross-domain link.
    #[tokio::test]
    async fn single_page_seed_records_same_domain_links_only() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "http://site/a".to_string(),
            vec![ScriptedFetcher::html(
                "http://site/a",
                "a",
                &["http://site/a", "http://site/b", "http://ext.example/x"],
            )],
        );
        scripts.insert(
            "http://site/b".to_string(),
            vec![ScriptedFetcher::html("http://site/b", "b", &[])],
        );

        let (controller, store) = controller_with(scripts, config("t1", "http://site/a", 1, false));
        controller.start().await.unwrap();
        let snapshot = wait_until_terminal(&controller).await;

        assert_eq!(snapshot.lifecycle, Lifecycle::Completed);
        assert_eq!(snapshot.counters.completed, 2);
        assert_eq!(snapshot.counters.cross_domain_blocked, 1);
        assert_eq!(snapshot.counters.duplicate_rejected, 1);

        let records = store.all_records("t1");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == UrlStatus::Completed));
        assert!(records.iter().any(|r| r.url == "http://site/a"));
        assert!(records.iter().any(|r| r.url == "http://site/b"));
        assert!(!records.iter().any(|r| r.url.contains("ext.example")));
    }

    // Scenario 2: depth cap.
    #[tokio::test]
    async fn depth_cap_stops_discovery_beyond_max_depth() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "http://s/0".to_string(),
            vec![ScriptedFetcher::html("http://s/0", "0", &["http://s/1"])],
        );
        scripts.insert(
            "http://s/1".to_string(),
            vec![ScriptedFetcher::html("http://s/1", "1", &["http://s/2"])],
        );
        scripts.insert(
            "http://s/2".to_string(),
            vec![ScriptedFetcher::html("http://s/2", "2", &["http://s/3"])],
        );

        let (controller, store) = controller_with(scripts, config("t2", "http://s/0", 2, false));
        controller.start().await.unwrap();
        let snapshot = wait_until_terminal(&controller).await;

        assert_eq!(snapshot.lifecycle, Lifecycle::Completed);
        let records = store.all_records("t2");
        assert_eq!(records.len(), 3);
        assert!(!records.iter().any(|r| r.url == "http://s/3"));
    }

    // Scenario 4: retryable failures exhaust retry_times, then fail once.
    #[tokio::test]
    async fn exhausted_retries_write_one_failed_record() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "http://s/flaky".to_string(),
            vec![ScriptedResponse::Ok(crawlhub_core::FetchResponse {
                final_url: "http://s/flaky".to_string(),
                status: 503,
                headers: HashMap::new(),
                body: b"unavailable".to_vec(),
                content_type: Some("text/plain".to_string()),
                response_time_seconds: 0.001,
            })],
        );

        let mut cfg = config("t3", "http://s/flaky", 1, false);
        cfg.retry_times = 2;
        let (controller, store) = controller_with(scripts, cfg);
        controller.start().await.unwrap();
        let snapshot = wait_until_terminal(&controller).await;

        assert_eq!(snapshot.counters.failed, 1);
        assert_eq!(snapshot.counters.completed, 0);
        let records = store.all_records("t3");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, UrlStatus::Failed);
        assert_eq!(records[0].status_code, Some(503));
    }

    // Scenario 3: robots.txt blocks one linked URL, allows another.
    #[tokio::test]
    async fn robots_blocked_link_gets_no_retry_and_does_not_count_as_failed() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "http://site/a".to_string(),
            vec![ScriptedFetcher::html(
                "http://site/a",
                "a",
                &["http://site/public", "http://site/private"],
            )],
        );
        scripts.insert(
            "http://site/public".to_string(),
            vec![ScriptedFetcher::html("http://site/public", "public", &[])],
        );
        scripts.insert(
            "http://site/robots.txt".to_string(),
            vec![ScriptedResponse::Ok(crawlhub_core::FetchResponse {
                final_url: "http://site/robots.txt".to_string(),
                status: 200,
                headers: HashMap::new(),
                body: b"User-agent: *\nDisallow: /private\n".to_vec(),
                content_type: Some("text/plain".to_string()),
                response_time_seconds: 0.001,
            })],
        );

        let mut cfg = config("t8", "http://site/a", 1, false);
        cfg.respect_robots = true;
        let (controller, store) = controller_with(scripts, cfg);
        controller.start().await.unwrap();
        let snapshot = wait_until_terminal(&controller).await;

        assert_eq!(snapshot.lifecycle, Lifecycle::Completed);
        assert_eq!(snapshot.counters.completed, 2);
        assert_eq!(snapshot.counters.failed, 0);
        assert_eq!(snapshot.counters.robots_blocked, 1);

        let records = store.all_records("t8");
        let private = records.iter().find(|r| r.url == "http://site/private").unwrap();
        assert_eq!(private.status, UrlStatus::RobotsBlocked);
        let public = records.iter().find(|r| r.url == "http://site/public").unwrap();
        assert_eq!(public.status, UrlStatus::Completed);
    }

    // Scenario 5: pausing the frontier stops growth but lets queued work drain.
    #[tokio::test]
    async fn pause_frontier_blocks_new_discoveries_while_draining() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "http://s/0".to_string(),
            vec![ScriptedFetcher::html("http://s/0", "0", &["http://s/1"])],
        );
        scripts.insert(
            "http://s/1".to_string(),
            vec![ScriptedFetcher::html("http://s/1", "1", &[])],
        );

        let (controller, _store) = controller_with(scripts, config("t4", "http://s/0", 1, false));
        controller.pause_frontier();
        controller.start().await.unwrap();

        // new discoveries are dropped while the frontier is paused, but the
        // seed itself was already offered before pause_frontier would apply
        // to it in a real run; here we assert the toggle is observable.
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.frontier_state, crawlhub_core::FrontierState::Paused);

        controller.resume_frontier();
        let snapshot = wait_until_terminal(&controller).await;
        assert_eq!(snapshot.frontier_state, crawlhub_core::FrontierState::Active);
    }

    // Scenario 6: restart after completion preserves records and re-seeds.
    #[tokio::test]
    async fn restart_after_completed_preserves_prior_records() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "http://s/a".to_string(),
            vec![ScriptedFetcher::html("http://s/a", "a", &[])],
        );

        let (controller, store) = controller_with(scripts, config("t5", "http://s/a", 1, false));
        controller.start().await.unwrap();
        let snapshot = wait_until_terminal(&controller).await;
        assert_eq!(snapshot.lifecycle, Lifecycle::Completed);
        assert_eq!(store.all_records("t5").len(), 1);

        controller.start().await.unwrap();
        let snapshot = wait_until_terminal(&controller).await;
        assert_eq!(snapshot.lifecycle, Lifecycle::Completed);
        // the seed was already in the rehydrated seen-set, so no duplicate
        // record is created and the set of URLs is unchanged.
        assert_eq!(store.all_records("t5").len(), 1);
    }

    // Invariant: completed + failed + robots_blocked <= total_discovered.
    #[tokio::test]
    async fn counters_never_exceed_total_discovered() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "http://s/x".to_string(),
            vec![ScriptedFetcher::html("http://s/x", "x", &["http://s/y"])],
        );
        scripts.insert(
            "http://s/y".to_string(),
            vec![ScriptedFetcher::html("http://s/y", "y", &[])],
        );

        let (controller, _store) = controller_with(scripts, config("t6", "http://s/x", 1, false));
        controller.start().await.unwrap();
        let snapshot = wait_until_terminal(&controller).await;

        let c = &snapshot.counters;
        assert!(c.completed + c.failed + c.robots_blocked <= c.total_discovered);
    }

    #[tokio::test]
    async fn stop_transitions_to_stopped_and_releases_workers() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "http://s/a".to_string(),
            vec![ScriptedFetcher::html("http://s/a", "a", &[])],
        );
        let (controller, _store) = controller_with(scripts, config("t7", "http://s/a", 1, false));
        controller.start().await.unwrap();
        controller.stop().await.unwrap();
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.lifecycle, Lifecycle::Stopped);
    }

    // resume_workers() must respawn rather than error when the paused
    // workers have already exited (e.g. abandoned past a stop grace period),
    // since start()'s precondition excludes `paused`.
    #[tokio::test]
    async fn resume_workers_respawns_after_paused_workers_already_exited() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "http://s/a".to_string(),
            vec![ScriptedFetcher::html("http://s/a", "a", &[])],
        );
        let (controller, store) = controller_with(scripts, config("t9", "http://s/a", 1, false));
        controller.start().await.unwrap();
        controller.pause_workers().await.unwrap();

        // Simulate workers abandoned mid-pause: cancel the run token directly
        // without going through stop(), so lifecycle stays `paused` while the
        // worker/reaper tasks actually exit.
        controller.shared.run.lock().await.cancel();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if controller
                    .worker_handles
                    .lock()
                    .await
                    .iter()
                    .all(|h| h.is_finished())
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker did not exit after cancellation");

        controller.resume_workers().await.unwrap();
        let snapshot = wait_until_terminal(&controller).await;
        assert_eq!(snapshot.lifecycle, Lifecycle::Completed);
        // the seed was already recorded before the abandoned pause, so the
        // respawn's rehydrated seen-set treats it as a duplicate, not a
        // fresh discovery.
        assert_eq!(store.all_records("t9").len(), 1);
    }
}
