//! Per-task worker loop: poll, politeness check, bounded fetch with retry,
//! extract, offer outbound links, persist, account. Grounded in the
//! teacher's `run_crawl` worker task (`select!` over a shutdown signal and
//! the unit of work), generalized from the teacher's network-specific
//! retry-with-priority-decay to a plain HTTP bounded-retry loop.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crawlhub_core::{FetchOutcome, FetchResponse, Lifecycle, WorkerStatus};
use crawlhub_fetch::is_retryable_status;
use crawlhub_frontier::OfferOutcome;

use crate::shared::TaskShared;

const POLL_TIMEOUT: Duration = Duration::from_secs(1);
const BACKOFF_BASE_MILLIS: u64 = 200;
const BACKOFF_CAP: Duration = Duration::from_secs(5);

struct FetchFailure {
    message: String,
    status_code: Option<u16>,
}

pub(crate) async fn run(index: usize, shared: Arc<TaskShared>, cancel: CancellationToken) {
    let mut last_fetch: Option<Instant> = None;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if *shared.lifecycle.lock().await == Lifecycle::Paused {
            set_status(&shared, index, WorkerStatus::Paused, None).await;
            tokio::select! {
                _ = shared.pause_gate.notified() => {}
                _ = cancel.cancelled() => break,
            }
            continue;
        }

        let polled = tokio::select! {
            p = shared.frontier.poll(POLL_TIMEOUT) => p,
            _ = cancel.cancelled() => break,
        };

        let Some((url, depth)) = polled else {
            set_status(&shared, index, WorkerStatus::Idle, None).await;
            continue;
        };

        set_status(&shared, index, WorkerStatus::Fetching, Some(url.clone())).await;

        if shared.config.respect_robots && !shared.robots.can_fetch(&url).await {
            if let Err(e) = shared
                .storage
                .mark_robots_blocked(&shared.config.id, &url, depth)
                .await
            {
                warn!(url, error = %e, "failed to record robots_blocked status");
            }
            shared.counters.lock().await.robots_blocked += 1;
            continue;
        }

        if let Some(previous) = last_fetch {
            let elapsed = previous.elapsed();
            if elapsed < shared.config.request_interval {
                let remaining = shared.config.request_interval - elapsed;
                tokio::select! {
                    _ = sleep(remaining) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
        last_fetch = Some(Instant::now());

        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = fetch_with_retry(&shared, &url).await;
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(resp) => {
                if !handle_success(&shared, index, &url, depth, resp).await {
                    break;
                }
            }
            Err(failure) => {
                if !handle_failure(&shared, index, &url, failure).await {
                    break;
                }
            }
        }
    }

    set_status(&shared, index, WorkerStatus::Stopped, None).await;
}

async fn handle_success(
    shared: &Arc<TaskShared>,
    index: usize,
    url: &str,
    depth: u32,
    resp: FetchResponse,
) -> bool {
    let extracted = crawlhub_parser::extract(&resp);
    if depth + 1 <= shared.config.max_depth {
        for link in &extracted.links {
            offer_link(shared, link, depth + 1).await;
        }
    }

    let byte_count = resp.body.len() as u64;
    let outcome = FetchOutcome::Completed {
        status_code: resp.status,
        response_time_seconds: resp.response_time_seconds,
        file_size_bytes: byte_count,
        content_type: resp.content_type,
        metadata: extracted.metadata,
    };

    if !commit(shared, index, url, &outcome).await {
        return false;
    }

    let mut counters = shared.counters.lock().await;
    counters.completed += 1;
    counters.bytes += byte_count;
    counters.response_time_sum_seconds += resp.response_time_seconds;
    drop(counters);

    let mut workers = shared.workers.lock().await;
    workers[index].completed += 1;
    workers[index].bytes += byte_count;
    true
}

async fn handle_failure(
    shared: &Arc<TaskShared>,
    index: usize,
    url: &str,
    failure: FetchFailure,
) -> bool {
    let outcome = FetchOutcome::Failed {
        error_message: failure.message,
        status_code: failure.status_code,
    };

    if !commit(shared, index, url, &outcome).await {
        return false;
    }

    shared.counters.lock().await.failed += 1;
    shared.workers.lock().await[index].failed += 1;
    true
}

/// Writes a URL's final state, retrying once on store error per the
/// failure-handling table. A second failure escalates the whole task to
/// `failed` — the caller should stop its loop when this returns `false`.
async fn commit(shared: &Arc<TaskShared>, index: usize, url: &str, outcome: &FetchOutcome) -> bool {
    if shared.storage.finalize(&shared.config.id, url, outcome).await.is_ok() {
        return true;
    }
    warn!(url, "finalize failed, retrying once");
    if shared.storage.finalize(&shared.config.id, url, outcome).await.is_ok() {
        return true;
    }
    shared.workers.lock().await[index].status = WorkerStatus::Error;
    shared
        .mark_failed(&format!("record store unavailable while finalizing {url}"))
        .await;
    false
}

async fn offer_link(shared: &Arc<TaskShared>, link: &str, depth: u32) {
    let normalized = match crawlhub_core::normalize_url(link) {
        Ok(n) => n,
        Err(_) => {
            shared.counters.lock().await.duplicate_rejected += 1;
            return;
        }
    };

    match shared.frontier.offer(&normalized, depth).await {
        OfferOutcome::Accepted => {
            shared.counters.lock().await.total_discovered += 1;
            if let Err(e) = shared
                .storage
                .upsert_pending(&shared.config.id, &normalized, depth)
                .await
            {
                warn!(url = normalized, error = %e, "failed to record pending url");
            }
        }
        OfferOutcome::Duplicate => {
            shared.counters.lock().await.duplicate_rejected += 1;
        }
        OfferOutcome::DepthBlocked => {
            shared.counters.lock().await.depth_blocked += 1;
        }
        OfferOutcome::CrossDomainBlocked => {
            shared.counters.lock().await.cross_domain_blocked += 1;
        }
        OfferOutcome::FrontierPaused => {}
    }
}

async fn fetch_with_retry(shared: &Arc<TaskShared>, url: &str) -> Result<FetchResponse, FetchFailure> {
    let mut attempt = 0;
    loop {
        match shared.fetcher.fetch(url, &shared.fetch_config).await {
            Ok(resp) if (200..400).contains(&resp.status) => return Ok(resp),
            Ok(resp) if is_retryable_status(resp.status) => {
                if attempt >= shared.config.retry_times {
                    return Err(FetchFailure {
                        message: format!(
                            "server error {} after {} attempt(s)",
                            resp.status,
                            attempt + 1
                        ),
                        status_code: Some(resp.status),
                    });
                }
                debug!(url, status = resp.status, attempt, "retrying after server error");
                sleep(backoff_delay(attempt)).await;
                attempt += 1;
            }
            Ok(resp) => {
                return Err(FetchFailure {
                    message: format!("http status {}", resp.status),
                    status_code: Some(resp.status),
                });
            }
            Err(e) => {
                if attempt >= shared.config.retry_times {
                    return Err(FetchFailure {
                        message: e.to_string(),
                        status_code: None,
                    });
                }
                debug!(url, error = %e, attempt, "retrying after transport error");
                sleep(backoff_delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let millis = BACKOFF_BASE_MILLIS.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(millis).min(BACKOFF_CAP)
}

async fn set_status(shared: &Arc<TaskShared>, index: usize, status: WorkerStatus, current_url: Option<String>) {
    let mut workers = shared.workers.lock().await;
    workers[index].status = status;
    workers[index].current_url = current_url;
}
