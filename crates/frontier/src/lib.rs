//! Per-task pending-work queue plus seen-set. One instance per running
//! task, owned by its controller. Shape (offer/poll, single mutex guarding
//! the ordered container, a side-table for politeness) follows the
//! teacher's `CrawlFrontier`; the teacher's `GrowableBloom` seen-set is
//! replaced with an exact `DashMap` here because this engine's invariants
//! (at most one URL Record per task/url, idempotent re-offer) need precise
//! membership, not a probabilistic one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use url::Url;

use crawlhub_core::{FrontierState, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Accepted,
    Duplicate,
    DepthBlocked,
    CrossDomainBlocked,
    FrontierPaused,
}

type Entry = (String, u32);

enum OrderedContainer {
    Fifo(VecDeque<Entry>),
    Lifo(Vec<Entry>),
    /// Three FIFO buckets ranked by content-type guess: 0 = HTML-like,
    /// 1 = image, 2 = everything else.
    Priority([VecDeque<Entry>; 3]),
}

impl OrderedContainer {
    fn new(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Breadth => OrderedContainer::Fifo(VecDeque::new()),
            Strategy::Depth => OrderedContainer::Lifo(Vec::new()),
            Strategy::Priority => {
                OrderedContainer::Priority([VecDeque::new(), VecDeque::new(), VecDeque::new()])
            }
        }
    }

    fn push(&mut self, url: String, depth: u32) {
        match self {
            OrderedContainer::Fifo(q) => q.push_back((url, depth)),
            OrderedContainer::Lifo(v) => v.push((url, depth)),
            OrderedContainer::Priority(buckets) => {
                let rank = priority_rank(&url);
                buckets[rank].push_back((url, depth));
            }
        }
    }

    fn pop(&mut self) -> Option<Entry> {
        match self {
            OrderedContainer::Fifo(q) => q.pop_front(),
            OrderedContainer::Lifo(v) => v.pop(),
            OrderedContainer::Priority(buckets) => buckets.iter_mut().find_map(|b| b.pop_front()),
        }
    }

    fn len(&self) -> usize {
        match self {
            OrderedContainer::Fifo(q) => q.len(),
            OrderedContainer::Lifo(v) => v.len(),
            OrderedContainer::Priority(buckets) => buckets.iter().map(|b| b.len()).sum(),
        }
    }
}

const HTML_LIKE_EXTENSIONS: &[&str] = &["html", "htm", "php", "jsp", "asp"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "svg", "webp", "ico"];

fn priority_rank(url: &str) -> usize {
    let ext = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.next_back())
                .and_then(|last| last.rsplit_once('.'))
                .map(|(_, ext)| ext.to_ascii_lowercase())
        });

    match ext {
        None => 0,
        Some(ext) if HTML_LIKE_EXTENSIONS.contains(&ext.as_str()) => 0,
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => 1,
        Some(_) => 2,
    }
}

pub struct CrawlFrontier {
    seen: DashMap<String, ()>,
    container: Mutex<OrderedContainer>,
    notify: Notify,
    paused: AtomicBool,
    host_last_seen: DashMap<String, Instant>,
    max_depth: u32,
    allow_cross_domain: bool,
    base_domain: String,
}

impl CrawlFrontier {
    pub fn new(strategy: Strategy, max_depth: u32, allow_cross_domain: bool, base_domain: String) -> Self {
        Self {
            seen: DashMap::new(),
            container: Mutex::new(OrderedContainer::new(strategy)),
            notify: Notify::new(),
            paused: AtomicBool::new(false),
            host_last_seen: DashMap::new(),
            max_depth,
            allow_cross_domain,
            base_domain,
        }
    }

    /// Offers a normalized, absolute URL at the given depth. Assumes the
    /// caller already ran it through the URL Normalizer.
    pub async fn offer(&self, normalized_url: &str, depth: u32) -> OfferOutcome {
        if self.paused.load(Ordering::Acquire) {
            return OfferOutcome::FrontierPaused;
        }

        // Seen-set membership is checked before depth/cross-domain policy so
        // a URL already seen always reports `duplicate`, even if it would
        // also fail one of those checks on a later offer.
        use dashmap::mapref::entry::Entry as DashEntry;
        let vacant = match self.seen.entry(normalized_url.to_string()) {
            DashEntry::Occupied(_) => return OfferOutcome::Duplicate,
            DashEntry::Vacant(v) => v,
        };

        if depth > self.max_depth {
            return OfferOutcome::DepthBlocked;
        }
        if !self.allow_cross_domain && !self.is_same_domain(normalized_url) {
            return OfferOutcome::CrossDomainBlocked;
        }

        vacant.insert(());

        {
            let mut container = self.container.lock().await;
            container.push(normalized_url.to_string(), depth);
        }
        self.notify.notify_waiters();
        OfferOutcome::Accepted
    }

    fn is_same_domain(&self, url: &str) -> bool {
        match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) {
            Some(host) => host == self.base_domain,
            None => true,
        }
    }

    /// Removes and returns the next `(url, depth)` per the configured
    /// strategy, waiting up to `timeout` for work to arrive.
    pub async fn poll(&self, timeout: Duration) -> Option<(String, u32)> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut container = self.container.lock().await;
                if let Some(item) = container.pop() {
                    return Some(item);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    pub async fn size(&self) -> usize {
        self.container.lock().await.len()
    }

    pub async fn empty(&self) -> bool {
        self.size().await == 0
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn frontier_state(&self) -> FrontierState {
        if self.paused.load(Ordering::Acquire) {
            FrontierState::Paused
        } else {
            FrontierState::Active
        }
    }

    /// Marks URLs as seen without enqueuing them, for rehydrating the
    /// seen-set from the record store on task restart.
    pub fn mark_seen_batch(&self, urls: &[String]) {
        for url in urls {
            self.seen.insert(url.clone(), ());
        }
    }

    /// Drops all queued work without touching the seen-set. Used by a
    /// controller restart, which re-seeds from scratch but keeps the
    /// rehydrated seen-set so previously terminal URLs are not redone.
    pub async fn clear_container(&self) {
        let mut container = self.container.lock().await;
        while container.pop().is_some() {}
    }

    pub fn record_host_visit(&self, host: &str) {
        self.host_last_seen.insert(host.to_string(), Instant::now());
    }

    pub fn time_since_host_visit(&self, host: &str) -> Option<Duration> {
        self.host_last_seen.get(host).map(|t| t.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontier(strategy: Strategy) -> CrawlFrontier {
        CrawlFrontier::new(strategy, 3, false, "example.com".to_string())
    }

    #[tokio::test]
    async fn offer_then_duplicate() {
        let f = frontier(Strategy::Breadth);
        assert_eq!(
            f.offer("https://example.com/a", 0).await,
            OfferOutcome::Accepted
        );
        assert_eq!(
            f.offer("https://example.com/a", 0).await,
            OfferOutcome::Duplicate
        );
        assert_eq!(f.size().await, 1);
    }

    #[tokio::test]
    async fn depth_blocked_beyond_max_depth() {
        let f = frontier(Strategy::Breadth);
        assert_eq!(
            f.offer("https://example.com/deep", 4).await,
            OfferOutcome::DepthBlocked
        );
        assert!(f.empty().await);
    }

    #[tokio::test]
    async fn cross_domain_blocked_when_disallowed() {
        let f = frontier(Strategy::Breadth);
        assert_eq!(
            f.offer("https://other.example/x", 0).await,
            OfferOutcome::CrossDomainBlocked
        );
    }

    #[tokio::test]
    async fn cross_domain_allowed_when_configured() {
        let f = CrawlFrontier::new(Strategy::Breadth, 3, true, "example.com".to_string());
        assert_eq!(
            f.offer("https://other.example/x", 0).await,
            OfferOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn paused_frontier_discards_offers() {
        let f = frontier(Strategy::Breadth);
        f.pause();
        assert_eq!(
            f.offer("https://example.com/a", 0).await,
            OfferOutcome::FrontierPaused
        );
        assert!(f.empty().await);
        // a discarded offer is not marked seen either
        f.resume();
        assert_eq!(
            f.offer("https://example.com/a", 0).await,
            OfferOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn breadth_strategy_is_fifo() {
        let f = frontier(Strategy::Breadth);
        f.offer("https://example.com/1", 0).await;
        f.offer("https://example.com/2", 0).await;
        let (first, _) = f.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first, "https://example.com/1");
    }

    #[tokio::test]
    async fn depth_strategy_is_lifo() {
        let f = frontier(Strategy::Depth);
        f.offer("https://example.com/1", 0).await;
        f.offer("https://example.com/2", 0).await;
        let (first, _) = f.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first, "https://example.com/2");
    }

    #[tokio::test]
    async fn priority_strategy_ranks_html_before_images_before_other() {
        let f = frontier(Strategy::Priority);
        f.offer("https://example.com/a.jpg", 0).await;
        f.offer("https://example.com/a.zip", 0).await;
        f.offer("https://example.com/a.html", 0).await;
        let (first, _) = f.poll(Duration::from_millis(10)).await.unwrap();
        let (second, _) = f.poll(Duration::from_millis(10)).await.unwrap();
        let (third, _) = f.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first, "https://example.com/a.html");
        assert_eq!(second, "https://example.com/a.jpg");
        assert_eq!(third, "https://example.com/a.zip");
    }

    #[tokio::test]
    async fn poll_times_out_on_empty_frontier() {
        let f = frontier(Strategy::Breadth);
        let result = f.poll(Duration::from_millis(20)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn rehydrated_seen_urls_reject_reoffer() {
        let f = frontier(Strategy::Breadth);
        f.mark_seen_batch(&["https://example.com/old".to_string()]);
        assert_eq!(
            f.offer("https://example.com/old", 0).await,
            OfferOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn clear_container_drops_queue_but_keeps_seen_set() {
        let f = frontier(Strategy::Breadth);
        f.offer("https://example.com/a", 0).await;
        f.clear_container().await;
        assert!(f.empty().await);
        assert_eq!(
            f.offer("https://example.com/a", 0).await,
            OfferOutcome::Duplicate
        );
    }
}
