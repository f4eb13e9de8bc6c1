//! Per-host robots.txt policy cache. The teacher's crawlers never enforced
//! robots.txt themselves (onion/i2p services rarely publish one); the
//! `DefaultMatcher`-based approach here follows the clearnet crawlers
//! elsewhere in the pack instead.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crawlhub_core::FetchConfig;
use crawlhub_fetch::Fetcher;

const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct RobotsPolicy {
    /// `None` means the fetch failed or returned non-2xx: allow everything.
    body: Option<String>,
}

pub struct RobotsCache {
    entries: DashMap<String, Arc<OnceCell<RobotsPolicy>>>,
    fetcher: Arc<dyn Fetcher>,
    user_agent: String,
}

impl RobotsCache {
    pub fn new(fetcher: Arc<dyn Fetcher>, user_agent: String) -> Self {
        Self {
            entries: DashMap::new(),
            fetcher,
            user_agent,
        }
    }

    /// `true` if `url` may be fetched. Parses `url` for its origin, fetches
    /// and memoizes that origin's `/robots.txt` on first use, and is a
    /// cheap cache hit thereafter. Never consult this if the task's
    /// `respect_robots` flag is off — this cache has no such flag itself.
    pub async fn can_fetch(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return true;
        };
        let Some(host) = parsed.host_str() else {
            return true;
        };
        let key = match parsed.port() {
            Some(p) => format!("{}://{}:{}", parsed.scheme(), host, p),
            None => format!("{}://{}", parsed.scheme(), host),
        };

        let cell = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let policy = cell
            .get_or_init(|| async { self.fetch_policy(&key).await })
            .await;

        match &policy.body {
            None => true,
            Some(body) => {
                DefaultMatcher::default().one_agent_allowed_by_robots(body, &self.user_agent, url)
            }
        }
    }

    async fn fetch_policy(&self, origin: &str) -> RobotsPolicy {
        let robots_url = format!("{origin}/robots.txt");
        let config = FetchConfig {
            timeout: ROBOTS_FETCH_TIMEOUT,
            max_body_size: 512 * 1024,
            max_redirects: 5,
            user_agent: self.user_agent.clone(),
        };

        match self.fetcher.fetch(&robots_url, &config).await {
            Ok(resp) if (200..300).contains(&resp.status) => {
                let body = String::from_utf8_lossy(&resp.body).into_owned();
                debug!(origin, "fetched robots.txt");
                RobotsPolicy { body: Some(body) }
            }
            Ok(resp) => {
                debug!(origin, status = resp.status, "robots.txt not found, allowing all");
                RobotsPolicy { body: None }
            }
            Err(e) => {
                warn!(origin, error = %e, "robots.txt fetch failed, allowing all");
                RobotsPolicy { body: None }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crawlhub_fetch::testing::{ScriptedFetcher, ScriptedResponse};
    use crawlhub_core::FetchResponse;

    use super::*;

    fn fetcher_with(origin_body: Option<&str>) -> Arc<dyn Fetcher> {
        let mut scripts = HashMap::new();
        if let Some(body) = origin_body {
            scripts.insert(
                "http://example.com/robots.txt".to_string(),
                vec![ScriptedResponse::Ok(FetchResponse {
                    final_url: "http://example.com/robots.txt".to_string(),
                    status: 200,
                    headers: HashMap::new(),
                    body: body.as_bytes().to_vec(),
                    content_type: Some("text/plain".to_string()),
                    response_time_seconds: 0.001,
                })],
            );
        }
        Arc::new(ScriptedFetcher::new(scripts))
    }

    #[tokio::test]
    async fn blocks_disallowed_path() {
        let body = "User-agent: *\nDisallow: /private/\n";
        let cache = RobotsCache::new(fetcher_with(Some(body)), "crawlhub/0.1".to_string());
        assert!(!cache.can_fetch("http://example.com/private/page").await);
        assert!(cache.can_fetch("http://example.com/public/page").await);
    }

    #[tokio::test]
    async fn allows_all_when_robots_fetch_fails() {
        let cache = RobotsCache::new(fetcher_with(None), "crawlhub/0.1".to_string());
        assert!(cache.can_fetch("http://example.com/anything").await);
    }

    #[tokio::test]
    async fn caches_policy_across_calls() {
        let body = "User-agent: *\nDisallow: /secret\n";
        let cache = RobotsCache::new(fetcher_with(Some(body)), "crawlhub/0.1".to_string());
        assert!(!cache.can_fetch("http://example.com/secret").await);
        // second call for the same origin must hit the cached policy, not refetch
        assert!(cache.can_fetch("http://example.com/open").await);
    }
}
