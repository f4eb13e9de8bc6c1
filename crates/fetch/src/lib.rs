//! HTTP fetch abstraction used by the Worker. Generalizes the teacher's
//! per-network `NetworkDriver` trait down to the one network this engine
//! speaks: plain HTTP/S.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use crawlhub_core::{CrawlError, FetchConfig, FetchResponse};
use tracing::debug;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs one GET request. Returns `Ok` for any response the server
    /// sent, including 4xx/5xx — the caller classifies the status. `Err`
    /// is reserved for cases where no usable response exists: connect
    /// failure, timeout, or a body that exceeded `config.max_body_size`.
    async fn fetch(&self, url: &str, config: &FetchConfig) -> Result<FetchResponse, CrawlError>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| CrawlError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, config: &FetchConfig) -> Result<FetchResponse, CrawlError> {
        let start = Instant::now();
        debug!(url, "fetching");

        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::Timeout(config.timeout.as_secs())
            } else {
                CrawlError::TransientFetchError(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();

        let mut headers = HashMap::new();
        for (k, v) in resp.headers() {
            if let Ok(val) = v.to_str() {
                headers.insert(k.as_str().to_ascii_lowercase(), val.to_string());
            }
        }
        let content_type = headers.get("content-type").cloned();

        if let Some(declared) = resp.content_length() {
            if declared as usize > config.max_body_size {
                return Err(CrawlError::BodyTooLarge {
                    size: declared as usize,
                    max: config.max_body_size,
                });
            }
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| CrawlError::TransientFetchError(e.to_string()))?;

        if body.len() > config.max_body_size {
            return Err(CrawlError::BodyTooLarge {
                size: body.len(),
                max: config.max_body_size,
            });
        }

        Ok(FetchResponse {
            final_url,
            status,
            headers,
            body: body.to_vec(),
            content_type,
            response_time_seconds: start.elapsed().as_secs_f64(),
        })
    }
}

/// Classifies an HTTP status code the way the Worker's retry loop does:
/// 5xx is transient (worth a retry), everything else terminal.
pub fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status)
}

pub mod testing {
    //! A scripted [`Fetcher`] double, for engine integration tests that
    //! need deterministic responses without a network.
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use crawlhub_core::{CrawlError, FetchConfig, FetchResponse};

    use crate::Fetcher;

    #[derive(Clone)]
    pub enum ScriptedResponse {
        Ok(FetchResponse),
        Err(String),
    }

    /// Maps request URL -> a queue of responses to return, one per call
    /// (last entry repeats once exhausted).
    pub struct ScriptedFetcher {
        scripts: Map<String, Mutex<Vec<ScriptedResponse>>>,
    }

    impl ScriptedFetcher {
        pub fn new(scripts: Map<String, Vec<ScriptedResponse>>) -> Self {
            Self {
                scripts: scripts.into_iter().map(|(k, v)| (k, Mutex::new(v))).collect(),
            }
        }

        pub fn html(url: &str, body: &str, links: &[&str]) -> ScriptedResponse {
            let mut html = format!("<html><body>{body}");
            for l in links {
                html.push_str(&format!("<a href=\"{l}\"></a>"));
            }
            html.push_str("</body></html>");
            ScriptedResponse::Ok(FetchResponse {
                final_url: url.to_string(),
                status: 200,
                headers: Map::new(),
                body: html.into_bytes(),
                content_type: Some("text/html".to_string()),
                response_time_seconds: 0.001,
            })
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str, _config: &FetchConfig) -> Result<FetchResponse, CrawlError> {
            let Some(queue) = self.scripts.get(url) else {
                return Err(CrawlError::TransientFetchError(format!("no script for {url}")));
            };
            let mut queue = queue.lock().unwrap();
            let next = if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            };
            match next {
                ScriptedResponse::Ok(r) => Ok(r),
                ScriptedResponse::Err(msg) => Err(CrawlError::TransientFetchError(msg)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_5xx_as_retryable() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
        assert!(!is_retryable_status(301));
    }
}
