use thiserror::Error;

/// Error taxonomy for the crawl engine. Each variant's handling policy is
/// documented on the owning component (frontier, worker, storage) rather
/// than here — this enum only carries the classification.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("invalid task configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    #[error("blocked by robots.txt: {0}")]
    RobotsBlocked(String),

    #[error("depth limit exceeded")]
    DepthBlocked,

    #[error("cross-domain policy rejected URL")]
    CrossDomainBlocked,

    #[error("transient fetch error: {0}")]
    TransientFetchError(String),

    #[error("permanent fetch error: {0}")]
    PermanentFetchError(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("extractor error: {0}")]
    ExtractorError(String),

    #[error("storage error: {0}")]
    StoreError(String),

    #[error("controller invariant violated: {0}")]
    ControllerBug(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
