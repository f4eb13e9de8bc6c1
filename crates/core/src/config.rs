use std::time::Duration;

use serde::Deserialize;

use crate::types::Strategy;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub fetch: FetchSectionConfig,
    pub task_defaults: TaskDefaultsConfig,
}

impl AppConfig {
    /// Parse a TOML document, the way `main` loads its config file (or the
    /// embedded fallback when none is given on the command line).
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_seconds: u64,
}

fn default_max_concurrent_tasks() -> usize {
    16
}
fn default_snapshot_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchSectionConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_body_mb")]
    pub max_body_size_mb: usize,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl FetchSectionConfig {
    pub fn to_fetch_config(&self) -> crate::types::FetchConfig {
        crate::types::FetchConfig {
            timeout: Duration::from_secs(self.timeout_seconds),
            max_body_size: self.max_body_size_mb * 1024 * 1024,
            max_redirects: self.max_redirects,
            user_agent: self.user_agent.clone(),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    30
}
fn default_max_body_mb() -> usize {
    20
}
fn default_max_redirects() -> usize {
    10
}
fn default_user_agent() -> String {
    "crawlhub/0.1".to_string()
}

/// Fallback values applied when a submitted `TaskConfig` omits a field;
/// see `crawlhub_engine::registry`.
#[derive(Debug, Deserialize, Clone)]
pub struct TaskDefaultsConfig {
    #[serde(default = "default_strategy")]
    pub strategy: Strategy,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_request_interval")]
    pub request_interval_seconds: f64,
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,
    #[serde(default = "default_respect_robots")]
    pub respect_robots: bool,
    #[serde(default = "default_allow_cross_domain")]
    pub allow_cross_domain: bool,
}

fn default_strategy() -> Strategy {
    Strategy::Breadth
}
fn default_max_depth() -> u32 {
    5
}
fn default_worker_count() -> usize {
    4
}
fn default_request_interval() -> f64 {
    1.0
}
fn default_retry_times() -> u32 {
    2
}
fn default_respect_robots() -> bool {
    true
}
fn default_allow_cross_domain() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml_with_defaults() {
        let toml = r#"
            [server]
            [database]
            url = "postgres://localhost/crawlhub"
            [fetch]
            [task_defaults]
        "#;
        let cfg = AppConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.server.max_concurrent_tasks, 16);
        assert_eq!(cfg.database.url, "postgres://localhost/crawlhub");
        assert_eq!(cfg.fetch.timeout_seconds, 30);
        assert_eq!(cfg.task_defaults.worker_count, 4);
        assert!(cfg.task_defaults.respect_robots);
    }
}
