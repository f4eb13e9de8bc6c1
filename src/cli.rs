use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "crawlhub", about = "Multi-tenant crawl execution engine")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one crawl task to completion (or until Ctrl-C), printing
    /// periodic snapshots. Stands in for `POST /tasks` + `/start` +
    /// polling `/monitor/{id}/current` in the out-of-scope API.
    Crawl {
        /// Absolute seed URL to start from.
        #[arg(long)]
        seed_url: String,

        /// Task id; derived from the seed URL's host when omitted.
        #[arg(long)]
        task_id: Option<String>,

        /// Frontier traversal order: breadth, depth, or priority.
        #[arg(long)]
        strategy: Option<String>,

        /// Maximum crawl depth (seed is depth 0), in [1, 10].
        #[arg(long)]
        max_depth: Option<u32>,

        /// Number of concurrent workers, in [1, 10].
        #[arg(long)]
        worker_count: Option<usize>,

        /// Minimum seconds between consecutive fetches by the same worker.
        #[arg(long)]
        request_interval: Option<f64>,

        /// Retries for transient (network / 5xx) fetch failures.
        #[arg(long)]
        retry_times: Option<u32>,

        /// Honor robots.txt. Defaults to the config's task_defaults.
        #[arg(long)]
        respect_robots: Option<bool>,

        /// Allow the frontier to enqueue links outside the seed's host.
        #[arg(long)]
        allow_cross_domain: bool,
    },
    /// Print aggregate stats for a previously run task from the durable
    /// store, without spawning a controller.
    Status {
        /// Task id to look up.
        task_id: String,
    },
}
