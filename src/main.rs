mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

// mimalloc handles the bursty small-allocation pattern of a worker pool
// better than glibc malloc, which doesn't release memory back under
// sustained concurrent load.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use crawlhub_core::AppConfig;

use crate::cli::{Cli, Commands};
use crate::commands::CrawlArgs;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(8)
        .thread_stack_size(4 * 1024 * 1024)
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using embedded defaults");
        include_str!("../config/default.toml").to_string()
    });
    let config: AppConfig = toml::from_str(&config_str).context("parsing config file")?;

    match cli.command {
        Commands::Crawl {
            seed_url,
            task_id,
            strategy,
            max_depth,
            worker_count,
            request_interval,
            retry_times,
            respect_robots,
            allow_cross_domain,
        } => {
            commands::run_crawl(
                config,
                CrawlArgs {
                    seed_url,
                    task_id,
                    strategy,
                    max_depth,
                    worker_count,
                    request_interval,
                    retry_times,
                    respect_robots,
                    allow_cross_domain,
                },
            )
            .await
        }
        Commands::Status { task_id } => commands::run_status(config, task_id).await,
    }
}
