use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crawlhub_core::{AppConfig, CrawlError, RecordStore, Strategy, TaskConfig};
use crawlhub_engine::EngineRegistry;
use crawlhub_fetch::{Fetcher, ReqwestFetcher};
use crawlhub_storage::Storage;

/// CLI-level overrides layered on top of `AppConfig.task_defaults`; `None`
/// means "use the configured default".
#[allow(clippy::too_many_arguments)]
pub struct CrawlArgs {
    pub seed_url: String,
    pub task_id: Option<String>,
    pub strategy: Option<String>,
    pub max_depth: Option<u32>,
    pub worker_count: Option<usize>,
    pub request_interval: Option<f64>,
    pub retry_times: Option<u32>,
    pub respect_robots: Option<bool>,
    pub allow_cross_domain: bool,
}

fn parse_strategy(s: &str) -> Result<Strategy> {
    match s.to_ascii_lowercase().as_str() {
        "breadth" => Ok(Strategy::Breadth),
        "depth" => Ok(Strategy::Depth),
        "priority" => Ok(Strategy::Priority),
        other => anyhow::bail!("unknown strategy '{other}', expected breadth/depth/priority"),
    }
}

fn derive_task_id(seed_url: &str) -> String {
    url::Url::parse(seed_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "task".to_string())
}

fn build_task_config(config: &AppConfig, args: CrawlArgs) -> Result<TaskConfig> {
    let defaults = &config.task_defaults;
    let strategy = match args.strategy {
        Some(s) => parse_strategy(&s)?,
        None => defaults.strategy,
    };
    let task_config = TaskConfig {
        id: args.task_id.unwrap_or_else(|| derive_task_id(&args.seed_url)),
        seed_url: args.seed_url,
        strategy,
        max_depth: args.max_depth.unwrap_or(defaults.max_depth),
        worker_count: args.worker_count.unwrap_or(defaults.worker_count),
        request_interval: Duration::from_secs_f64(
            args.request_interval.unwrap_or(defaults.request_interval_seconds),
        ),
        retry_times: args.retry_times.unwrap_or(defaults.retry_times),
        respect_robots: args.respect_robots.unwrap_or(defaults.respect_robots),
        allow_cross_domain: args.allow_cross_domain || defaults.allow_cross_domain,
    };
    task_config.validate()?;
    Ok(task_config)
}

/// Starts one task, then polls `snapshot()` on `server.snapshot_interval_seconds`
/// until the lifecycle reaches a terminal state or the process receives
/// Ctrl-C (in which case the task is stopped cleanly before exit).
pub async fn run_crawl(config: AppConfig, args: CrawlArgs) -> Result<()> {
    let task_config = build_task_config(&config, args)?;

    let storage = Storage::connect(&config.database.url, config.database.max_connections)
        .await
        .context("connecting to the record store")?;
    storage.run_migrations().await.context("running storage migrations")?;

    let fetch_config = config.fetch.to_fetch_config();
    let fetcher: Arc<dyn Fetcher> = Arc::new(ReqwestFetcher::new(&fetch_config)?);
    let store: Arc<dyn RecordStore> = Arc::new(storage);

    let registry = EngineRegistry::new(store, fetcher, fetch_config, config.fetch.user_agent.clone());
    let controller = registry.start_task(task_config.clone()).await?;

    info!(task_id = %task_config.id, seed_url = %task_config.seed_url, "crawl started");

    let snapshot_interval = Duration::from_secs(config.server.snapshot_interval_seconds);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(snapshot_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!(task_id = %task_config.id, "ctrl-c received, stopping task");
                controller.stop().await?;
                print_snapshot(&task_config.id, controller.snapshot().await);
                return Ok(());
            }
        }

        let snapshot = controller.snapshot().await;
        print_snapshot(&task_config.id, snapshot.clone());

        if matches!(
            snapshot.lifecycle,
            crawlhub_core::Lifecycle::Completed
                | crawlhub_core::Lifecycle::Stopped
                | crawlhub_core::Lifecycle::Failed
        ) {
            break;
        }
    }

    Ok(())
}

fn print_snapshot(task_id: &str, snapshot: crawlhub_core::TaskSnapshot) {
    info!(
        task_id,
        lifecycle = ?snapshot.lifecycle,
        frontier_state = ?snapshot.frontier_state,
        frontier_size = snapshot.frontier_size,
        discovered = snapshot.counters.total_discovered,
        completed = snapshot.counters.completed,
        failed = snapshot.counters.failed,
        robots_blocked = snapshot.counters.robots_blocked,
        bytes = snapshot.counters.bytes,
        avg_response_time_s = snapshot.counters.average_response_time_seconds(),
        "snapshot"
    );
    for worker in &snapshot.workers {
        info!(
            task_id,
            worker = worker.index,
            status = ?worker.status,
            url = worker.current_url.as_deref().unwrap_or("-"),
            completed = worker.completed,
            failed = worker.failed,
            "worker"
        );
    }
}

pub async fn run_status(config: AppConfig, task_id: String) -> Result<()> {
    let storage = Storage::connect(&config.database.url, config.database.max_connections)
        .await
        .context("connecting to the record store")?;
    storage.run_migrations().await.context("running storage migrations")?;

    let stats = storage
        .aggregate_stats(&task_id)
        .await
        .map_err(|e: CrawlError| anyhow::anyhow!(e))?;

    println!("task:            {task_id}");
    println!("total discovered: {}", stats.total_discovered);
    println!("completed:        {}", stats.completed);
    println!("failed:           {}", stats.failed);
    println!("robots_blocked:   {}", stats.robots_blocked);
    println!("bytes:            {}", stats.bytes);
    println!(
        "avg response (s): {:.3}",
        stats.average_response_time_seconds()
    );

    Ok(())
}
