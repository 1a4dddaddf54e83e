use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use plamo_watcher::config::AppConfig;
use plamo_watcher::cooldown::CooldownStore;
use plamo_watcher::registry::Registry;
use plamo_watcher::runner::TaskRunner;
use plamo_watcher::scheduler::WatchScheduler;
use plamo_watcher::sinks::TelegramSink;
use plamo_watcher::sources::{RutenExtractor, RutenSource};

#[derive(Parser, Debug)]
#[command(name = "plamo-watcher", about = "Storefront restock monitor")]
struct Cli {
    /// Run a single polling cycle and exit.
    #[arg(long)]
    once: bool,

    /// Verbose logging regardless of RUST_LOG.
    #[arg(long)]
    debug: bool,
}

fn build_registry(config: &AppConfig) -> Registry {
    let mut registry = Registry::new();
    registry.register_source(
        "ruten",
        Arc::new(RutenSource::new(config.watcher.request_timeout())),
        Arc::new(RutenExtractor::new()),
    );
    registry.register_sink(
        "telegram",
        Arc::new(TelegramSink::new(
            config.telegram.bot_token.clone(),
            config.telegram.chat_id.clone(),
        )),
    );
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("plamo_watcher={}", level).parse()?),
        )
        .init();

    info!("Starting plamo-watcher...");

    let config = AppConfig::from_env()?;

    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()?;
        info!(
            "metrics exporter listening on :{}{}",
            config.metrics.port, config.metrics.endpoint
        );
    }

    let registry = build_registry(&config);
    let cooldown = Arc::new(CooldownStore::new(config.watcher.cooldown()));
    let retry = config.watcher.retry_policy();

    let mut runners = Vec::with_capacity(config.tasks.len());
    for task in &config.tasks {
        let plugin = registry.source(&task.source)?.clone();
        let sink = Arc::clone(registry.sink(&task.sink)?);
        runners.push(TaskRunner::new(
            task.clone(),
            plugin,
            sink,
            Arc::clone(&cooldown),
            retry,
            config.watcher.enrich_concurrency,
            config.watcher.notify_concurrency,
            config.watcher.blacklisted_sellers.clone(),
        ));
    }

    let scheduler = WatchScheduler::new(runners, config.watcher.poll_interval());

    if cli.once {
        scheduler.run_cycle().await;
        return Ok(());
    }

    tokio::select! {
        _ = scheduler.run_forever() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
