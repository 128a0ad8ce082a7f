use super::load_config;
use pricesync_browser::LaunchOptions;
use pricesync_core::Paths;
use pricesync_engine::{BrowserSurfaceFactory, Orchestrator, ProductFeed};
use pricesync_storage::RunLog;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Command-line overrides applied on top of the loaded config.
pub struct RunOverrides {
    pub batch_size: Option<usize>,
    pub feed_url: Option<String>,
    pub headed: bool,
    pub limit: Option<usize>,
}

/// Fetch the feed and run every batch to completion.
pub async fn run(config_path: Option<&Path>, overrides: RunOverrides) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = load_config(&paths, config_path)?;
    if let Some(size) = overrides.batch_size {
        config.batch.size = size;
    }
    if let Some(url) = overrides.feed_url {
        config.feed.url = url;
    }
    if overrides.headed {
        config.browser.headless = false;
    }
    config.validate()?;
    let config = Arc::new(config);

    let feed = ProductFeed::new(&config.feed.url, Duration::from_secs(config.feed.timeout_secs))?;
    let mut tasks = feed.fetch().await?;
    if let Some(limit) = overrides.limit {
        tasks.truncate(limit);
    }
    if tasks.is_empty() {
        println!("No products to sync.");
        return Ok(());
    }

    paths.ensure_dirs()?;
    let mut log = RunLog::create(&config.log_dir(&paths))?;
    info!(path = %log.path().display(), tasks = tasks.len(), "Audit log opened");

    let launch = LaunchOptions::from_config(&config, &paths);
    let factory = Arc::new(BrowserSurfaceFactory::new(config.clone(), launch));
    let orchestrator = Orchestrator::new(factory, &config);

    let summary = orchestrator.run(&tasks, &mut log).await;

    println!();
    println!("{}", summary);
    println!("Audit log: {}", log.path().display());
    Ok(())
}
