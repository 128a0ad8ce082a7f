use super::{config_file, load_config};
use pricesync_core::{Config, Paths};
use std::path::Path;

/// Show the effective configuration, env overrides applied, secrets masked.
pub async fn show(config_path: Option<&Path>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = load_config(&paths, config_path)?;

    println!();
    println!("📋 Current Configuration");
    println!("  File: {}", config_file(&paths, config_path).display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

/// Write a default config file.
pub async fn init(config_path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let file = config_file(&paths, config_path);
    if file.exists() && !force {
        println!("Config already exists at {}", file.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    Config::default().save(&file)?;
    paths.ensure_dirs()?;
    println!("✅ Config written to {}", file.display());
    println!("   Fill in the target URLs and credentials, then run `pricesync doctor`.");
    Ok(())
}
