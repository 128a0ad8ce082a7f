pub mod config_cmd;
pub mod doctor;
pub mod logs_cmd;
pub mod run_cmd;

use pricesync_core::{Config, Paths};
use std::path::{Path, PathBuf};

/// Config file in effect: the explicit path, or the default location.
pub fn config_file(paths: &Paths, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths.config_file())
}

/// Load the config (defaults when the file is missing) and apply
/// `PRICESYNC_*` overrides.
pub fn load_config(paths: &Paths, explicit: Option<&Path>) -> anyhow::Result<Config> {
    let file = config_file(paths, explicit);
    let mut config = if file.exists() {
        Config::load(&file)?
    } else if explicit.is_some() {
        anyhow::bail!("config file not found: {}", file.display());
    } else {
        Config::default()
    };
    config.apply_env();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let missing = dir.path().join("nope.json");
        assert!(load_config(&paths, Some(&missing)).is_err());
    }

    #[test]
    fn test_missing_default_config_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let config = load_config(&paths, None).unwrap();
        assert_eq!(config.source.max_candidates, Config::default().source.max_candidates);
    }

    #[test]
    fn test_explicit_config_is_read() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let file = dir.path().join("custom.json");
        std::fs::write(&file, r#"{"source": {"maxCandidates": 5}}"#).unwrap();
        assert_eq!(config_file(&paths, Some(&file)), file);
        let config = load_config(&paths, Some(&file)).unwrap();
        assert_eq!(config.source.max_candidates, 5);
    }
}
