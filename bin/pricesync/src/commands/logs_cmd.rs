use super::load_config;
use pricesync_core::Paths;
use pricesync_storage::{RunLog, RunSummary};
use std::path::{Path, PathBuf};

fn log_dir(config_path: Option<&Path>) -> anyhow::Result<PathBuf> {
    let paths = Paths::new();
    let config = load_config(&paths, config_path)?;
    Ok(config.log_dir(&paths))
}

/// List run logs with their record counts.
pub async fn list(config_path: Option<&Path>) -> anyhow::Result<()> {
    let dir = log_dir(config_path)?;
    let logs = RunLog::list(&dir)?;
    if logs.is_empty() {
        println!("(No run logs in {})", dir.display());
        return Ok(());
    }

    println!("📋 Run logs in {}", dir.display());
    println!();
    for path in logs {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match RunLog::read(&path) {
            Ok(records) => {
                let s = RunSummary::from_records(&records);
                println!(
                    "  {:<20} total={:<5} ok={:<5} failed={:<5} ignored={}",
                    name, s.total, s.ok, s.failed, s.ignored
                );
            }
            Err(e) => println!("  {:<20} unreadable: {}", name, e),
        }
    }
    Ok(())
}

/// Print one run log; `file` is a name inside the log dir or a path.
pub async fn show(config_path: Option<&Path>, file: Option<String>) -> anyhow::Result<()> {
    let dir = log_dir(config_path)?;
    let path = match file {
        Some(f) => resolve(&dir, &f),
        None => match RunLog::latest(&dir)? {
            Some(path) => path,
            None => {
                println!("(No run logs in {})", dir.display());
                return Ok(());
            }
        },
    };

    let records = RunLog::read(&path)?;
    println!("📋 {}", path.display());
    println!();
    for r in &records {
        let price = r
            .final_price
            .map(|p| format!("{:.2}", p))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {:<14} {:<14} {:>10}  {}",
            r.time,
            r.status.as_str(),
            r.sku,
            price,
            r.display_name
        );
    }

    let s = RunSummary::from_records(&records);
    println!();
    println!(
        "OK={} (partial {}) | Failed={} | Ignored={} | Total={}",
        s.ok, s.partial, s.failed, s.ignored, s.total
    );
    Ok(())
}

fn resolve(dir: &Path, file: &str) -> PathBuf {
    let given = PathBuf::from(file);
    if given.is_absolute() || given.exists() {
        given
    } else {
        dir.join(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_prefers_log_dir_for_bare_names() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            resolve(dir.path(), "2026-01-02_1.json"),
            dir.path().join("2026-01-02_1.json")
        );
        let abs = dir.path().join("elsewhere.json");
        assert_eq!(resolve(dir.path(), abs.to_str().unwrap()), abs);
    }
}
