use super::{config_file, load_config};
use pricesync_browser::{find_browser_binary, list_available_browsers, BrowserEngine};
use pricesync_core::Paths;
use std::path::Path;

/// Check config, browser discovery and log directory before a real run.
pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("🩺 pricesync doctor");
    println!("================================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Config ---
    println!("📋 Configuration");
    let file = config_file(&paths, config_path);
    if file.exists() {
        print_ok("Config file exists", &file.display().to_string());
        ok_count += 1;
    } else {
        print_err("Config file not found", "Run `pricesync config init` to create one");
        err_count += 1;
    }

    let config = match load_config(&paths, config_path) {
        Ok(config) => config,
        Err(e) => {
            print_err("Config unreadable", &e.to_string());
            println!();
            println!("Result: {} ok, {} warnings, {} errors", ok_count, warn_count, err_count + 1);
            return Ok(());
        }
    };
    match config.validate() {
        Ok(()) => {
            print_ok("Config valid", "");
            ok_count += 1;
        }
        Err(e) => {
            print_err("Config invalid", &e.to_string());
            err_count += 1;
        }
    }
    if config.feed.url.trim().is_empty() {
        print_err("Feed URL not set", "Set feed.url or PRICESYNC_FEED_URL");
        err_count += 1;
    } else {
        print_ok("Feed URL set", "");
        ok_count += 1;
    }
    if config.commerce.api.is_some() {
        print_ok("Commerce REST fallback configured", "");
        ok_count += 1;
    } else {
        print_warn(
            "Commerce REST fallback not configured",
            "SKUs missing from the admin list will be skipped",
        );
        warn_count += 1;
    }
    println!("  Batch size: {}", config.batch.size);
    println!();

    // --- 2. Browser ---
    println!("🌐 Browser");
    let engine = BrowserEngine::from_str(&config.browser.engine);
    let configured = config
        .browser
        .binary
        .as_deref()
        .filter(|b| !b.trim().is_empty());
    match configured {
        Some(binary) if Path::new(binary).exists() => {
            print_ok("Configured binary", binary);
            ok_count += 1;
        }
        Some(binary) => {
            print_err("Configured binary missing", binary);
            err_count += 1;
        }
        None => match find_browser_binary(engine) {
            Some(binary) => {
                print_ok(&format!("{} found", engine.name()), &binary);
                ok_count += 1;
            }
            None => {
                print_err(
                    &format!("{} not found", engine.name()),
                    "Install Chrome/Chromium or set browser.binary",
                );
                err_count += 1;
            }
        },
    }
    for (other, binary) in list_available_browsers() {
        if other != engine {
            println!("  ⚪ {:<8} {}", other.name(), binary);
        }
    }
    println!();

    // --- 3. Logs ---
    println!("📁 Audit logs");
    let log_dir = config.log_dir(&paths);
    match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let probe = log_dir.join(".doctor_test");
            match std::fs::write(&probe, "test") {
                Ok(()) => {
                    let _ = std::fs::remove_file(&probe);
                    print_ok("Log directory writable", &log_dir.display().to_string());
                    ok_count += 1;
                }
                Err(e) => {
                    print_err("Log directory not writable", &e.to_string());
                    err_count += 1;
                }
            }
        }
        Err(e) => {
            print_err("Log directory cannot be created", &e.to_string());
            err_count += 1;
        }
    }
    println!();

    println!("Result: {} ok, {} warnings, {} errors", ok_count, warn_count, err_count);
    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {}: {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {}: {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {}: {}", label, hint);
    }
}
