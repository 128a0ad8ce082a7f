//! Automation surface: one browser process with one isolated context.
//!
//! A surface is allocated per batch and torn down when the batch ends.
//! Each surface owns a throwaway profile directory, so no cookies or storage
//! leak between batches.

use crate::cdp::CdpClient;
use crate::page::{Page, PageSettings};
use pricesync_core::{Config, Error, Paths, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Supported browser engines. Both speak CDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserEngine {
    Chrome,
    Edge,
}

impl BrowserEngine {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "edge" | "msedge" => Self::Edge,
            _ => Self::Chrome,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Edge => "edge",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub engine: BrowserEngine,
    pub binary: Option<String>,
    pub headless: bool,
    pub extra_args: Vec<String>,
    /// Parent directory of per-surface profile directories.
    pub profile_root: PathBuf,
    pub startup_timeout: Duration,
    pub page: PageSettings,
}

impl LaunchOptions {
    pub fn from_config(config: &Config, paths: &Paths) -> Self {
        Self {
            engine: BrowserEngine::from_str(&config.browser.engine),
            binary: config.browser.binary.clone(),
            headless: config.browser.headless,
            extra_args: config.browser.extra_args.clone(),
            profile_root: paths.browser_profiles_dir(),
            startup_timeout: Duration::from_secs(15),
            page: PageSettings::from_config(config),
        }
    }
}

pub struct AutomationSurface {
    process: Child,
    /// Browser-level connection, used for contexts and targets.
    browser: CdpClient,
    debug_port: u16,
    context_id: Option<String>,
    profile_dir: PathBuf,
    page_targets: Vec<String>,
    page_settings: PageSettings,
    closed: bool,
}

impl AutomationSurface {
    /// Launch a browser and open an isolated context in it. On any failure
    /// the half-started process is killed and its profile removed.
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let browser_path = match &options.binary {
            Some(path) => path.clone(),
            None => find_browser_binary(options.engine).ok_or_else(|| {
                Error::Surface(format!("{} not found. Please install it.", options.engine.name()))
            })?,
        };

        let profile_dir = options
            .profile_root
            .join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&profile_dir)
            .map_err(|e| Error::Surface(format!("failed to create profile dir: {}", e)))?;

        let debug_port = match find_free_port().await {
            Ok(port) => port,
            Err(e) => {
                remove_profile(&profile_dir);
                return Err(e);
            }
        };
        let args = build_browser_args(options, debug_port, &profile_dir);

        info!(
            port = debug_port,
            headless = options.headless,
            browser = options.engine.name(),
            "Launching browser"
        );

        let mut child = match Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                remove_profile(&profile_dir);
                return Err(Error::Surface(format!(
                    "failed to launch {}: {}",
                    options.engine.name(),
                    e
                )));
            }
        };

        match connect_browser(debug_port, options.startup_timeout).await {
            Ok((browser, context_id)) => Ok(Self {
                process: child,
                browser,
                debug_port,
                context_id,
                profile_dir,
                page_targets: Vec::new(),
                page_settings: options.page.clone(),
                closed: false,
            }),
            Err(e) => {
                let _ = child.kill().await;
                remove_profile(&profile_dir);
                Err(Error::Surface(e.to_string()))
            }
        }
    }

    pub fn debug_port(&self) -> u16 {
        self.debug_port
    }

    /// Open a new tab in this surface's context.
    pub async fn new_page(&mut self) -> Result<Page> {
        if self.closed {
            return Err(Error::Surface("surface already closed".into()));
        }
        let target_id = self
            .browser
            .create_target("about:blank", self.context_id.as_deref())
            .await?;
        let ws_url = get_target_ws_url(self.debug_port, &target_id).await?;
        let cdp = CdpClient::connect(&ws_url)
            .await?
            .with_command_timeout(self.page_settings.default_timeout);
        let page = Page::attach(target_id.clone(), cdp, &self.page_settings).await?;
        self.page_targets.push(target_id);
        Ok(page)
    }

    /// Tear everything down. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if !self.browser.is_closed() {
            for target_id in self.page_targets.drain(..) {
                if let Err(e) = self.browser.close_target(&target_id).await {
                    debug!(target_id = %target_id, error = %e, "closeTarget failed (tab may be gone)");
                }
            }
            if let Some(context_id) = self.context_id.take() {
                if let Err(e) = self.browser.dispose_browser_context(&context_id).await {
                    debug!(error = %e, "disposeBrowserContext failed");
                }
            }
            if let Err(e) = self.browser.send_command("Browser.close", json!({})).await {
                debug!("CDP Browser.close failed (may already be closed): {}", e);
            }
        }
        if let Err(e) = self.process.kill().await {
            debug!(error = %e, "Browser process already gone");
        }
        remove_profile(&self.profile_dir);
        info!(port = self.debug_port, "Browser surface closed");
    }
}

impl Drop for AutomationSurface {
    fn drop(&mut self) {
        if !self.closed {
            // Best-effort kill on drop
            let _ = self.process.start_kill();
            remove_profile(&self.profile_dir);
        }
    }
}

async fn connect_browser(port: u16, startup_timeout: Duration) -> Result<(CdpClient, Option<String>)> {
    let ws_url = wait_for_cdp_ready(port, startup_timeout).await?;
    let browser = CdpClient::connect(&ws_url).await?;
    let context_id = match browser.create_browser_context().await {
        Ok(id) => Some(id),
        Err(e) => {
            // Older builds without context support still get a fresh profile.
            warn!(error = %e, "Browser context unavailable, using default context");
            None
        }
    };
    Ok((browser, context_id))
}

fn remove_profile(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            debug!(dir = %dir.display(), error = %e, "Failed to remove browser profile");
        }
    }
}

fn build_browser_args(options: &LaunchOptions, debug_port: u16, user_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--safebrowsing-disable-auto-update".to_string(),
        "--password-store=basic".to_string(),
        format!("--lang={}", options.page.locale),
    ];
    if cfg!(target_os = "linux") {
        args.push("--no-sandbox".to_string());
        args.push("--disable-dev-shm-usage".to_string());
    }
    if options.headless {
        args.push("--headless=new".to_string());
    }
    args.push(format!(
        "--window-size={},{}",
        options.page.viewport_width, options.page.viewport_height
    ));
    args.extend(options.extra_args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

/// Find a browser binary on the system for the given engine.
pub fn find_browser_binary(engine: BrowserEngine) -> Option<String> {
    let candidates = match engine {
        BrowserEngine::Chrome => {
            if cfg!(target_os = "macos") {
                vec![
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                    "/Applications/Chromium.app/Contents/MacOS/Chromium",
                ]
            } else if cfg!(target_os = "linux") {
                vec![
                    "google-chrome",
                    "google-chrome-stable",
                    "chromium",
                    "chromium-browser",
                    "/usr/bin/google-chrome",
                    "/usr/bin/chromium",
                ]
            } else {
                vec![
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            }
        }
        BrowserEngine::Edge => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "linux") {
                vec!["microsoft-edge", "microsoft-edge-stable", "/usr/bin/microsoft-edge"]
            } else {
                vec![
                    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
                    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
                ]
            }
        }
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

/// List all available browser engines on the system.
pub fn list_available_browsers() -> Vec<(BrowserEngine, String)> {
    [BrowserEngine::Chrome, BrowserEngine::Edge]
        .into_iter()
        .filter_map(|engine| find_browser_binary(engine).map(|path| (engine, path)))
        .collect()
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Surface(format!("failed to bind to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Surface(format!("failed to get local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the browser-level WebSocket URL shows up.
async fn wait_for_cdp_ready(port: u16, timeout: Duration) -> Result<String> {
    let start = std::time::Instant::now();
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Timeout(format!(
                "CDP not ready after {}s on port {}",
                timeout.as_secs(),
                port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve a targetId to its WebSocket debugger URL via /json/list.
/// Retries, since a new target may not be listed immediately.
async fn get_target_ws_url(port: u16, target_id: &str) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };

        if let Some(ws_url) = find_target_ws_url(&targets, target_id) {
            return Ok(ws_url);
        }
    }

    Err(Error::Surface(format!(
        "no WebSocket URL found for target '{}' after retries",
        target_id
    )))
}

fn find_target_ws_url(targets: &[Value], target_id: &str) -> Option<String> {
    targets
        .iter()
        .find(|t| {
            let id = t
                .get("id")
                .or_else(|| t.get("targetId"))
                .and_then(|v| v.as_str());
            id == Some(target_id)
        })
        .and_then(|t| t.get("webSocketDebuggerUrl"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_engine_from_str() {
        assert_eq!(BrowserEngine::from_str("chrome"), BrowserEngine::Chrome);
        assert_eq!(BrowserEngine::from_str("Chromium"), BrowserEngine::Chrome);
        assert_eq!(BrowserEngine::from_str("msedge"), BrowserEngine::Edge);
        assert_eq!(BrowserEngine::from_str("EDGE"), BrowserEngine::Edge);
        assert_eq!(BrowserEngine::from_str("unknown"), BrowserEngine::Chrome);
        assert_eq!(BrowserEngine::Edge.name(), "edge");
    }

    #[test]
    fn test_launch_options_from_config() {
        let mut config = Config::default();
        config.browser.engine = "edge".into();
        config.browser.headless = false;
        let paths = Paths::with_base(PathBuf::from("/tmp/ps"));
        let options = LaunchOptions::from_config(&config, &paths);
        assert_eq!(options.engine, BrowserEngine::Edge);
        assert!(!options.headless);
        assert_eq!(options.profile_root, PathBuf::from("/tmp/ps/browser/profiles"));
        assert_eq!(options.page.locale, "pt-BR");
    }

    #[test]
    fn test_build_browser_args() {
        let mut config = Config::default();
        config.browser.extra_args = vec!["--proxy-server=direct://".into()];
        let options = LaunchOptions::from_config(&config, &Paths::with_base(PathBuf::from("/tmp")));
        let args = build_browser_args(&options, 9333, Path::new("/tmp/profile"));

        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--window-size=1280,900".to_string()));
        assert!(args.contains(&"--lang=pt-BR".to_string()));
        assert!(args.contains(&"--proxy-server=direct://".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn test_headed_has_no_headless_flag() {
        let mut config = Config::default();
        config.browser.headless = false;
        let options = LaunchOptions::from_config(&config, &Paths::with_base(PathBuf::from("/tmp")));
        let args = build_browser_args(&options, 1, Path::new("/p"));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_find_target_ws_url() {
        let targets = vec![
            json!({"id": "A", "type": "page", "webSocketDebuggerUrl": "ws://a"}),
            json!({"id": "B", "type": "page", "webSocketDebuggerUrl": "ws://b"}),
        ];
        assert_eq!(find_target_ws_url(&targets, "B").as_deref(), Some("ws://b"));
        assert_eq!(find_target_ws_url(&targets, "C"), None);
    }
}
