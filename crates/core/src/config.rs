use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::types::Target;

const REDACTED: &str = "********";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_feed_timeout_secs() -> u64 {
    15
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_feed_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub size: usize,
    /// Pause after a surface is torn down, so sockets and ports settle
    /// before the next browser is launched.
    #[serde(default = "default_settle_pause_ms")]
    pub settle_pause_ms: u64,
}

fn default_batch_size() -> usize {
    10
}

fn default_settle_pause_ms() -> u64 {
    2000
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: default_batch_size(),
            settle_pause_ms: default_settle_pause_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// "chrome" (default, also matches Chromium) or "edge".
    #[serde(default = "default_browser_engine")]
    pub engine: String,
    /// Explicit binary path; skips discovery when set.
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    /// Fail image, font and media requests at the network layer.
    #[serde(default = "default_true")]
    pub block_resources: bool,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_browser_engine() -> String {
    "chrome".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36".to_string()
}

fn default_locale() -> String {
    "pt-BR".to_string()
}

fn default_timezone() -> String {
    "America/Recife".to_string()
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    900
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: default_browser_engine(),
            binary: None,
            headless: true,
            user_agent: default_user_agent(),
            locale: default_locale(),
            timezone: default_timezone(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            block_resources: true,
            extra_args: Vec::new(),
        }
    }
}

/// Wait ceilings. Every blocking wait in the engine uses one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Shared page default; also the per-SKU budget of each target write.
    #[serde(default = "default_default_ms")]
    pub default_ms: u64,
    #[serde(default = "default_navigation_ms")]
    pub navigation_ms: u64,
    /// Loading-indicator and page-size settling on grids.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_rows_ms")]
    pub rows_ms: u64,
    /// Probe for optional dialogs (confirmation popups, overlays).
    #[serde(default = "default_dialog_ms")]
    pub dialog_ms: u64,
}

fn default_default_ms() -> u64 {
    60_000
}

fn default_navigation_ms() -> u64 {
    60_000
}

fn default_settle_ms() -> u64 {
    8_000
}

fn default_rows_ms() -> u64 {
    15_000
}

fn default_dialog_ms() -> u64 {
    2_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: default_default_ms(),
            navigation_ms: default_navigation_ms(),
            settle_ms: default_settle_ms(),
            rows_ms: default_rows_ms(),
            dialog_ms: default_dialog_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn rows(&self) -> Duration {
        Duration::from_millis(self.rows_ms)
    }

    pub fn dialog(&self) -> Duration {
        Duration::from_millis(self.dialog_ms)
    }

    /// Edit dialogs opening and closing after a save: a server round-trip,
    /// so it shares the page default rather than the dialog probe.
    pub fn round_trip(&self) -> Duration {
        self.default_timeout()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(default)]
    pub base_url: String,
    /// Delivery postal code the storefront asks for before showing prices.
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_early_stop_score")]
    pub early_stop_score: f64,
}

fn default_max_candidates() -> usize {
    12
}

fn default_early_stop_score() -> f64 {
    0.6
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            postal_code: None,
            max_candidates: default_max_candidates(),
            early_stop_score: default_early_stop_score(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErpConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub operator_user: String,
    #[serde(default)]
    pub operator_password: String,
    /// Value of the modality select on the operator login form.
    #[serde(default = "default_modality")]
    pub modality: String,
    #[serde(default = "default_login_attempts")]
    pub login_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    /// Guard for the linear page walk of the record locator.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

fn default_modality() -> String {
    "2".to_string()
}

fn default_login_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1500
}

fn default_max_page_size() -> usize {
    100
}

fn default_max_pages() -> usize {
    1000
}

impl Default for ErpConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            user: String::new(),
            password: String::new(),
            operator_user: String::new(),
            operator_password: String::new(),
            modality: default_modality(),
            login_attempts: default_login_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_page_size: default_max_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommerceApiConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommerceConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// REST fallback; only consulted when the admin UI cannot resolve a SKU.
    #[serde(default)]
    pub api: Option<CommerceApiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// Who applies the per-SKU markup for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarkupSide {
    /// The engine writes the markup-inclusive price.
    #[default]
    Engine,
    /// The target re-applies its own markup; the engine writes the base price.
    Target,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MarkupAppliedBy {
    #[serde(default)]
    pub erp: MarkupSide,
    #[serde(default)]
    pub commerce: MarkupSide,
    #[serde(default)]
    pub portal: MarkupSide,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PricingConfig {
    #[serde(default)]
    pub markup_applied_by: MarkupAppliedBy,
}

impl PricingConfig {
    pub fn markup_side(&self, target: Target) -> MarkupSide {
        match target {
            Target::Erp => self.markup_applied_by.erp,
            Target::Commerce => self.markup_applied_by.commerce,
            Target::Portal => self.markup_applied_by.portal,
            Target::Source => MarkupSide::Engine,
        }
    }
}

/// Process-wide settings. Built once at startup, then shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub erp: ErpConfig,
    #[serde(default)]
    pub commerce: CommerceConfig,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    /// Audit log directory; defaults to `<base>/logs`.
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `PRICESYNC_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Unparseable numbers are
    /// ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = text("PRICESYNC_BATCH_SIZE") {
            match v.trim().parse() {
                Ok(n) => self.batch.size = n,
                Err(_) => warn!(value = %v, "Ignoring invalid PRICESYNC_BATCH_SIZE"),
            }
        }
        if let Some(v) = text("PRICESYNC_TIMEOUT_MS") {
            match v.trim().parse() {
                Ok(n) => self.timeouts.default_ms = n,
                Err(_) => warn!(value = %v, "Ignoring invalid PRICESYNC_TIMEOUT_MS"),
            }
        }
        if let Some(v) = text("PRICESYNC_LOG_DIR") {
            self.log_dir = Some(v);
        }
        if let Some(v) = text("PRICESYNC_FEED_URL") {
            self.feed.url = v;
        }
        if let Some(v) = text("PRICESYNC_HEADLESS") {
            self.browser.headless = !matches!(v.trim(), "0" | "false" | "no");
        }

        let overrides: [(&str, &mut String); 10] = [
            ("PRICESYNC_ERP_USER", &mut self.erp.user),
            ("PRICESYNC_ERP_PASS", &mut self.erp.password),
            ("PRICESYNC_ERP_OPERATOR_USER", &mut self.erp.operator_user),
            ("PRICESYNC_ERP_OPERATOR_PASS", &mut self.erp.operator_password),
            ("PRICESYNC_ERP_MODALITY", &mut self.erp.modality),
            ("PRICESYNC_COMMERCE_USER", &mut self.commerce.user),
            ("PRICESYNC_COMMERCE_PASS", &mut self.commerce.password),
            ("PRICESYNC_PORTAL_USER", &mut self.portal.user),
            ("PRICESYNC_PORTAL_PASS", &mut self.portal.password),
            ("PRICESYNC_SOURCE_URL", &mut self.source.base_url),
        ];
        for (key, slot) in overrides {
            if let Some(v) = text(key) {
                *slot = v;
            }
        }

        let api_key = text("PRICESYNC_COMMERCE_API_KEY");
        let api_secret = text("PRICESYNC_COMMERCE_API_SECRET");
        let api_url = text("PRICESYNC_COMMERCE_API_URL");
        if let (Some(key), Some(secret)) = (api_key, api_secret) {
            let base_url = api_url
                .or_else(|| self.commerce.api.as_ref().map(|a| a.base_url.clone()))
                .unwrap_or_else(|| self.commerce.base_url.clone());
            let timeout_secs = self
                .commerce
                .api
                .as_ref()
                .map(|a| a.timeout_secs)
                .unwrap_or_else(default_api_timeout_secs);
            self.commerce.api = Some(CommerceApiConfig {
                base_url,
                consumer_key: key,
                consumer_secret: secret,
                timeout_secs,
            });
        }
    }

    /// Reject settings that would make a run meaningless before any browser
    /// is launched.
    pub fn validate(&self) -> Result<()> {
        if self.batch.size == 0 {
            return Err(Error::Config("batch.size must be at least 1".into()));
        }
        if self.timeouts.default_ms == 0
            || self.timeouts.navigation_ms == 0
            || self.timeouts.settle_ms == 0
            || self.timeouts.rows_ms == 0
        {
            return Err(Error::Config("timeouts must be greater than zero".into()));
        }
        let urls = [
            ("source.baseUrl", &self.source.base_url),
            ("erp.baseUrl", &self.erp.base_url),
            ("commerce.baseUrl", &self.commerce.base_url),
            ("portal.baseUrl", &self.portal.base_url),
        ];
        for (name, url) in urls {
            let url = url.trim();
            if url.is_empty() {
                return Err(Error::Config(format!("{} is not set", name)));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!("{} must be an http(s) URL", name)));
            }
        }
        if self.source.max_candidates == 0 {
            return Err(Error::Config("source.maxCandidates must be at least 1".into()));
        }
        if self.erp.max_page_size == 0 {
            return Err(Error::Config("erp.maxPageSize must be at least 1".into()));
        }
        Ok(())
    }

    pub fn log_dir(&self, paths: &Paths) -> PathBuf {
        match self.log_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => paths.logs_dir(),
        }
    }

    /// Copy with every credential masked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |s: &mut String| {
            if !s.is_empty() {
                *s = REDACTED.to_string();
            }
        };
        let mut cfg = self.clone();
        mask(&mut cfg.erp.password);
        mask(&mut cfg.erp.operator_password);
        mask(&mut cfg.commerce.password);
        mask(&mut cfg.portal.password);
        if let Some(api) = cfg.commerce.api.as_mut() {
            mask(&mut api.consumer_key);
            mask(&mut api.consumer_secret);
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> Config {
        let mut cfg = Config::default();
        cfg.source.base_url = "https://shop.example.com".into();
        cfg.erp.base_url = "http://erp.example.com:800/".into();
        cfg.commerce.base_url = "https://store.example.com".into();
        cfg.portal.base_url = "https://portal.example.com/public/".into();
        cfg
    }

    #[test]
    fn test_defaults_from_empty_json() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.batch.size, 10);
        assert_eq!(cfg.timeouts.default_ms, 60_000);
        assert_eq!(cfg.source.max_candidates, 12);
        assert_eq!(cfg.erp.login_attempts, 2);
        assert!(cfg.browser.headless);
        assert_eq!(cfg.pricing.markup_side(Target::Erp), MarkupSide::Engine);
    }

    #[test]
    fn test_save_round_trip_outlasts_dialog_probe() {
        let mut timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.round_trip(), Duration::from_secs(60));
        assert!(timeouts.round_trip() > timeouts.dialog());

        timeouts.default_ms = 5_000;
        timeouts.dialog_ms = 500;
        assert_eq!(timeouts.round_trip(), Duration::from_millis(5_000));
    }

    #[test]
    fn test_camel_case_sections() {
        let raw = r#"{
  "batch": { "size": 5, "settlePauseMs": 0 },
  "erp": { "baseUrl": "http://erp/", "maxPageSize": 50 },
  "commerce": { "api": { "baseUrl": "https://s", "consumerKey": "ck", "consumerSecret": "cs" } },
  "pricing": { "markupAppliedBy": { "erp": "target" } }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.batch.size, 5);
        assert_eq!(cfg.batch.settle_pause_ms, 0);
        assert_eq!(cfg.erp.max_page_size, 50);
        assert_eq!(cfg.commerce.api.as_ref().unwrap().timeout_secs, 30);
        assert_eq!(cfg.pricing.markup_side(Target::Erp), MarkupSide::Target);
        assert_eq!(cfg.pricing.markup_side(Target::Portal), MarkupSide::Engine);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PRICESYNC_BATCH_SIZE", "3"),
            ("PRICESYNC_TIMEOUT_MS", "not-a-number"),
            ("PRICESYNC_ERP_PASS", "s3cret"),
            ("PRICESYNC_COMMERCE_API_KEY", "ck_1"),
            ("PRICESYNC_COMMERCE_API_SECRET", "cs_1"),
        ]
        .into_iter()
        .collect();
        let mut cfg = valid_config();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.batch.size, 3);
        assert_eq!(cfg.timeouts.default_ms, 60_000);
        assert_eq!(cfg.erp.password, "s3cret");
        let api = cfg.commerce.api.unwrap();
        assert_eq!(api.consumer_key, "ck_1");
        assert_eq!(api.base_url, "https://store.example.com");
    }

    #[test]
    fn test_validate() {
        assert!(valid_config().validate().is_ok());

        let mut cfg = valid_config();
        cfg.batch.size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.portal.base_url = "   ".into();
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.erp.base_url = "erp.local".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_redacted_masks_secrets_only() {
        let mut cfg = valid_config();
        cfg.erp.user = "company".into();
        cfg.erp.password = "pw".into();
        cfg.commerce.api = Some(CommerceApiConfig {
            base_url: "https://s".into(),
            consumer_key: "ck".into(),
            consumer_secret: "cs".into(),
            timeout_secs: 30,
        });
        let shown = cfg.redacted();
        assert_eq!(shown.erp.user, "company");
        assert_eq!(shown.erp.password, REDACTED);
        assert_eq!(shown.portal.password, "");
        assert_eq!(shown.commerce.api.unwrap().consumer_secret, REDACTED);
    }

    #[test]
    fn test_log_dir_fallback() {
        let paths = Paths::with_base(PathBuf::from("/tmp/ps"));
        let mut cfg = Config::default();
        assert_eq!(cfg.log_dir(&paths), PathBuf::from("/tmp/ps/logs"));
        cfg.log_dir = Some("/var/log/pricesync".into());
        assert_eq!(cfg.log_dir(&paths), PathBuf::from("/var/log/pricesync"));
    }
}
