//! A single browser tab driven over its own CDP connection.
//!
//! Every wait is bounded: callers pass an explicit ceiling or get the
//! page default. Elements are addressed with [`ElementQuery`], resolved in
//! the page by a small script so a query can filter on text content.

use crate::cdp::CdpClient;
use pricesync_core::{Config, Error, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-tab emulation settings applied on attach.
#[derive(Debug, Clone)]
pub struct PageSettings {
    pub user_agent: String,
    pub locale: String,
    pub timezone: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub block_resources: bool,
    pub default_timeout: Duration,
}

impl PageSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            user_agent: config.browser.user_agent.clone(),
            locale: config.browser.locale.clone(),
            timezone: config.browser.timezone.clone(),
            viewport_width: config.browser.viewport_width,
            viewport_height: config.browser.viewport_height,
            block_resources: config.browser.block_resources,
            default_timeout: config.timeouts.default_timeout(),
        }
    }
}

/// Element address: a CSS selector, optionally narrowed to matches whose
/// text contains `has_text`, optionally descending into the first `child`
/// match inside each candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementQuery<'a> {
    pub css: &'a str,
    pub has_text: Option<&'a str>,
    pub child: Option<&'a str>,
}

impl<'a> ElementQuery<'a> {
    pub fn css(css: &'a str) -> Self {
        Self {
            css,
            has_text: None,
            child: None,
        }
    }

    pub fn with_text(mut self, text: &'a str) -> Self {
        self.has_text = Some(text);
        self
    }

    pub fn child(mut self, css: &'a str) -> Self {
        self.child = Some(css);
        self
    }

    /// JS expression evaluating to the first matching element, or `null`.
    pub(crate) fn resolver_js(&self) -> String {
        format!(
            concat!(
                "(() => {{ const text = {text}; const child = {child};",
                " for (const n of document.querySelectorAll({css})) {{",
                " if (text !== null && !(n.textContent || '').includes(text)) continue;",
                " if (child === null) return n;",
                " const c = n.querySelector(child); if (c) return c; }}",
                " return null; }})()"
            ),
            css = json!(self.css),
            text = json!(self.has_text),
            child = json!(self.child),
        )
    }
}

impl<'a> From<&'a str> for ElementQuery<'a> {
    fn from(css: &'a str) -> Self {
        ElementQuery::css(css)
    }
}

/// Element condition for [`Page::wait_for_selector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Attached,
    Visible,
    /// Detached or not rendered.
    Hidden,
}

const IS_VISIBLE_FN: &str = "(el => !!el && !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length) && getComputedStyle(el).visibility !== 'hidden')";

fn state_predicate(query: &ElementQuery<'_>, state: ElementState) -> String {
    let el = query.resolver_js();
    match state {
        ElementState::Attached => format!("{} !== null", el),
        ElementState::Visible => format!("{}({})", IS_VISIBLE_FN, el),
        ElementState::Hidden => format!("!{}({})", IS_VISIBLE_FN, el),
    }
}

/// Key name, DOM code and the text a key press inserts.
fn key_definition(key: &str) -> (String, String, Option<String>) {
    match key {
        "Enter" | "Return" => ("Enter".into(), "Enter".into(), Some("\r".into())),
        "Tab" => ("Tab".into(), "Tab".into(), None),
        "Escape" | "Esc" => ("Escape".into(), "Escape".into(), None),
        "Backspace" => ("Backspace".into(), "Backspace".into(), None),
        "Delete" => ("Delete".into(), "Delete".into(), None),
        "ArrowDown" => ("ArrowDown".into(), "ArrowDown".into(), None),
        "ArrowUp" => ("ArrowUp".into(), "ArrowUp".into(), None),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => {
                    let code = if c.is_ascii_alphabetic() {
                        format!("Key{}", c.to_ascii_uppercase())
                    } else if c.is_ascii_digit() {
                        format!("Digit{}", c)
                    } else if c == ' ' {
                        "Space".to_string()
                    } else {
                        String::new()
                    };
                    (c.to_string(), code, Some(c.to_string()))
                }
                _ => (other.to_string(), other.to_string(), None),
            }
        }
    }
}

pub struct Page {
    target_id: String,
    cdp: Arc<CdpClient>,
    default_timeout: Duration,
    background: Vec<JoinHandle<()>>,
}

impl Page {
    /// Take over a freshly created tab: enable domains, apply emulation,
    /// auto-accept JS dialogs and (optionally) fail heavy resource loads.
    pub async fn attach(target_id: String, cdp: CdpClient, settings: &PageSettings) -> Result<Self> {
        let cdp = Arc::new(cdp);
        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Runtime").await?;
        cdp.enable_domain("Network").await?;

        cdp.send_command(
            "Network.setUserAgentOverride",
            json!({"userAgent": settings.user_agent, "acceptLanguage": settings.locale}),
        )
        .await?;
        if let Err(e) = cdp
            .send_command("Emulation.setLocaleOverride", json!({"locale": settings.locale}))
            .await
        {
            debug!(error = %e, "Locale override rejected");
        }
        if let Err(e) = cdp
            .send_command(
                "Emulation.setTimezoneOverride",
                json!({"timezoneId": settings.timezone}),
            )
            .await
        {
            debug!(error = %e, "Timezone override rejected");
        }
        cdp.set_viewport(settings.viewport_width, settings.viewport_height, 1.0)
            .await?;

        let mut background = Vec::new();

        let dialogs = cdp.subscribe_event("Page.javascriptDialogOpening").await;
        background.push(spawn_dialog_acceptor(Arc::downgrade(&cdp), dialogs));

        if settings.block_resources {
            let paused = cdp.subscribe_event("Fetch.requestPaused").await;
            let patterns = ["Image", "Font", "Media"]
                .iter()
                .map(|t| json!({"resourceType": t, "requestStage": "Request"}))
                .collect();
            cdp.enable_fetch(patterns).await?;
            background.push(spawn_resource_blocker(Arc::downgrade(&cdp), paused));
        }

        Ok(Self {
            target_id,
            cdp,
            default_timeout: settings.default_timeout,
            background,
        })
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// True once the tab's connection is gone (tab closed or browser died).
    pub fn is_closed(&self) -> bool {
        self.cdp.is_closed()
    }

    pub async fn close(&mut self) {
        for task in self.background.drain(..) {
            task.abort();
        }
        if !self.cdp.is_closed() {
            if let Err(e) = self.cdp.send_command("Page.close", json!({})).await {
                debug!(target_id = %self.target_id, error = %e, "Page.close failed");
            }
        }
    }

    // ─── Script evaluation ──────────────────────────────────────────────

    /// Evaluate and return the raw JSON value (`null` for `undefined`).
    pub async fn eval_value(&self, expression: &str) -> Result<Value> {
        let response = self.cdp.evaluate_js(expression).await?;
        if let Some(details) = response.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .and_then(|v| v.as_str())
                .or_else(|| details.get("text").and_then(|v| v.as_str()))
                .unwrap_or("unknown script error");
            return Err(Error::Cdp(format!("script error: {}", message)));
        }
        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    pub async fn eval<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let value = self.eval_value(expression).await?;
        Ok(serde_json::from_value(value)?)
    }

    // ─── Waits ──────────────────────────────────────────────────────────

    /// Poll a JS predicate until it is truthy. Script errors while polling
    /// (e.g. a context torn down by navigation) count as "not yet".
    pub async fn wait_for(&self, predicate: &str, timeout: Duration) -> Result<()> {
        let expression = format!("!!({})", predicate);
        let poll = async {
            loop {
                match self.eval_value(&expression).await {
                    Ok(Value::Bool(true)) => return Ok(()),
                    Ok(_) => {}
                    Err(e) if self.cdp.is_closed() => return Err(e),
                    Err(e) => debug!(error = %e, "Wait probe failed, retrying"),
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "condition not met within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    pub async fn wait_for_selector<'q>(
        &self,
        query: impl Into<ElementQuery<'q>>,
        state: ElementState,
        timeout: Duration,
    ) -> Result<()> {
        let query = query.into();
        self.wait_for(&state_predicate(&query, state), timeout)
            .await
            .map_err(|e| match e {
                Error::Timeout(_) => Error::Timeout(format!(
                    "'{}' not {:?} within {}ms",
                    query.css,
                    state,
                    timeout.as_millis()
                )),
                other => other,
            })
    }

    /// Wait until the current URL contains `fragment`.
    pub async fn wait_for_url(&self, fragment: &str, timeout: Duration) -> Result<()> {
        let predicate = format!("location.href.includes({})", json!(fragment));
        self.wait_for(&predicate, timeout).await
    }

    /// Wait until no request has been in flight for `quiet`.
    pub async fn wait_for_network_idle(&self, quiet: Duration, timeout: Duration) -> Result<()> {
        let mut started = self.cdp.subscribe_event("Network.requestWillBeSent").await;
        let mut finished = self.cdp.subscribe_event("Network.loadingFinished").await;
        let mut failed = self.cdp.subscribe_event("Network.loadingFailed").await;

        let request_id = |params: &Value| {
            params
                .get("requestId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        let idle = async {
            let mut in_flight: HashSet<String> = HashSet::new();
            loop {
                tokio::select! {
                    Some(params) = started.recv() => {
                        if let Some(id) = request_id(&params) {
                            in_flight.insert(id);
                        }
                    }
                    Some(params) = finished.recv() => {
                        if let Some(id) = request_id(&params) {
                            in_flight.remove(&id);
                        }
                    }
                    Some(params) = failed.recv() => {
                        if let Some(id) = request_id(&params) {
                            in_flight.remove(&id);
                        }
                    }
                    _ = tokio::time::sleep(quiet), if in_flight.is_empty() => return Ok(()),
                    else => return Err(Error::Cdp("connection closed while waiting for network idle".into())),
                }
            }
        };

        match tokio::time::timeout(timeout, idle).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "network not idle within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    // ─── Navigation ─────────────────────────────────────────────────────

    /// Navigate and wait for DOMContentLoaded.
    pub async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        let mut loaded = self.cdp.subscribe_event("Page.domContentEventFired").await;
        debug!(url = %url, "Navigating");
        self.cdp.navigate(url).await?;
        match tokio::time::timeout(timeout, loaded.recv()).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(Error::Cdp(format!("connection closed while loading {}", url))),
            Err(_) => Err(Error::Timeout(format!(
                "{} did not load within {}ms",
                url,
                timeout.as_millis()
            ))),
        }
    }

    pub async fn url(&self) -> Result<String> {
        self.eval("location.href").await
    }

    // ─── Element queries ────────────────────────────────────────────────

    pub async fn exists<'q>(&self, query: impl Into<ElementQuery<'q>>) -> Result<bool> {
        let query = query.into();
        self.eval(&format!("{} !== null", query.resolver_js())).await
    }

    pub async fn is_visible<'q>(&self, query: impl Into<ElementQuery<'q>>) -> Result<bool> {
        let query = query.into();
        self.eval(&state_predicate(&query, ElementState::Visible))
            .await
    }

    /// Index of the first query that resolves to an element.
    pub async fn first_present(&self, queries: &[ElementQuery<'_>]) -> Result<Option<usize>> {
        for (i, query) in queries.iter().enumerate() {
            if self.exists(*query).await? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    pub async fn count(&self, css: &str) -> Result<usize> {
        self.eval(&format!("document.querySelectorAll({}).length", json!(css)))
            .await
    }

    pub async fn text_content<'q>(&self, query: impl Into<ElementQuery<'q>>) -> Result<Option<String>> {
        let query = query.into();
        self.eval(&format!(
            "(el => el ? (el.textContent || '') : null)({})",
            query.resolver_js()
        ))
        .await
    }

    pub async fn inner_html<'q>(&self, query: impl Into<ElementQuery<'q>>) -> Result<Option<String>> {
        let query = query.into();
        self.eval(&format!(
            "(el => el ? el.innerHTML : null)({})",
            query.resolver_js()
        ))
        .await
    }

    pub async fn attribute<'q>(
        &self,
        query: impl Into<ElementQuery<'q>>,
        name: &str,
    ) -> Result<Option<String>> {
        let query = query.into();
        self.eval(&format!(
            "(el => el ? el.getAttribute({}) : null)({})",
            json!(name),
            query.resolver_js()
        ))
        .await
    }

    // ─── Actions ────────────────────────────────────────────────────────

    pub async fn click<'q>(&self, query: impl Into<ElementQuery<'q>>) -> Result<()> {
        let query = query.into();
        let js = format!(
            concat!(
                "(el => {{ if (!el) return false;",
                " el.scrollIntoView({{block: 'center'}});",
                " el.click(); return true; }})({})"
            ),
            query.resolver_js()
        );
        if self.eval::<bool>(&js).await? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("element '{}'", query.css)))
        }
    }

    /// Click and wait for the resulting document load.
    pub async fn click_and_wait_navigation<'q>(
        &self,
        query: impl Into<ElementQuery<'q>>,
        timeout: Duration,
    ) -> Result<()> {
        let query = query.into();
        let mut loaded = self.cdp.subscribe_event("Page.domContentEventFired").await;
        self.click(query).await?;
        match tokio::time::timeout(timeout, loaded.recv()).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(Error::Cdp("connection closed during navigation".into())),
            Err(_) => Err(Error::Timeout(format!(
                "no navigation after clicking '{}' within {}ms",
                query.css,
                timeout.as_millis()
            ))),
        }
    }

    async fn focus(&self, query: &ElementQuery<'_>, clear: bool) -> Result<()> {
        let js = format!(
            concat!(
                "(el => {{ if (!el) return false;",
                " el.scrollIntoView({{block: 'center'}}); el.focus();",
                " if ({clear} && 'value' in el) el.value = '';",
                " return true; }})({el})"
            ),
            clear = clear,
            el = query.resolver_js()
        );
        if self.eval::<bool>(&js).await? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("element '{}'", query.css)))
        }
    }

    /// Replace the element's value and fire `input`/`change` for frameworks.
    pub async fn fill<'q>(&self, query: impl Into<ElementQuery<'q>>, value: &str) -> Result<()> {
        let query = query.into();
        self.focus(&query, true).await?;
        if !value.is_empty() {
            self.cdp.insert_text(value).await?;
        }
        self.eval_value(concat!(
            "(el => { if (!el) return;",
            " el.dispatchEvent(new Event('input', {bubbles: true}));",
            " el.dispatchEvent(new Event('change', {bubbles: true})); })(document.activeElement)"
        ))
        .await?;
        Ok(())
    }

    /// Type key by key, for inputs that react to keystrokes rather than value changes.
    pub async fn type_text<'q>(
        &self,
        query: impl Into<ElementQuery<'q>>,
        text: &str,
        delay: Duration,
    ) -> Result<()> {
        let query = query.into();
        self.focus(&query, false).await?;
        for c in text.chars() {
            let (key, code, insert) = key_definition(&c.to_string());
            self.cdp
                .dispatch_key_event("keyDown", &key, &code, insert.as_deref())
                .await?;
            self.cdp.dispatch_key_event("keyUp", &key, &code, None).await?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }

    /// Press a key on whatever has focus.
    pub async fn press(&self, key: &str) -> Result<()> {
        let (key, code, text) = key_definition(key);
        self.cdp
            .dispatch_key_event("keyDown", &key, &code, text.as_deref())
            .await?;
        self.cdp.dispatch_key_event("keyUp", &key, &code, None).await
    }

    /// `(value, label)` pairs of a `<select>`.
    pub async fn options<'q>(&self, query: impl Into<ElementQuery<'q>>) -> Result<Vec<(String, String)>> {
        let query = query.into();
        let options: Option<Vec<(String, String)>> = self
            .eval(&format!(
                "(el => el && el.options ? Array.from(el.options).map(o => [o.value, (o.text || '').trim()]) : null)({})",
                query.resolver_js()
            ))
            .await?;
        options.ok_or_else(|| Error::NotFound(format!("select '{}'", query.css)))
    }

    pub async fn select_option<'q>(&self, query: impl Into<ElementQuery<'q>>, value: &str) -> Result<()> {
        let query = query.into();
        let js = format!(
            concat!(
                "(el => {{ if (!el || !el.options) return false;",
                " const v = {value};",
                " if (!Array.from(el.options).some(o => o.value === v)) return false;",
                " el.value = v;",
                " el.dispatchEvent(new Event('input', {{bubbles: true}}));",
                " el.dispatchEvent(new Event('change', {{bubbles: true}}));",
                " return true; }})({el})"
            ),
            value = json!(value),
            el = query.resolver_js()
        );
        if self.eval::<bool>(&js).await? {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "option '{}' in select '{}'",
                value, query.css
            )))
        }
    }

    /// Select the first option whose label matches `label`. Returns its value.
    pub async fn select_option_by_label<'q>(
        &self,
        query: impl Into<ElementQuery<'q>>,
        label: &Regex,
    ) -> Result<String> {
        let query = query.into();
        let options = self.options(query).await?;
        let value = options
            .into_iter()
            .find(|(_, text)| label.is_match(text))
            .map(|(value, _)| value)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "option matching /{}/ in select '{}'",
                    label.as_str(),
                    query.css
                ))
            })?;
        self.select_option(query, &value).await?;
        Ok(value)
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        for task in &self.background {
            task.abort();
        }
    }
}

fn spawn_dialog_acceptor(
    cdp: Weak<CdpClient>,
    mut dialogs: tokio::sync::mpsc::Receiver<Value>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(params) = dialogs.recv().await {
            let Some(cdp) = cdp.upgrade() else { break };
            let message = params.get("message").and_then(|v| v.as_str()).unwrap_or("");
            debug!(message = %message, "Accepting JS dialog");
            if let Err(e) = cdp.handle_dialog(true).await {
                warn!(error = %e, "Failed to accept JS dialog");
            }
        }
    })
}

fn spawn_resource_blocker(
    cdp: Weak<CdpClient>,
    mut paused: tokio::sync::mpsc::Receiver<Value>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(params) = paused.recv().await {
            let Some(cdp) = cdp.upgrade() else { break };
            if let Some(id) = params.get("requestId").and_then(|v| v.as_str()) {
                let _ = cdp.fetch_fail(id, "BlockedByClient").await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_escapes_selector_and_text() {
        let query = ElementQuery::css("a[title='x\"y']").with_text("Salvar");
        let js = query.resolver_js();
        assert!(js.contains(r#"document.querySelectorAll("a[title='x\"y']")"#));
        assert!(js.contains(r#"const text = "Salvar";"#));
        assert!(js.contains("const child = null;"));
    }

    #[test]
    fn test_resolver_with_child() {
        let query = ElementQuery::css("tr").child("button.edit");
        let js = query.resolver_js();
        assert!(js.contains("const text = null;"));
        assert!(js.contains(r#"const child = "button.edit";"#));
    }

    #[test]
    fn test_from_str_is_plain_css() {
        let query: ElementQuery = "#vendaPrc".into();
        assert_eq!(query, ElementQuery::css("#vendaPrc"));
        assert!(query.has_text.is_none());
    }

    #[test]
    fn test_state_predicates() {
        let query = ElementQuery::css(".spinner");
        assert!(state_predicate(&query, ElementState::Attached).ends_with("!== null"));
        assert!(state_predicate(&query, ElementState::Visible).starts_with("(el =>"));
        assert!(state_predicate(&query, ElementState::Hidden).starts_with("!(el =>"));
    }

    #[test]
    fn test_key_definition() {
        assert_eq!(
            key_definition("Enter"),
            ("Enter".into(), "Enter".into(), Some("\r".into()))
        );
        assert_eq!(key_definition("Escape").2, None);
        assert_eq!(key_definition("a").1, "KeyA");
        assert_eq!(key_definition("7").1, "Digit7");
        assert_eq!(key_definition("ã"), ("ã".into(), String::new(), Some("ã".into())));
    }
}
