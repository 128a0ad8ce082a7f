//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! One client per WebSocket endpoint: the browser-level endpoint for target
//! and context management, or a page endpoint for everything a tab does.

use pricesync_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type Listeners = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

/// A CDP WebSocket client that can send commands and receive responses/events.
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Pending,
    /// Auto-incrementing command ID.
    next_id: AtomicU64,
    /// Event listeners (domain.event -> channels).
    event_listeners: Listeners,
    /// Set by the reader task once the socket is gone.
    closed: Arc<AtomicBool>,
    command_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a Chrome CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Cdp(format!("failed to connect to {}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        let event_listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        let closed = Arc::new(AtomicBool::new(false));
        let closed_reader = closed.clone();
        let closed_writer = closed.clone();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    closed_writer.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        // Reader task: reads from WebSocket, dispatches responses and events
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let mut pending = pending_clone.lock().await;
                            if let Some(tx) = pending.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            let mut listeners = events_clone.lock().await;
                            if let Some(senders) = listeners.get_mut(method) {
                                senders.retain(|tx| !tx.is_closed());
                                let params = val.get("params").cloned().unwrap_or(Value::Null);
                                for tx in senders.iter() {
                                    let _ = tx.try_send(params.clone());
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by browser");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            closed_reader.store(true, Ordering::SeqCst);
            // Wake everyone still waiting for a response.
            pending_clone.lock().await.clear();
            events_clone.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            closed,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            reader_handle,
            writer_handle,
        })
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// True once the WebSocket has been closed by either side.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::Cdp(format!("connection closed, cannot send '{}'", method)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Cdp(format!("failed to send '{}': {}", method, e)))?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(Error::Cdp(format!("'{}' failed: {}", method, error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Cdp(format!("response channel closed for '{}'", method))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {}ms",
                    method,
                    self.command_timeout.as_millis()
                )))
            }
        }
    }

    /// Subscribe to a CDP event. Returns a receiver that will get event params.
    /// Dropping the receiver unsubscribes on the next matching event.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        self.event_listeners
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Enable a CDP domain (e.g., "Page", "Runtime", "Network").
    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({})).await?;
        Ok(())
    }

    /// Start a navigation. Fails when the browser reports a navigation error
    /// (DNS, refused connection, ...).
    pub async fn navigate(&self, url: &str) -> Result<Value> {
        let result = self.send_command("Page.navigate", json!({"url": url})).await?;
        if let Some(err) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::Cdp(format!("navigation to {} failed: {}", url, err)));
        }
        Ok(result)
    }

    /// Evaluate JavaScript in the page context.
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value> {
        self.send_command(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await
    }

    /// Dispatch a key event via Input domain.
    pub async fn dispatch_key_event(
        &self,
        event_type: &str,
        key: &str,
        code: &str,
        text: Option<&str>,
    ) -> Result<()> {
        let mut params = json!({
            "type": event_type,
            "key": key,
            "code": code,
        });
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        self.send_command("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    /// Insert text (bypasses key events, good for filling forms).
    pub async fn insert_text(&self, text: &str) -> Result<()> {
        self.send_command("Input.insertText", json!({"text": text})).await?;
        Ok(())
    }

    /// Set viewport/device metrics.
    pub async fn set_viewport(&self, width: u32, height: u32, device_scale_factor: f64) -> Result<()> {
        self.send_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": device_scale_factor,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    // ─── Target / context management (browser-level endpoint) ──────────

    /// Create an isolated browser context (separate cookies and storage).
    pub async fn create_browser_context(&self) -> Result<String> {
        let result = self
            .send_command("Target.createBrowserContext", json!({"disposeOnDetach": true}))
            .await?;
        result
            .get("browserContextId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Cdp("no browserContextId returned".to_string()))
    }

    pub async fn dispose_browser_context(&self, context_id: &str) -> Result<()> {
        self.send_command(
            "Target.disposeBrowserContext",
            json!({"browserContextId": context_id}),
        )
        .await?;
        Ok(())
    }

    /// Create a new page target (tab), optionally inside a browser context.
    pub async fn create_target(&self, url: &str, context_id: Option<&str>) -> Result<String> {
        let mut params = json!({"url": url});
        if let Some(ctx) = context_id {
            params["browserContextId"] = json!(ctx);
        }
        let result = self.send_command("Target.createTarget", params).await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Cdp("no targetId returned from createTarget".to_string()))
    }

    /// Close a target by its targetId.
    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.send_command("Target.closeTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }

    // ─── Dialog handling ──────────────────────────────────────────────

    /// Handle a JavaScript dialog (alert/confirm/prompt/beforeunload).
    pub async fn handle_dialog(&self, accept: bool) -> Result<()> {
        self.send_command("Page.handleJavaScriptDialog", json!({"accept": accept}))
            .await?;
        Ok(())
    }

    // ─── Network interception (Fetch domain) ──────────────────────────

    /// Enable the Fetch domain for the given RequestPattern objects, e.g.
    /// `[{"resourceType": "Image", "requestStage": "Request"}]`.
    pub async fn enable_fetch(&self, patterns: Vec<Value>) -> Result<()> {
        self.send_command(
            "Fetch.enable",
            json!({"patterns": patterns, "handleAuthRequests": false}),
        )
        .await?;
        Ok(())
    }

    /// Fail a paused request with a specific error reason.
    pub async fn fetch_fail(&self, request_id: &str, reason: &str) -> Result<()> {
        self.send_command(
            "Fetch.failRequest",
            json!({"requestId": request_id, "errorReason": reason}),
        )
        .await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
