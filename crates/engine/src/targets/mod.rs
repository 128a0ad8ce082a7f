//! Target Session Manager: one login state machine and one update routine
//! per external system.
//!
//! - `source`: storefront search + price matching (read only)
//! - `erp`: two-stage login, DataTables report located with the record locator
//! - `commerce`: admin product list, with a REST fallback
//! - `portal`: filter + edit dialog

pub mod commerce;
pub mod erp;
pub mod portal;
pub mod source;

use async_trait::async_trait;
use pricesync_browser::Page;
use pricesync_core::{Error, Result, Target, UpdateOutcome};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use commerce::CommerceDriver;
pub use erp::ErpDriver;
pub use portal::PortalDriver;
pub use source::SourceSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggingIn,
    Ready,
    /// Unusable for the rest of the batch.
    Broken,
}

/// Target-specific half of a session.
#[async_trait]
pub trait TargetDriver: Send {
    fn target(&self) -> Target;

    /// Drive the login flow until the target's ready signal shows.
    async fn login(&mut self) -> Result<()>;

    /// Write one price. `Ok(Skipped)` when the record does not exist there.
    async fn update(&mut self, sku: &str, price: f64) -> Result<UpdateOutcome>;

    /// Outcome for a write while the session is broken. No navigation.
    async fn update_unavailable(&mut self, _sku: &str, _price: f64) -> UpdateOutcome {
        UpdateOutcome::Skipped
    }

    /// False once the underlying tab is gone.
    fn is_usable(&self) -> bool {
        true
    }

    /// Close the tab.
    async fn close(&mut self) {}
}

pub struct TargetSession<D> {
    driver: D,
    state: SessionState,
}

impl<D: TargetDriver> TargetSession<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: SessionState::LoggedOut,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> Target {
        self.driver.target()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn mark_broken(&mut self) {
        self.state = SessionState::Broken;
    }

    pub async fn close(&mut self) {
        self.driver.close().await;
        self.state = SessionState::LoggedOut;
    }

    /// `LoggedOut -> LoggingIn -> Ready`, or `Broken` with a login error.
    pub async fn login(&mut self) -> Result<()> {
        let target = self.driver.target();
        self.state = SessionState::LoggingIn;
        let started = Instant::now();
        match self.driver.login().await {
            Ok(()) => {
                self.state = SessionState::Ready;
                info!(
                    target = %target,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Login OK"
                );
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Broken;
                Err(match e {
                    login @ Error::Login { .. } => login,
                    other => Error::login(target, other.to_string()),
                })
            }
        }
    }

    /// Write one price within `budget`. Errors and timeouts become
    /// `Failed`; nothing escapes.
    pub async fn update(&mut self, sku: &str, price: f64, budget: Duration) -> UpdateOutcome {
        let target = self.driver.target();
        if self.state != SessionState::Ready {
            debug!(target = %target, sku = %sku, state = ?self.state, "Session unavailable");
            return self.driver.update_unavailable(sku, price).await;
        }

        let outcome = match tokio::time::timeout(budget, self.driver.update(sku, price)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(target = %target, sku = %sku, error = %e, "Update failed");
                UpdateOutcome::Failed
            }
            Err(_) => {
                warn!(
                    target = %target,
                    sku = %sku,
                    budget_ms = budget.as_millis() as u64,
                    "Update timed out"
                );
                UpdateOutcome::Failed
            }
        };

        if !self.driver.is_usable() {
            warn!(target = %target, "Tab is gone, session marked broken");
            self.state = SessionState::Broken;
        }
        outcome
    }
}

/// Join a configured base URL and a relative path with exactly one slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Run a probe that may fail without consequence, logging the failure.
pub(crate) async fn soft<T, F>(what: &str, fut: F) -> Option<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match fut.await {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(step = what, error = %e, "Soft step failed");
            None
        }
    }
}

/// Wait for the page's loading overlay to go away, ignoring a timeout.
pub(crate) async fn settle(page: &Page, selector: &str, timeout: Duration) {
    soft(
        "settle",
        page.wait_for_selector(selector, pricesync_browser::ElementState::Hidden, timeout),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeDriver {
        login_ok: bool,
        result: Option<UpdateOutcome>,
        delay: Duration,
        usable: bool,
        calls: Arc<AtomicUsize>,
    }

    impl FakeDriver {
        fn new(login_ok: bool) -> Self {
            Self {
                login_ok,
                result: Some(UpdateOutcome::Success),
                delay: Duration::ZERO,
                usable: true,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl TargetDriver for FakeDriver {
        fn target(&self) -> Target {
            Target::Portal
        }

        async fn login(&mut self) -> Result<()> {
            if self.login_ok {
                Ok(())
            } else {
                Err(Error::Timeout("ready signal".into()))
            }
        }

        async fn update(&mut self, _sku: &str, _price: f64) -> Result<UpdateOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result
                .ok_or_else(|| Error::NotFound("edit button".into()))
        }

        fn is_usable(&self) -> bool {
            self.usable
        }
    }

    #[tokio::test]
    async fn test_login_transitions() {
        let mut session = TargetSession::new(FakeDriver::new(true));
        assert_eq!(session.state(), SessionState::LoggedOut);
        session.login().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_failed_login_breaks_session_and_skips_updates() {
        let driver = FakeDriver::new(false);
        let calls = driver.calls.clone();
        let mut session = TargetSession::new(driver);

        let err = session.login().await.unwrap_err();
        assert!(matches!(err, Error::Login { target: Target::Portal, .. }));
        assert_eq!(session.state(), SessionState::Broken);

        let outcome = session.update("1", 1.0, Duration::from_secs(1)).await;
        assert_eq!(outcome, UpdateOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_error_becomes_failed() {
        let mut driver = FakeDriver::new(true);
        driver.result = None;
        let mut session = TargetSession::new(driver);
        session.login().await.unwrap();

        let outcome = session.update("1", 1.0, Duration::from_secs(1)).await;
        assert_eq!(outcome, UpdateOutcome::Failed);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_update_timeout_becomes_failed() {
        let mut driver = FakeDriver::new(true);
        driver.delay = Duration::from_secs(30);
        let mut session = TargetSession::new(driver);
        session.login().await.unwrap();

        let outcome = session.update("1", 1.0, Duration::from_millis(50)).await;
        assert_eq!(outcome, UpdateOutcome::Failed);
    }

    #[tokio::test]
    async fn test_dead_tab_breaks_session() {
        let mut driver = FakeDriver::new(true);
        driver.usable = false;
        let mut session = TargetSession::new(driver);
        session.login().await.unwrap();

        assert_eq!(
            session.update("1", 1.0, Duration::from_secs(1)).await,
            UpdateOutcome::Success
        );
        assert_eq!(session.state(), SessionState::Broken);
        assert_eq!(
            session.update("2", 1.0, Duration::from_secs(1)).await,
            UpdateOutcome::Skipped
        );
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://erp:800/", "relatorio"), "http://erp:800/relatorio");
        assert_eq!(join_url("https://p/public", "/login.php"), "https://p/public/login.php");
    }
}
