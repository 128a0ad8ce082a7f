//! Commerce platform admin. The product list UI is tried first; the REST
//! catalog API covers a missing row, a failed UI write or a broken session.

use super::{join_url, soft, TargetDriver};
use crate::commerce_api::{Catalog, CommerceApi};
use crate::pricing::format_br;
use async_trait::async_trait;
use pricesync_browser::{ElementQuery, ElementState, Page};
use pricesync_core::config::Config;
use pricesync_core::{Error, Result, Target, UpdateOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOGIN_USER: &str = "input[name='log']";
const LOGIN_PASSWORD: &str = "input[name='pwd']";
const LOGIN_SUBMIT: &str = "input[name='wp-submit']";
const ADMIN_MARKERS: &str = "#wpadminbar, body.wp-admin";
const ADMIN_PATH: &str = "/wp-admin/";

const PRODUCT_LIST: &str = "wp-admin/edit.php?post_type=product";
const SEARCH_INPUT: &str = "#post-search-input";
const SEARCH_SUBMIT: &str = "#search-submit";
const LIST_BODY: &str = "table.wp-list-table tbody";
const ROW_TITLE: &str = "table.wp-list-table tbody .row-title";
const NO_ITEMS: &str = "table.wp-list-table tbody tr.no-items";
const SAVED_NOTICE: &str = ".updated.notice-success, .notice-success, #message.updated";

const QUIET: Duration = Duration::from_millis(500);

/// Why the UI path gave up.
#[derive(Debug)]
enum UiFailure {
    /// The list search came back empty.
    NoRows,
    Error(Error),
}

impl From<Error> for UiFailure {
    fn from(e: Error) -> Self {
        UiFailure::Error(e)
    }
}

pub fn login_url(base_url: &str) -> String {
    let admin = join_url(base_url, ADMIN_PATH);
    join_url(
        base_url,
        &format!("wp-login.php?redirect_to={}", urlencoding::encode(&admin)),
    )
}

/// Cap the UI attempt so a stuck admin page leaves time for the REST path.
async fn within<F>(budget: Duration, ui: F) -> std::result::Result<(), UiFailure>
where
    F: Future<Output = std::result::Result<(), UiFailure>>,
{
    match tokio::time::timeout(budget, ui).await {
        Ok(result) => result,
        Err(_) => Err(UiFailure::Error(Error::Timeout(format!(
            "admin UI gave no result within {}ms",
            budget.as_millis()
        )))),
    }
}

/// Final outcome once the UI has had its turn. `ui` is `None` when the
/// session was unusable and the UI was never tried.
async fn finish_write(
    ui: Option<std::result::Result<(), UiFailure>>,
    catalog: Option<&dyn Catalog>,
    sku: &str,
    price: f64,
) -> UpdateOutcome {
    let missing = match ui {
        Some(Ok(())) => return UpdateOutcome::Success,
        Some(Err(UiFailure::NoRows)) => {
            debug!(sku = %sku, "No rows in admin list, trying REST");
            UpdateOutcome::Skipped
        }
        Some(Err(UiFailure::Error(e))) => {
            warn!(sku = %sku, error = %e, "Admin UI update failed, trying REST");
            UpdateOutcome::Failed
        }
        None => UpdateOutcome::Skipped,
    };
    write_via_catalog(catalog, sku, price, missing).await
}

/// Write through the catalog API. `missing` is the outcome when no API is
/// configured.
async fn write_via_catalog(
    catalog: Option<&dyn Catalog>,
    sku: &str,
    price: f64,
    missing: UpdateOutcome,
) -> UpdateOutcome {
    let Some(catalog) = catalog else {
        return missing;
    };
    let id = match catalog.find_product_id(sku).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            info!(sku = %sku, "SKU not present in commerce catalog");
            return UpdateOutcome::Skipped;
        }
        Err(e) => {
            warn!(sku = %sku, error = %e, "Commerce REST lookup failed");
            return UpdateOutcome::Failed;
        }
    };
    match catalog.set_regular_price(id, price).await {
        Ok(()) => {
            debug!(sku = %sku, product_id = id, "Price written via REST");
            UpdateOutcome::Success
        }
        Err(e) => {
            warn!(sku = %sku, error = %e, "Commerce REST write failed");
            UpdateOutcome::Failed
        }
    }
}

pub struct CommerceDriver {
    page: Page,
    config: Arc<Config>,
    api: Option<CommerceApi>,
}

impl CommerceDriver {
    pub fn new(page: Page, config: Arc<Config>) -> Self {
        let api = config.commerce.api.as_ref().and_then(|c| match CommerceApi::new(c) {
            Ok(api) => Some(api),
            Err(e) => {
                warn!(error = %e, "Commerce REST fallback disabled");
                None
            }
        });
        Self { page, config, api }
    }

    fn catalog(&self) -> Option<&dyn Catalog> {
        self.api.as_ref().map(|api| api as &dyn Catalog)
    }

    /// Whole UI attempt; the rest of the update budget is left to REST.
    fn ui_budget(&self) -> Duration {
        self.config.timeouts.default_timeout() / 2
    }

    /// Single UI waits, shorter than the UI budget itself.
    fn ui_wait(&self) -> Duration {
        self.config.timeouts.default_timeout() / 3
    }

    async fn update_via_ui(&self, sku: &str, price: f64) -> std::result::Result<(), UiFailure> {
        let wait = self.ui_wait();
        let base = &self.config.commerce.base_url;

        self.page.goto(&join_url(base, PRODUCT_LIST), wait).await?;
        self.page.fill(SEARCH_INPUT, sku).await?;
        soft(
            "search submit",
            self.page.click_and_wait_navigation(SEARCH_SUBMIT, wait),
        )
        .await;
        self.page
            .wait_for_selector(LIST_BODY, ElementState::Attached, wait)
            .await?;

        if self.page.exists(NO_ITEMS).await? || !self.page.exists(ROW_TITLE).await? {
            return Err(UiFailure::NoRows);
        }
        self.page.click_and_wait_navigation(ROW_TITLE, wait).await?;

        let inputs = [
            ElementQuery::css("#_regular_price"),
            ElementQuery::css("input[name='_regular_price']"),
        ];
        let Some(i) = self.page.first_present(&inputs).await? else {
            return Err(Error::NotFound("regular price field".into()).into());
        };
        self.page.fill(inputs[i], &format_br(price)).await?;

        let publish = [
            ElementQuery::css("#publish"),
            ElementQuery::css("button.editor-post-publish-button"),
        ];
        let Some(i) = self.page.first_present(&publish).await? else {
            return Err(Error::NotFound("publish button".into()).into());
        };
        self.page.click(publish[i]).await?;

        if soft(
            "saved notice",
            self.page
                .wait_for_selector(SAVED_NOTICE, ElementState::Attached, wait),
        )
        .await
        .is_none()
        {
            soft("network idle", self.page.wait_for_network_idle(QUIET, wait)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl TargetDriver for CommerceDriver {
    fn target(&self) -> Target {
        Target::Commerce
    }

    async fn login(&mut self) -> Result<()> {
        let commerce = &self.config.commerce;
        let timeouts = &self.config.timeouts;

        self.page
            .goto(&login_url(&commerce.base_url), timeouts.navigation())
            .await?;
        self.page.fill(LOGIN_USER, &commerce.user).await?;
        self.page.fill(LOGIN_PASSWORD, &commerce.password).await?;
        soft(
            "login submit",
            self.page
                .click_and_wait_navigation(LOGIN_SUBMIT, timeouts.navigation()),
        )
        .await;

        if self
            .page
            .wait_for_url(ADMIN_PATH, timeouts.default_timeout())
            .await
            .is_ok()
        {
            return Ok(());
        }
        self.page
            .wait_for_selector(ADMIN_MARKERS, ElementState::Attached, timeouts.dialog())
            .await
    }

    async fn update(&mut self, sku: &str, price: f64) -> Result<UpdateOutcome> {
        let ui = within(self.ui_budget(), self.update_via_ui(sku, price)).await;
        Ok(finish_write(Some(ui), self.catalog(), sku, price).await)
    }

    async fn update_unavailable(&mut self, sku: &str, price: f64) -> UpdateOutcome {
        finish_write(None, self.catalog(), sku, price).await
    }

    fn is_usable(&self) -> bool {
        !self.page.is_closed()
    }

    async fn close(&mut self) {
        self.page.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    enum Lookup {
        Found(u64),
        Absent,
        Down,
    }

    struct FakeCatalog {
        lookup: Lookup,
        write_ok: bool,
        writes: Mutex<Vec<(u64, f64)>>,
    }

    impl FakeCatalog {
        fn new(lookup: Lookup, write_ok: bool) -> Self {
            Self {
                lookup,
                write_ok,
                writes: Mutex::new(Vec::new()),
            }
        }

        fn writes(&self) -> Vec<(u64, f64)> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn find_product_id(&self, _sku: &str) -> Result<Option<u64>> {
            match self.lookup {
                Lookup::Found(id) => Ok(Some(id)),
                Lookup::Absent => Ok(None),
                Lookup::Down => Err(Error::Http("connection refused".into())),
            }
        }

        async fn set_regular_price(&self, product_id: u64, price: f64) -> Result<()> {
            if !self.write_ok {
                return Err(Error::Http("HTTP 500".into()));
            }
            self.writes.lock().unwrap().push((product_id, price));
            Ok(())
        }
    }

    fn ui_error() -> Option<std::result::Result<(), UiFailure>> {
        Some(Err(UiFailure::Error(Error::NotFound("publish button".into()))))
    }

    #[tokio::test]
    async fn test_ui_success_does_not_touch_catalog() {
        let catalog = FakeCatalog::new(Lookup::Found(42), true);
        let outcome = finish_write(Some(Ok(())), Some(&catalog), "7891", 9.88).await;
        assert_eq!(outcome, UpdateOutcome::Success);
        assert!(catalog.writes().is_empty());
    }

    #[tokio::test]
    async fn test_no_rows_without_api_is_skipped() {
        let outcome = finish_write(Some(Err(UiFailure::NoRows)), None, "7891", 9.88).await;
        assert_eq!(outcome, UpdateOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_no_rows_and_absent_from_catalog_is_skipped() {
        let catalog = FakeCatalog::new(Lookup::Absent, true);
        let outcome = finish_write(Some(Err(UiFailure::NoRows)), Some(&catalog), "7891", 9.88).await;
        assert_eq!(outcome, UpdateOutcome::Skipped);
        assert!(catalog.writes().is_empty());
    }

    #[tokio::test]
    async fn test_no_rows_written_through_catalog() {
        let catalog = FakeCatalog::new(Lookup::Found(42), true);
        let outcome = finish_write(Some(Err(UiFailure::NoRows)), Some(&catalog), "7891", 9.88).await;
        assert_eq!(outcome, UpdateOutcome::Success);
        assert_eq!(catalog.writes(), vec![(42, 9.88)]);
    }

    #[tokio::test]
    async fn test_ui_error_without_api_is_failed() {
        assert_eq!(finish_write(ui_error(), None, "7891", 9.88).await, UpdateOutcome::Failed);
    }

    #[tokio::test]
    async fn test_ui_error_recovered_through_catalog() {
        let catalog = FakeCatalog::new(Lookup::Found(7), true);
        let outcome = finish_write(ui_error(), Some(&catalog), "7891", 12.5).await;
        assert_eq!(outcome, UpdateOutcome::Success);
        assert_eq!(catalog.writes(), vec![(7, 12.5)]);
    }

    #[tokio::test]
    async fn test_lookup_error_is_failed() {
        let catalog = FakeCatalog::new(Lookup::Down, true);
        let outcome = finish_write(Some(Err(UiFailure::NoRows)), Some(&catalog), "7891", 9.88).await;
        assert_eq!(outcome, UpdateOutcome::Failed);
    }

    #[tokio::test]
    async fn test_write_error_is_failed() {
        let catalog = FakeCatalog::new(Lookup::Found(42), false);
        let outcome = finish_write(ui_error(), Some(&catalog), "7891", 9.88).await;
        assert_eq!(outcome, UpdateOutcome::Failed);
    }

    #[tokio::test]
    async fn test_unusable_session_goes_straight_to_catalog() {
        let catalog = FakeCatalog::new(Lookup::Found(42), true);
        assert_eq!(finish_write(None, Some(&catalog), "7891", 9.88).await, UpdateOutcome::Success);
        assert_eq!(catalog.writes(), vec![(42, 9.88)]);
        assert_eq!(finish_write(None, None, "7891", 9.88).await, UpdateOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_stuck_ui_still_reaches_catalog() {
        let ui = within(
            Duration::from_millis(50),
            futures::future::pending::<std::result::Result<(), UiFailure>>(),
        )
        .await;
        assert!(matches!(ui, Err(UiFailure::Error(Error::Timeout(_)))));

        let catalog = FakeCatalog::new(Lookup::Found(42), true);
        let outcome = finish_write(Some(ui), Some(&catalog), "7891", 9.88).await;
        assert_eq!(outcome, UpdateOutcome::Success);
        assert_eq!(catalog.writes(), vec![(42, 9.88)]);
    }

    #[tokio::test]
    async fn test_ui_within_budget_keeps_its_result() {
        let ui = within(Duration::from_secs(5), async { Err(UiFailure::NoRows) }).await;
        assert!(matches!(ui, Err(UiFailure::NoRows)));
    }

    #[test]
    fn test_login_url_redirects_to_admin() {
        assert_eq!(
            login_url("https://store.example.com/"),
            "https://store.example.com/wp-login.php?redirect_to=https%3A%2F%2Fstore.example.com%2Fwp-admin%2F"
        );
    }

    #[test]
    fn test_error_converts_to_ui_failure() {
        let failure: UiFailure = Error::Timeout("list".into()).into();
        assert!(matches!(failure, UiFailure::Error(Error::Timeout(_))));
    }
}
