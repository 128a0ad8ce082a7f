//! Partner portal: filter the product table, edit the price in a dialog.

use super::{join_url, soft, TargetDriver};
use crate::pricing::format_plain;
use async_trait::async_trait;
use pricesync_browser::{ElementQuery, ElementState, Page};
use pricesync_core::config::Config;
use pricesync_core::{Result, Target, UpdateOutcome};
use std::sync::Arc;
use tracing::info;

const USER: &str = "#username";
const PASSWORD: &str = "#password";
const SUBMIT: &str = "button[type='submit']";
const DASHBOARD: &str = "/dashboard.php";

const FILTER: &str = "#filter-sku";
const ROW: &str = "#products-table tr";
const EDIT_ICON: &str = "button i.fas.fa-edit";
const PRICE: &str = "#edit-preco";
const SAVE: &str = ".modal-footer button";

pub struct PortalDriver {
    page: Page,
    config: Arc<Config>,
}

impl PortalDriver {
    pub fn new(page: Page, config: Arc<Config>) -> Self {
        Self { page, config }
    }
}

#[async_trait]
impl TargetDriver for PortalDriver {
    fn target(&self) -> Target {
        Target::Portal
    }

    async fn login(&mut self) -> Result<()> {
        let portal = &self.config.portal;
        let timeouts = &self.config.timeouts;

        self.page
            .goto(&join_url(&portal.base_url, "login.php"), timeouts.navigation())
            .await?;
        self.page.fill(USER, &portal.user).await?;
        self.page.fill(PASSWORD, &portal.password).await?;
        soft(
            "login submit",
            self.page.click_and_wait_navigation(SUBMIT, timeouts.navigation()),
        )
        .await;
        self.page
            .wait_for_url(DASHBOARD, timeouts.default_timeout())
            .await
    }

    async fn update(&mut self, sku: &str, price: f64) -> Result<UpdateOutcome> {
        let timeouts = &self.config.timeouts;

        self.page.fill(FILTER, sku).await?;
        self.page.press("Enter").await?;
        let row = ElementQuery::css(ROW).with_text(sku);
        self.page
            .wait_for_selector(row, ElementState::Visible, timeouts.rows())
            .await?;
        self.page.click(row.child(EDIT_ICON)).await?;

        self.page
            .wait_for_selector(PRICE, ElementState::Visible, timeouts.round_trip())
            .await?;
        self.page.fill(PRICE, &format_plain(price)).await?;
        self.page
            .click(ElementQuery::css(SAVE).with_text("Salvar"))
            .await?;
        self.page
            .wait_for_selector(PRICE, ElementState::Hidden, timeouts.round_trip())
            .await?;

        info!(target = %Target::Portal, sku = %sku, "Price saved");
        Ok(UpdateOutcome::Success)
    }

    fn is_usable(&self) -> bool {
        !self.page.is_closed()
    }

    async fn close(&mut self) {
        self.page.close().await;
    }
}
