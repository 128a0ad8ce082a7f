//! Storefront price source: search by display name, read the result cards,
//! let the matcher pick one.

use super::{join_url, soft};
use crate::matcher::{Candidate, Matcher};
use crate::pricing::parse_price_text;
use pricesync_browser::{ElementState, Page};
use pricesync_core::config::Config;
use pricesync_core::{Error, PriceQuote, Result, SkuTask, Target};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const CARD: &str = "a.showcase-card-content";
const CARD_TITLE: &str = "h3.TitleCardComponent";
const CARD_PRICE: &str = ".SimplePriceComponent";
const RESULT_COUNTER: &str = ".SearchContainer h1.area-result strong";
const EMPTY_MOSAIC: &str = ".mosaic-container.notFound";
const EMPTY_AREA: &str = ".EmptyAreaComponent";
const EMPTY_AREA_TITLE: &str = ".EmptyAreaComponent .title";
const EMPTY_TEXT: &str = "Não existem produtos";

const POSTAL_MODAL: &str = "#modal-shipping.show, .ShippingModalContainer.medium .ModalDefault.show";
const POSTAL_INPUT: &str = "#shipping-cep";
const POSTAL_CLOSE: &str = "img.svgIcon.svg-ico_close_with_circle";
const OVERLAYS: &str =
    ".black-block, #modal-shipping, .ModalDefault.show, .ShippingModalContainer.medium, .modal-backdrop";

const SETTLE_AFTER_LOAD: Duration = Duration::from_millis(500);
const KEY_DELAY: Duration = Duration::from_millis(20);

/// Raw card as read from the results page.
#[derive(Debug, Clone, Default, Deserialize)]
struct CardSnapshot {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    price: Option<String>,
}

impl From<CardSnapshot> for Candidate {
    fn from(card: CardSnapshot) -> Self {
        let price = card.price.as_deref().and_then(parse_price_text);
        Candidate::new(card.title.as_deref().map(str::trim), price)
    }
}

/// What the search page says about the result set before cards are read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultMarkers {
    #[serde(default)]
    counter: Option<String>,
    #[serde(default)]
    empty_mosaic: bool,
    #[serde(default)]
    empty_title: Option<String>,
}

impl ResultMarkers {
    fn is_empty(&self) -> bool {
        self.counter.as_deref().map(str::trim) == Some("0")
            || self.empty_mosaic
            || self
                .empty_title
                .as_deref()
                .is_some_and(|t| t.contains(EMPTY_TEXT))
    }
}

pub fn search_url(base_url: &str, query: &str) -> String {
    join_url(base_url, &format!("busca?q={}", urlencoding::encode(query.trim())))
}

/// Read-only session on the storefront.
pub struct SourceSession {
    page: Page,
    config: Arc<Config>,
    matcher: Matcher,
}

impl SourceSession {
    pub fn new(page: Page, config: Arc<Config>) -> Self {
        let matcher = Matcher::new(
            config.source.max_candidates,
            config.source.early_stop_score,
        );
        Self {
            page,
            config,
            matcher,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.page.is_closed()
    }

    /// Swap in a fresh tab after the previous one died.
    pub fn replace_page(&mut self, page: Page) {
        self.page = page;
    }

    pub async fn close(&mut self) {
        self.page.close().await;
    }

    fn base_url(&self) -> &str {
        self.config.source.base_url.trim()
    }

    /// Open the storefront and set the delivery postal code.
    pub async fn login(&mut self) -> Result<()> {
        self.open_home()
            .await
            .map_err(|e| Error::login(Target::Source, e.to_string()))?;
        info!(target = %Target::Source, "Storefront ready");
        Ok(())
    }

    async fn open_home(&self) -> Result<()> {
        let timeouts = &self.config.timeouts;
        self.page.goto(self.base_url(), timeouts.navigation()).await?;
        tokio::time::sleep(SETTLE_AFTER_LOAD).await;
        self.ensure_postal_code().await?;
        Ok(())
    }

    async fn ensure_postal_code(&self) -> Result<()> {
        let Some(postal_code) = self
            .config
            .source
            .postal_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        else {
            return Ok(());
        };

        if self.page.is_visible(POSTAL_MODAL).await? {
            let digits: String = postal_code.chars().filter(|c| c.is_ascii_digit()).collect();
            debug!("Filling delivery postal code");
            self.page.fill(POSTAL_INPUT, "").await?;
            self.page.type_text(POSTAL_INPUT, &digits, KEY_DELAY).await?;
            self.page.press("Enter").await?;
            tokio::time::sleep(SETTLE_AFTER_LOAD).await;
            soft("close postal modal", self.page.click(POSTAL_CLOSE)).await;
        }
        self.remove_overlays().await;
        Ok(())
    }

    async fn remove_overlays(&self) {
        let js = format!(
            concat!(
                "(() => {{ document.querySelectorAll({}).forEach(n => n.remove());",
                " document.body.classList.remove('modal-open');",
                " document.body.style.removeProperty('overflow');",
                " document.body.style.removeProperty('padding-right');",
                " return true; }})()"
            ),
            json!(OVERLAYS)
        );
        soft("remove overlays", self.page.eval_value(&js)).await;
    }

    /// Search by display name and return the matched base price.
    pub async fn quote(&mut self, task: &SkuTask) -> Result<PriceQuote> {
        let timeouts = &self.config.timeouts;
        let current = soft("read url", self.page.url()).await.unwrap_or_default();
        if !current.starts_with(self.base_url()) {
            self.open_home().await?;
        } else {
            self.ensure_postal_code().await?;
        }

        let url = search_url(self.base_url(), &task.display_name);
        self.page.goto(&url, timeouts.navigation()).await?;
        self.ensure_postal_code().await?;

        let settled = format!(
            concat!(
                "document.querySelector({card}) !== null",
                " || document.querySelector({empty}) !== null",
                " || (document.querySelector({counter}) || {{}}).textContent === '0'"
            ),
            card = json!(CARD),
            empty = json!(format!("{}, {}", EMPTY_MOSAIC, EMPTY_AREA)),
            counter = json!(RESULT_COUNTER),
        );
        soft("results settle", self.page.wait_for(&settled, timeouts.rows())).await;

        let markers = self.result_markers().await?;
        if markers.is_empty() {
            debug!(sku = %task.sku, "Search returned no products");
            return Ok(PriceQuote::not_found(&task.sku));
        }

        if soft(
            "card anchor",
            self.page
                .wait_for_selector(CARD, ElementState::Attached, timeouts.rows()),
        )
        .await
        .is_none()
        {
            soft(
                "network idle",
                self.page
                    .wait_for_network_idle(SETTLE_AFTER_LOAD, timeouts.settle()),
            )
            .await;
        }

        let cards = self.snapshot_cards().await?;
        if let Some(best) = self
            .matcher
            .pick(&task.display_name, cards.into_iter().map(Candidate::from))
        {
            debug!(sku = %task.sku, index = best.index, score = best.score, "Card matched");
            return Ok(PriceQuote::found(&task.sku, best.price, best.score));
        }

        // Cards may still be hydrating prices on the first read.
        let cards = self.snapshot_cards().await?;
        match self
            .matcher
            .fallback(cards.into_iter().map(Candidate::from))
        {
            Some(first) => Ok(PriceQuote::found(&task.sku, first.price, first.score)),
            None => Ok(PriceQuote::not_found(&task.sku)),
        }
    }

    async fn result_markers(&self) -> Result<ResultMarkers> {
        let js = format!(
            concat!(
                "(() => {{ const t = s => {{ const n = document.querySelector(s);",
                " return n ? (n.textContent || '').trim() : null; }};",
                " return {{ counter: t({counter}),",
                " emptyMosaic: document.querySelector({mosaic}) !== null,",
                " emptyTitle: t({title}) }}; }})()"
            ),
            counter = json!(RESULT_COUNTER),
            mosaic = json!(EMPTY_MOSAIC),
            title = json!(EMPTY_AREA_TITLE),
        );
        self.page.eval(&js).await
    }

    async fn snapshot_cards(&self) -> Result<Vec<CardSnapshot>> {
        let js = format!(
            concat!(
                "Array.from(document.querySelectorAll({card})).slice(0, {max}).map(c => {{",
                " const t = c.querySelector({title}); const p = c.querySelector({price});",
                " return {{ title: t ? t.innerText : null, price: p ? p.innerText : null }}; }})"
            ),
            card = json!(CARD),
            max = self.matcher.max_candidates,
            title = json!(CARD_TITLE),
            price = json!(CARD_PRICE),
        );
        self.page.eval(&js).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_encodes_query() {
        assert_eq!(
            search_url("https://shop.example.com/", " Feijão Carioca 1kg "),
            "https://shop.example.com/busca?q=Feij%C3%A3o%20Carioca%201kg"
        );
    }

    #[test]
    fn test_snapshot_to_candidate() {
        let card = CardSnapshot {
            title: Some("  Arroz 5kg \n".into()),
            price: Some("R$ 1.234,56".into()),
        };
        let candidate = Candidate::from(card);
        assert_eq!(candidate.title.as_deref(), Some("Arroz 5kg"));
        assert_eq!(candidate.price, Some(1234.56));

        let blank = Candidate::from(CardSnapshot::default());
        assert_eq!(blank, Candidate::new(None, None));
    }

    #[test]
    fn test_result_markers() {
        let zero: ResultMarkers =
            serde_json::from_value(json!({"counter": " 0 ", "emptyMosaic": false})).unwrap();
        assert!(zero.is_empty());

        let empty_area: ResultMarkers = serde_json::from_value(json!({
            "counter": null,
            "emptyTitle": "Ops! Não existem produtos para sua busca"
        }))
        .unwrap();
        assert!(empty_area.is_empty());

        let hits: ResultMarkers =
            serde_json::from_value(json!({"counter": "24", "emptyMosaic": false})).unwrap();
        assert!(!hits.is_empty());
    }
}
