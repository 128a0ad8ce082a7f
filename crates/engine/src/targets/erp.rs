//! ERP back office: two-stage login and the product report grid.
//!
//! The report is a jQuery DataTables grid with no fetch-by-key API, so rows
//! are found through [`RecordLocator`] over [`DataTablesGrid`].

use super::{join_url, settle, soft, TargetDriver};
use crate::locator::{Grid, Located, RecordLocator, RowRef};
use crate::pricing::format_br;
use async_trait::async_trait;
use pricesync_browser::{ElementQuery, ElementState, Page};
use pricesync_core::config::Config;
use pricesync_core::{Error, Result, Target, UpdateOutcome};
use regex::Regex;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const TABLE_ID: &str = "#table-relatorio-lista-prod";
const ROWS: &str = "#table-relatorio-lista-prod_wrapper table#table-relatorio-lista-prod tbody tr";
const PROCESSING: &str = "#table-relatorio-lista-prod_processing";
const FILTER: &str = "input[aria-controls='table-relatorio-lista-prod']";
const LENGTH: &str = "select[name='table-relatorio-lista-prod_length']";
const NEXT_ITEM: &str = "#table-relatorio-lista-prod_next";
const NEXT_LINK: &str = "#table-relatorio-lista-prod_next a";
const NEXT_FALLBACK: &str = "#table-relatorio-lista-prod_paginate li.next:not(.disabled) a";
const HIDDEN_ID: &str = "input[id^='grid_codigo_prod_']";
const VISIBLE_KEY: &str = "td:nth-child(2)";
const ROW_MARK: &str = "data-pricesync-row";

const REPORT_PATH: &str = "relatorio-dos-produtos";
const TABLE_SELECT: &str = "#tabela";
const QUERY_BUTTON: &str = "#btn-consultar-lista-produtos";
const EDIT_BUTTON: &str = "button.btn_edita_prod";
const PRICE_INPUTS: [&str; 3] = ["#vendaPrc", "#vendaPrcA", "#vendaPrcC"];
const INFO_MODAL_CLOSE: &str = "#btn_fechar_modal button";

const COMPANY_USER: &str = "#cdslogin";
const COMPANY_PASSWORD: &str = "#cdssenha";
const COMPANY_SUBMIT: &str = "#btn-login";
const OPERATOR_USER: &str = "#usuariologin";
const OPERATOR_PASSWORD: &str = "#usuariosenha";
const MODALITY: &str = "#modalidade";
const OPERATOR_SUBMIT: &str = "#_btn-login";
const BLOCKERS: &str = "#info-modal, .modal-backdrop, .loading, .carregandoVendas";

const AFTER_FILL: Duration = Duration::from_millis(500);

/// Expression for the grid's DataTables API, `null` when jQuery is absent.
fn api_js() -> String {
    format!(
        "(window.jQuery && jQuery.fn.dataTable ? jQuery({}).DataTable() : null)",
        json!(TABLE_ID)
    )
}

/// Largest numeric page-size option.
fn largest_page_size(options: &[(String, String)]) -> Option<(String, usize)> {
    options
        .iter()
        .filter_map(|(value, _)| value.trim().parse::<usize>().ok().map(|n| (value.clone(), n)))
        .max_by_key(|(_, n)| *n)
}

/// Run `attempt` up to `attempts` times (at least once), pausing `delay`
/// between tries. The last error becomes the login failure.
async fn retry_login<F, Fut>(attempts: u32, delay: Duration, mut attempt: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let attempts = attempts.max(1);
    let mut last_error = None;
    for n in 1..=attempts {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt = n, error = %e, "ERP login attempt failed");
                last_error = Some(e);
                if n < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(Error::login(
        Target::Erp,
        last_error.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

/// The report grid on a live page.
pub struct DataTablesGrid<'a> {
    page: &'a Page,
    config: &'a Config,
}

impl<'a> DataTablesGrid<'a> {
    pub fn new(page: &'a Page, config: &'a Config) -> Self {
        Self { page, config }
    }

    /// Mark the first row on this page matching `probe` and return its token.
    async fn mark_row(&self, probe: &str, key: &str) -> Result<Option<RowRef>> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let js = format!(
            concat!(
                "(() => {{ const key = {key};",
                " for (const tr of document.querySelectorAll({rows})) {{",
                " const hit = ({probe})(tr);",
                " if (hit !== null && hit.trim() === key) {{",
                " tr.setAttribute({mark}, {token}); return true; }} }}",
                " return false; }})()"
            ),
            key = json!(key),
            rows = json!(ROWS),
            probe = probe,
            mark = json!(ROW_MARK),
            token = json!(token),
        );
        let found: bool = self.page.eval(&js).await?;
        Ok(found.then(|| RowRef(token)))
    }
}

#[async_trait]
impl<'a> Grid for DataTablesGrid<'a> {
    async fn apply_filter(&mut self, text: &str) -> Result<bool> {
        if !self.page.exists(FILTER).await? {
            return Ok(false);
        }
        self.page.fill(FILTER, text).await?;
        // Some builds only listen for keyup; drive the API too.
        let js = format!(
            "(dt => {{ if (dt) dt.search({}).draw(); return true; }})({})",
            json!(text),
            api_js()
        );
        soft("api search", self.page.eval_value(&js)).await;
        Ok(true)
    }

    async fn stabilize(&mut self) -> Result<()> {
        let timeouts = &self.config.timeouts;
        settle(self.page, PROCESSING, timeouts.settle()).await;

        if let Some(options) = soft("length options", self.page.options(LENGTH)).await {
            if let Some((value, size)) = largest_page_size(&options) {
                let current = soft(
                    "current length",
                    self.page.eval::<Option<String>>(&format!(
                        "(document.querySelector({}) || {{}}).value || null",
                        json!(LENGTH)
                    )),
                )
                .await
                .flatten();
                if current.as_deref() != Some(value.as_str()) {
                    debug!(size = size, "Raising page size");
                    self.page.select_option(LENGTH, &value).await?;
                    settle(self.page, PROCESSING, timeouts.settle()).await;
                }
            }
        } else {
            let js = format!(
                "(dt => {{ if (dt && dt.page.len() < {n}) dt.page.len({n}).draw(false); return true; }})({api})",
                n = self.config.erp.max_page_size,
                api = api_js()
            );
            soft("api page length", self.page.eval_value(&js)).await;
            settle(self.page, PROCESSING, timeouts.settle()).await;
        }

        self.page
            .wait_for_selector(ROWS, ElementState::Attached, timeouts.rows())
            .await
    }

    async fn find_by_hidden_id(&mut self, key: &str) -> Result<Option<RowRef>> {
        let probe = format!(
            "tr => {{ const i = tr.querySelector({}); return i ? (i.value || '') : null; }}",
            json!(HIDDEN_ID)
        );
        self.mark_row(&probe, key).await
    }

    async fn find_by_visible_column(&mut self, key: &str) -> Result<Option<RowRef>> {
        let probe = format!(
            "tr => {{ const td = tr.querySelector({}); return td ? (td.textContent || '') : null; }}",
            json!(VISIBLE_KEY)
        );
        self.mark_row(&probe, key).await
    }

    async fn column_values(&mut self) -> Result<Option<Vec<String>>> {
        let js = format!(
            concat!(
                "(dt => dt ? dt.column(1, {{order: 'applied', search: 'applied'}})",
                ".data().toArray().map(v => v == null ? '' : String(v)) : null)({})"
            ),
            api_js()
        );
        self.page.eval(&js).await
    }

    async fn page_len(&mut self) -> Result<Option<usize>> {
        let js = format!("(dt => dt ? dt.page.len() : null)({})", api_js());
        let len: Option<i64> = self.page.eval(&js).await?;
        Ok(len.and_then(|n| usize::try_from(n).ok()))
    }

    async fn goto_page(&mut self, index: usize) -> Result<()> {
        let js = format!(
            "(dt => {{ if (!dt) return false; dt.page({}).draw(false); return true; }})({})",
            index,
            api_js()
        );
        if self.page.eval::<bool>(&js).await? {
            Ok(())
        } else {
            Err(Error::Locator("grid API unavailable for page jump".into()))
        }
    }

    async fn next_disabled(&mut self) -> Result<bool> {
        let js = format!(
            "(li => !li || li.classList.contains('disabled'))(document.querySelector({}))",
            json!(NEXT_ITEM)
        );
        self.page.eval(&js).await
    }

    async fn next_page(&mut self) -> Result<()> {
        match self.page.click(NEXT_LINK).await {
            Ok(()) => Ok(()),
            Err(_) => self.page.click(NEXT_FALLBACK).await,
        }
    }
}

pub struct ErpDriver {
    page: Page,
    config: Arc<Config>,
    locator: RecordLocator,
    all_tables: Regex,
}

impl ErpDriver {
    pub fn new(page: Page, config: Arc<Config>) -> Result<Self> {
        let locator = RecordLocator::new(config.erp.max_pages);
        let all_tables = Regex::new(r"(?i)todas\s+as\s+tabelas")
            .map_err(|e| Error::Other(format!("invalid table label pattern: {}", e)))?;
        Ok(Self {
            page,
            config,
            locator,
            all_tables,
        })
    }

    async fn login_once(&self) -> Result<()> {
        let erp = &self.config.erp;
        let timeouts = &self.config.timeouts;

        self.page.goto(erp.base_url.trim(), timeouts.navigation()).await?;
        self.page.fill(COMPANY_USER, &erp.user).await?;
        self.page.fill(COMPANY_PASSWORD, &erp.password).await?;
        soft(
            "company submit",
            self.page
                .click_and_wait_navigation(COMPANY_SUBMIT, timeouts.navigation()),
        )
        .await;

        if soft(
            "operator form",
            self.page
                .wait_for_selector(OPERATOR_USER, ElementState::Visible, timeouts.dialog()),
        )
        .await
        .is_none()
        {
            debug!("Operator form hidden, clearing blockers");
            soft("escape", self.page.press("Escape")).await;
            let js = format!(
                "(() => {{ document.querySelectorAll({}).forEach(n => n.remove()); return true; }})()",
                json!(BLOCKERS)
            );
            soft("remove blockers", self.page.eval_value(&js)).await;
            self.page
                .wait_for_selector(OPERATOR_USER, ElementState::Attached, timeouts.default_timeout())
                .await?;
        }

        self.page.fill(OPERATOR_USER, &erp.operator_user).await?;
        self.page.fill(OPERATOR_PASSWORD, &erp.operator_password).await?;
        soft("modality", self.page.select_option(MODALITY, &erp.modality)).await;
        if soft(
            "operator submit",
            self.page
                .click_and_wait_navigation(OPERATOR_SUBMIT, timeouts.navigation()),
        )
        .await
        .is_none()
        {
            soft(
                "network idle",
                self.page.wait_for_network_idle(AFTER_FILL, timeouts.settle()),
            )
            .await;
        }

        // Ready once the operator form is gone.
        self.page
            .wait_for_selector(OPERATOR_USER, ElementState::Hidden, timeouts.default_timeout())
            .await
    }

    async fn open_report(&self) -> Result<()> {
        let timeouts = &self.config.timeouts;
        let url = join_url(&self.config.erp.base_url, REPORT_PATH);
        self.page.goto(&url, timeouts.navigation()).await?;

        if soft(
            "all tables",
            self.page.select_option_by_label(TABLE_SELECT, &self.all_tables),
        )
        .await
        .is_none()
        {
            soft("all tables by value", self.page.select_option(TABLE_SELECT, "")).await;
        }
        self.page.click(QUERY_BUTTON).await?;
        settle(&self.page, PROCESSING, timeouts.settle()).await;
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let candidates = [
            ElementQuery::css("#btn_salvar_produto"),
            ElementQuery::css("button").with_text("Atualizar"),
            ElementQuery::css(".modal-footer button").with_text("Salvar"),
        ];
        match self.page.first_present(&candidates).await? {
            Some(i) => self.page.click(candidates[i]).await,
            None => Err(Error::NotFound("save button".into())),
        }
    }
}

#[async_trait]
impl TargetDriver for ErpDriver {
    fn target(&self) -> Target {
        Target::Erp
    }

    async fn login(&mut self) -> Result<()> {
        let erp = &self.config.erp;
        let this = &*self;
        retry_login(
            erp.login_attempts,
            Duration::from_millis(erp.retry_delay_ms),
            || this.login_once(),
        )
        .await
    }

    async fn update(&mut self, sku: &str, price: f64) -> Result<UpdateOutcome> {
        let timeouts = &self.config.timeouts;
        self.open_report().await?;

        let row = {
            let mut grid = DataTablesGrid::new(&self.page, &self.config);
            match self.locator.locate(&mut grid, sku).await? {
                Located::Found(row) => row,
                Located::NotFound => {
                    info!(sku = %sku, "SKU not present in ERP report");
                    return Ok(UpdateOutcome::Skipped);
                }
            }
        };

        let row_selector = format!("tr[{}='{}']", ROW_MARK, row.0);
        self.page
            .click(ElementQuery::css(&row_selector).child(EDIT_BUTTON))
            .await?;
        self.page
            .wait_for_selector(PRICE_INPUTS[0], ElementState::Visible, timeouts.round_trip())
            .await?;

        let text = format_br(price);
        let mut filled = 0usize;
        for input in PRICE_INPUTS {
            if self.page.exists(input).await? {
                self.page.fill(input, &text).await?;
                filled += 1;
            }
        }
        debug!(sku = %sku, price = %text, fields = filled, "Price fields filled");
        tokio::time::sleep(AFTER_FILL).await;

        self.save().await?;
        settle(&self.page, PROCESSING, timeouts.settle()).await;
        if soft(
            "info modal",
            self.page
                .wait_for_selector(INFO_MODAL_CLOSE, ElementState::Visible, timeouts.dialog()),
        )
        .await
        .is_some()
        {
            soft("dismiss info modal", self.page.click(INFO_MODAL_CLOSE)).await;
        }
        Ok(UpdateOutcome::Success)
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

    #[test]
    fn test_largest_page_size() {
        let options = vec![
            ("10".to_string(), "10".to_string()),
            ("100".to_string(), "100".to_string()),
            ("25".to_string(), "25".to_string()),
            ("-1".to_string(), "Todos".to_string()),
        ];
        assert_eq!(largest_page_size(&options), Some(("100".to_string(), 100)));
        assert_eq!(largest_page_size(&[]), None);
    }

    #[test]
    fn test_all_tables_label() {
        let re = Regex::new(r"(?i)todas\s+as\s+tabelas").unwrap();
        assert!(re.is_match("-- TODAS AS TABELAS --"));
        assert!(!re.is_match("Tabela 1"));
    }

    #[tokio::test]
    async fn test_login_retry_recovers() {
        let mut calls = 0u32;
        let result = retry_login(3, Duration::from_millis(1), || {
            calls += 1;
            let ok = calls == 2;
            async move {
                if ok {
                    Ok(())
                } else {
                    Err(Error::Timeout("operator form".into()))
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_login_retry_exhaustion() {
        let mut calls = 0u32;
        let result = retry_login(2, Duration::from_millis(1), || {
            calls += 1;
            let n = calls;
            async move { Err(Error::Timeout(format!("attempt {}", n))) }
        })
        .await;
        assert_eq!(calls, 2);
        match result {
            Err(Error::Login { target, reason }) => {
                assert_eq!(target, Target::Erp);
                assert!(reason.contains("attempt 2"));
            }
            other => panic!("expected login error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_retry_tries_at_least_once() {
        let mut calls = 0u32;
        let result = retry_login(0, Duration::from_millis(1), || {
            calls += 1;
            async { Err(Error::Timeout("login".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_api_js_targets_report_table() {
        assert!(api_js().contains("#table-relatorio-lista-prod"));
        assert!(ROWS.ends_with("tbody tr"));
    }
}
