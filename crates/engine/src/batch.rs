//! Browser-backed batch surface: one automation surface, four tabs.

use crate::orchestrator::{BatchSurface, SurfaceFactory};
use crate::targets::{
    CommerceDriver, ErpDriver, PortalDriver, SessionState, SourceSession, TargetDriver, TargetSession,
};
use async_trait::async_trait;
use pricesync_browser::{AutomationSurface, LaunchOptions, Page};
use pricesync_core::config::Config;
use pricesync_core::{Error, PriceQuote, Result, SkuTask, Target, UpdateOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct BrowserSurfaceFactory {
    config: Arc<Config>,
    launch: LaunchOptions,
}

impl BrowserSurfaceFactory {
    pub fn new(config: Arc<Config>, launch: LaunchOptions) -> Self {
        Self { config, launch }
    }
}

#[async_trait]
impl SurfaceFactory for BrowserSurfaceFactory {
    async fn allocate(&self, batch_no: usize) -> Result<Box<dyn BatchSurface>> {
        let mut surface = AutomationSurface::launch(&self.launch).await?;
        info!(batch = batch_no, port = surface.debug_port(), "Surface allocated");
        match BrowserBatch::open(&mut surface, self.config.clone()).await {
            Ok(sessions) => Ok(Box::new(BrowserBatch { surface, sessions })),
            Err(e) => {
                surface.close().await;
                Err(e)
            }
        }
    }
}

struct Sessions {
    config: Arc<Config>,
    source: SourceSession,
    erp: TargetSession<ErpDriver>,
    commerce: TargetSession<CommerceDriver>,
    portal: TargetSession<PortalDriver>,
}

pub struct BrowserBatch {
    surface: AutomationSurface,
    sessions: Sessions,
}

async fn open_page(surface: &mut AutomationSurface, target: Target) -> Result<Page> {
    surface
        .new_page()
        .await
        .map_err(|e| Error::Surface(format!("could not open {} tab: {}", target, e)))
}

/// Log in, leaving the session `Broken` on failure.
async fn login_or_break<D: TargetDriver>(session: &mut TargetSession<D>) {
    if let Err(e) = session.login().await {
        warn!(target = %session.target(), error = %e, "Target unavailable for this batch");
    }
}

impl BrowserBatch {
    /// Open one tab per target and log every session in. Only a failed
    /// source login is fatal: without prices nothing can be written.
    async fn open(surface: &mut AutomationSurface, config: Arc<Config>) -> Result<Sessions> {
        let mut source = SourceSession::new(open_page(surface, Target::Source).await?, config.clone());
        let mut erp = TargetSession::new(ErpDriver::new(
            open_page(surface, Target::Erp).await?,
            config.clone(),
        )?);
        let mut commerce = TargetSession::new(CommerceDriver::new(
            open_page(surface, Target::Commerce).await?,
            config.clone(),
        ));
        let mut portal = TargetSession::new(PortalDriver::new(
            open_page(surface, Target::Portal).await?,
            config.clone(),
        ));

        source
            .login()
            .await
            .map_err(|e| Error::Surface(format!("price source unavailable: {}", e)))?;
        login_or_break(&mut erp).await;
        login_or_break(&mut commerce).await;
        login_or_break(&mut portal).await;

        let ready = [erp.state(), commerce.state(), portal.state()]
            .iter()
            .filter(|s| **s == SessionState::Ready)
            .count();
        info!(ready = ready, of = Target::WRITABLE.len(), "Sessions logged in");

        Ok(Sessions {
            config,
            source,
            erp,
            commerce,
            portal,
        })
    }

    fn update_budget(&self) -> Duration {
        self.sessions.config.timeouts.default_timeout()
    }
}

#[async_trait]
impl BatchSurface for BrowserBatch {
    async fn quote(&mut self, task: &SkuTask) -> Result<PriceQuote> {
        if self.sessions.source.is_closed() {
            warn!(sku = %task.sku, "Source tab is gone, opening a new one");
            let page = open_page(&mut self.surface, Target::Source).await?;
            self.sessions.source.replace_page(page);
            self.sessions.source.login().await?;
        }
        self.sessions.source.quote(task).await
    }

    async fn update(&mut self, target: Target, sku: &str, price: f64) -> UpdateOutcome {
        let budget = self.update_budget();
        let sessions = &mut self.sessions;
        match target {
            Target::Erp => sessions.erp.update(sku, price, budget).await,
            Target::Commerce => sessions.commerce.update(sku, price, budget).await,
            Target::Portal => sessions.portal.update(sku, price, budget).await,
            Target::Source => UpdateOutcome::Skipped,
        }
    }

    async fn release(&mut self) {
        let sessions = &mut self.sessions;
        sessions.source.close().await;
        sessions.erp.close().await;
        sessions.commerce.close().await;
        sessions.portal.close().await;
        self.surface.close().await;
    }
}
