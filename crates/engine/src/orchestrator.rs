//! Batch Orchestrator: partitions the task list, gives every batch a fresh
//! automation surface and releases it on every exit path.

use crate::pricing::{compute_final_price, price_for_target};
use async_trait::async_trait;
use futures::FutureExt;
use pricesync_core::config::{Config, PricingConfig};
use pricesync_core::{PriceQuote, Result, SkuTask, Target, UpdateOutcome};
use pricesync_storage::{AuditStatus, RunLog};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Allocates one isolated surface per batch.
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    /// A failure here aborts batch `batch_no` only.
    async fn allocate(&self, batch_no: usize) -> Result<Box<dyn BatchSurface>>;
}

/// Everything a batch needs from its surface: a price source and the three
/// writable targets.
#[async_trait]
pub trait BatchSurface: Send {
    async fn quote(&mut self, task: &SkuTask) -> Result<PriceQuote>;

    /// Never fails; errors are already folded into the outcome.
    async fn update(&mut self, target: Target, sku: &str, price: f64) -> UpdateOutcome;

    /// Close every session and destroy the surface.
    async fn release(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub ok: usize,
    pub failed: usize,
    pub ignored: usize,
    pub total: usize,
}

impl Summary {
    fn count(&mut self, status: AuditStatus) {
        self.total += 1;
        match status {
            AuditStatus::Ok | AuditStatus::OkPartial => self.ok += 1,
            AuditStatus::ErrorPartial => self.failed += 1,
            AuditStatus::Ignored => self.ignored += 1,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Summary: OK={} | Failed={} | Ignored={} | Total={}",
            self.ok, self.failed, self.ignored, self.total
        )
    }
}

/// Composite status from the three write outcomes. Commerce is the only
/// target allowed to stay unconfirmed.
pub fn composite_status(erp: UpdateOutcome, commerce: UpdateOutcome, portal: UpdateOutcome) -> AuditStatus {
    if erp.is_success() && portal.is_success() {
        match commerce {
            UpdateOutcome::Success => AuditStatus::Ok,
            UpdateOutcome::Skipped => AuditStatus::OkPartial,
            UpdateOutcome::Failed => AuditStatus::ErrorPartial,
        }
    } else {
        AuditStatus::ErrorPartial
    }
}

pub struct Orchestrator {
    factory: Arc<dyn SurfaceFactory>,
    batch_size: usize,
    settle_pause: Duration,
    quote_budget: Duration,
    pricing: PricingConfig,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn SurfaceFactory>, config: &Config) -> Self {
        Self {
            factory,
            batch_size: config.batch.size.max(1),
            settle_pause: Duration::from_millis(config.batch.settle_pause_ms),
            quote_budget: config.timeouts.default_timeout(),
            pricing: config.pricing.clone(),
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_settle_pause(mut self, pause: Duration) -> Self {
        self.settle_pause = pause;
        self
    }

    /// Process every task and record exactly one audit entry per task.
    pub async fn run(&self, tasks: &[SkuTask], log: &mut RunLog) -> Summary {
        let mut summary = Summary::default();
        let batches = tasks.len().div_ceil(self.batch_size);
        info!(
            tasks = tasks.len(),
            batches = batches,
            batch_size = self.batch_size,
            "Run started"
        );

        for (i, batch) in tasks.chunks(self.batch_size).enumerate() {
            let batch_no = i + 1;
            let started = Instant::now();
            info!(batch = batch_no, of = batches, size = batch.len(), "Batch started");

            self.run_batch(batch_no, batch, log, &mut summary).await;

            info!(
                batch = batch_no,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Batch finished"
            );
            if batch_no < batches && !self.settle_pause.is_zero() {
                tokio::time::sleep(self.settle_pause).await;
            }
        }

        info!(
            ok = summary.ok,
            failed = summary.failed,
            ignored = summary.ignored,
            total = summary.total,
            "Run finished"
        );
        summary
    }

    async fn run_batch(&self, batch_no: usize, tasks: &[SkuTask], log: &mut RunLog, summary: &mut Summary) {
        let mut surface = match self.factory.allocate(batch_no).await {
            Ok(surface) => surface,
            Err(e) => {
                error!(batch = batch_no, error = %e, "Batch aborted, surface unavailable");
                for task in tasks {
                    record(log, summary, task, None, AuditStatus::ErrorPartial);
                }
                return;
            }
        };

        let mut done = 0usize;
        let processed = AssertUnwindSafe(async {
            for task in tasks {
                let started = Instant::now();
                let (price, status) = self.process(surface.as_mut(), task).await;
                info!(
                    batch = batch_no,
                    sku = %task.sku,
                    status = %status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "SKU processed"
                );
                record(log, summary, task, price, status);
                done += 1;
            }
        })
        .catch_unwind()
        .await;

        if processed.is_err() {
            error!(batch = batch_no, processed = done, "Batch processing panicked");
            for task in &tasks[done..] {
                record(log, summary, task, None, AuditStatus::ErrorPartial);
            }
        }

        surface.release().await;
    }

    async fn process(&self, surface: &mut dyn BatchSurface, task: &SkuTask) -> (Option<f64>, AuditStatus) {
        let quote = match tokio::time::timeout(self.quote_budget, surface.quote(task)).await {
            Ok(Ok(quote)) => quote,
            Ok(Err(e)) => {
                warn!(sku = %task.sku, error = %e, "Quote failed");
                return (None, AuditStatus::ErrorPartial);
            }
            Err(_) => {
                warn!(sku = %task.sku, "Quote timed out");
                return (None, AuditStatus::ErrorPartial);
            }
        };

        let Some(base_price) = quote.base_price else {
            info!(sku = %task.sku, "No price upstream, ignored");
            return (None, AuditStatus::Ignored);
        };
        let final_price = compute_final_price(base_price, task.markup_percent);
        info!(
            sku = %task.sku,
            base_price = base_price,
            markup = task.markup_percent,
            final_price = final_price,
            confidence = quote.match_confidence,
            "Price computed"
        );

        let mut outcomes = [UpdateOutcome::Skipped; 3];
        for (slot, target) in outcomes.iter_mut().zip(Target::WRITABLE) {
            let price = price_for_target(&self.pricing, target, base_price, task.markup_percent);
            *slot = surface.update(target, &task.sku, price).await;
        }
        let [erp, commerce, portal] = outcomes;
        (Some(final_price), composite_status(erp, commerce, portal))
    }
}

fn record(log: &mut RunLog, summary: &mut Summary, task: &SkuTask, price: Option<f64>, status: AuditStatus) {
    summary.count(status);
    if let Err(e) = log.record(&task.sku, &task.display_name, price, status) {
        error!(sku = %task.sku, path = %log.path().display(), error = %e, "Audit write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricesync_core::Error;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Script {
        /// Base price per SKU; absent means no result upstream.
        prices: HashMap<String, f64>,
        quote_errors: HashSet<String>,
        panics: HashSet<String>,
        outcomes: HashMap<Target, UpdateOutcome>,
    }

    struct FakeFactory {
        script: Arc<Script>,
        fail_batches: Vec<usize>,
        allocations: Mutex<Vec<usize>>,
        releases: Arc<AtomicUsize>,
        writes: Arc<Mutex<Vec<(Target, String, f64)>>>,
    }

    impl FakeFactory {
        fn new(script: Script) -> Self {
            Self {
                script: Arc::new(script),
                fail_batches: Vec::new(),
                allocations: Mutex::new(Vec::new()),
                releases: Arc::new(AtomicUsize::new(0)),
                writes: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl SurfaceFactory for FakeFactory {
        async fn allocate(&self, batch_no: usize) -> Result<Box<dyn BatchSurface>> {
            self.allocations.lock().unwrap().push(batch_no);
            if self.fail_batches.contains(&batch_no) {
                return Err(Error::Surface("browser did not start".into()));
            }
            Ok(Box::new(FakeSurface {
                script: self.script.clone(),
                releases: self.releases.clone(),
                writes: self.writes.clone(),
            }))
        }
    }

    struct FakeSurface {
        script: Arc<Script>,
        releases: Arc<AtomicUsize>,
        writes: Arc<Mutex<Vec<(Target, String, f64)>>>,
    }

    #[async_trait]
    impl BatchSurface for FakeSurface {
        async fn quote(&mut self, task: &SkuTask) -> Result<PriceQuote> {
            if self.script.panics.contains(&task.sku) {
                panic!("tab crashed");
            }
            if self.script.quote_errors.contains(&task.sku) {
                return Err(Error::Timeout("cards".into()));
            }
            Ok(match self.script.prices.get(&task.sku) {
                Some(p) => PriceQuote::found(&task.sku, *p, 1.0),
                None => PriceQuote::not_found(&task.sku),
            })
        }

        async fn update(&mut self, target: Target, sku: &str, price: f64) -> UpdateOutcome {
            self.writes
                .lock()
                .unwrap()
                .push((target, sku.to_string(), price));
            self.script
                .outcomes
                .get(&target)
                .copied()
                .unwrap_or(UpdateOutcome::Success)
        }

        async fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tasks(n: usize) -> Vec<SkuTask> {
        (0..n)
            .map(|i| SkuTask::new(format!("SKU{}", i), format!("Produto {}", i), 33.0))
            .collect()
    }

    fn all_priced(tasks: &[SkuTask]) -> Script {
        Script {
            prices: tasks.iter().map(|t| (t.sku.clone(), 7.43)).collect(),
            ..Default::default()
        }
    }

    fn orchestrator(factory: Arc<FakeFactory>, batch_size: usize) -> Orchestrator {
        Orchestrator::new(factory, &Config::default())
            .with_batch_size(batch_size)
            .with_settle_pause(Duration::ZERO)
    }

    #[test]
    fn test_composite_status() {
        use UpdateOutcome::*;
        assert_eq!(composite_status(Success, Success, Success), AuditStatus::Ok);
        assert_eq!(composite_status(Success, Skipped, Success), AuditStatus::OkPartial);
        assert_eq!(composite_status(Success, Failed, Success), AuditStatus::ErrorPartial);
        assert_eq!(composite_status(Skipped, Success, Success), AuditStatus::ErrorPartial);
        assert_eq!(composite_status(Success, Success, Failed), AuditStatus::ErrorPartial);
    }

    #[test]
    fn test_summary_display() {
        let summary = Summary {
            ok: 3,
            failed: 1,
            ignored: 2,
            total: 6,
        };
        assert_eq!(
            summary.to_string(),
            "Summary: OK=3 | Failed=1 | Ignored=2 | Total=6"
        );
    }

    #[tokio::test]
    async fn test_every_task_recorded_once() {
        let dir = TempDir::new().unwrap();
        let input = tasks(7);
        let mut script = all_priced(&input);
        script.prices.remove("SKU2");
        script.quote_errors.insert("SKU4".into());
        let factory = Arc::new(FakeFactory::new(script));
        let mut log = RunLog::create(dir.path()).unwrap();

        let summary = orchestrator(factory.clone(), 3).run(&input, &mut log).await;

        let on_disk = RunLog::read(log.path()).unwrap();
        assert_eq!(on_disk.len(), input.len());
        let logged: HashSet<&str> = on_disk.iter().map(|r| r.sku.as_str()).collect();
        let expected: HashSet<&str> = input.iter().map(|t| t.sku.as_str()).collect();
        assert_eq!(logged, expected);

        assert_eq!(
            summary,
            Summary {
                ok: 5,
                failed: 1,
                ignored: 1,
                total: 7
            }
        );
        assert_eq!(*factory.allocations.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(factory.releases.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_allocation_isolated_to_its_batch() {
        let dir = TempDir::new().unwrap();
        let input = tasks(9);
        let mut factory = FakeFactory::new(all_priced(&input));
        factory.fail_batches = vec![2];
        let factory = Arc::new(factory);
        let mut log = RunLog::create(dir.path()).unwrap();

        let summary = orchestrator(factory.clone(), 3).run(&input, &mut log).await;

        assert_eq!(*factory.allocations.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(factory.releases.load(Ordering::SeqCst), 2);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.ok, 6);

        let failed: Vec<(String, Option<f64>)> = log
            .records()
            .iter()
            .filter(|r| r.status == AuditStatus::ErrorPartial)
            .map(|r| (r.sku.clone(), r.final_price))
            .collect();
        assert_eq!(
            failed,
            vec![
                ("SKU3".to_string(), None),
                ("SKU4".to_string(), None),
                ("SKU5".to_string(), None)
            ]
        );
        let written: HashSet<String> = factory
            .writes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, sku, _)| sku.clone())
            .collect();
        assert!(!written.contains("SKU4"));
        assert!(written.contains("SKU7"));
    }

    #[tokio::test]
    async fn test_panic_releases_surface_and_records_rest() {
        let dir = TempDir::new().unwrap();
        let input = tasks(4);
        let mut script = all_priced(&input);
        script.panics.insert("SKU1".into());
        let factory = Arc::new(FakeFactory::new(script));
        let mut log = RunLog::create(dir.path()).unwrap();

        let summary = orchestrator(factory.clone(), 2).run(&input, &mut log).await;

        assert_eq!(factory.releases.load(Ordering::SeqCst), 2);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.failed, 1);
        let statuses: Vec<(String, AuditStatus)> = log
            .records()
            .iter()
            .map(|r| (r.sku.clone(), r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("SKU0".to_string(), AuditStatus::Ok),
                ("SKU1".to_string(), AuditStatus::ErrorPartial),
                ("SKU2".to_string(), AuditStatus::Ok),
                ("SKU3".to_string(), AuditStatus::Ok),
            ]
        );
    }

    #[tokio::test]
    async fn test_one_write_per_target_with_final_price() {
        let dir = TempDir::new().unwrap();
        let input = tasks(1);
        let mut script = all_priced(&input);
        script.outcomes.insert(Target::Commerce, UpdateOutcome::Skipped);
        let factory = Arc::new(FakeFactory::new(script));
        let mut log = RunLog::create(dir.path()).unwrap();

        orchestrator(factory.clone(), 10).run(&input, &mut log).await;

        let writes = factory.writes.lock().unwrap().clone();
        assert_eq!(
            writes,
            vec![
                (Target::Erp, "SKU0".to_string(), 9.88),
                (Target::Commerce, "SKU0".to_string(), 9.88),
                (Target::Portal, "SKU0".to_string(), 9.88),
            ]
        );
        assert_eq!(log.records()[0].status, AuditStatus::OkPartial);
        assert_eq!(log.records()[0].final_price, Some(9.88));
    }

    #[tokio::test]
    async fn test_ignored_sku_is_never_written() {
        let dir = TempDir::new().unwrap();
        let input = tasks(2);
        let factory = Arc::new(FakeFactory::new(Script::default()));
        let mut log = RunLog::create(dir.path()).unwrap();

        let summary = orchestrator(factory.clone(), 10).run(&input, &mut log).await;

        assert_eq!(summary.ignored, 2);
        assert!(factory.writes.lock().unwrap().is_empty());
        assert!(log.records().iter().all(|r| r.final_price.is_none()));
    }
}
