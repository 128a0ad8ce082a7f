use chrono::{Local, NaiveDate};
use pricesync_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Terminal outcome of one SKU in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditStatus {
    /// Every target confirmed the write.
    #[serde(rename = "OK")]
    Ok,
    /// ERP and portal confirmed; the commerce write could not be confirmed.
    #[serde(rename = "OK_PARTIAL")]
    OkPartial,
    #[serde(rename = "ERROR_PARTIAL")]
    ErrorPartial,
    /// No base price upstream; nothing was written.
    #[serde(rename = "IGNORED")]
    Ignored,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Ok => "OK",
            AuditStatus::OkPartial => "OK_PARTIAL",
            AuditStatus::ErrorPartial => "ERROR_PARTIAL",
            AuditStatus::Ignored => "IGNORED",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of the run log array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub sku: String,
    #[serde(rename = "produto")]
    pub display_name: String,
    #[serde(rename = "preco")]
    pub final_price: Option<f64>,
    pub status: AuditStatus,
    /// Wall-clock time of the append, `HH:MM:SS`.
    #[serde(rename = "hora")]
    pub time: String,
}

/// Per-run audit file: a JSON array rewritten in full on every append.
pub struct RunLog {
    path: PathBuf,
    records: Vec<AuditRecord>,
}

impl RunLog {
    /// Start today's next run log in `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        Self::create_for_date(dir, Local::now().date_naive())
    }

    /// Claim `<date>_<n>.json` with the smallest free `n >= 1`.
    pub fn create_for_date(dir: &Path, date: NaiveDate) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let prefix = date.format("%Y-%m-%d").to_string();

        for n in 1u32.. {
            let path = dir.join(format!("{}_{}.json", prefix, n));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    let log = Self {
                        path,
                        records: Vec::new(),
                    };
                    log.persist()?;
                    debug!(path = %log.path.display(), "Run log created");
                    return Ok(log);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Storage("no free run log slot".into()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    /// Append one record stamped with the current time.
    pub fn record(
        &mut self,
        sku: &str,
        display_name: &str,
        final_price: Option<f64>,
        status: AuditStatus,
    ) -> Result<()> {
        self.append(AuditRecord {
            sku: sku.to_string(),
            display_name: display_name.to_string(),
            final_price,
            status,
            time: Local::now().format("%H:%M:%S").to_string(),
        })
    }

    pub fn append(&mut self, record: AuditRecord) -> Result<()> {
        // Re-read so anything already on disk survives even if this process
        // lost track of it.
        let mut on_disk = match Self::read(&self.path) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Run log unreadable, rewriting from memory");
                self.records.clone()
            }
        };
        // Records whose write failed are only held in memory.
        if on_disk.len() < self.records.len() {
            let pending = &self.records[on_disk.len()..];
            debug!(pending = pending.len(), "Restoring unwritten records");
            on_disk.extend_from_slice(pending);
        }
        on_disk.push(record);
        self.records = on_disk;
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Vec<AuditRecord>> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Run logs in `dir`, oldest first.
    pub fn list(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut logs: Vec<((NaiveDate, u32), PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let key = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_log_name);
            if let Some(key) = key {
                logs.push((key, path));
            }
        }
        logs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(logs.into_iter().map(|(_, path)| path).collect())
    }

    pub fn latest(dir: &Path) -> Result<Option<PathBuf>> {
        Ok(Self::list(dir)?.pop())
    }
}

/// `2026-10-16_3.json` -> (date, 3)
fn parse_log_name(name: &str) -> Option<(NaiveDate, u32)> {
    let stem = name.strip_suffix(".json")?;
    let (date, n) = stem.rsplit_once('_')?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let n = n.parse().ok()?;
    Some((date, n))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// `OK` plus `OK_PARTIAL`.
    pub ok: usize,
    pub partial: usize,
    pub failed: usize,
    pub ignored: usize,
    pub total: usize,
}

impl RunSummary {
    pub fn from_records(records: &[AuditRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total += 1;
            match record.status {
                AuditStatus::Ok => summary.ok += 1,
                AuditStatus::OkPartial => {
                    summary.ok += 1;
                    summary.partial += 1;
                }
                AuditStatus::ErrorPartial => summary.failed += 1,
                AuditStatus::Ignored => summary.ignored += 1,
            }
        }
        summary
    }
}
