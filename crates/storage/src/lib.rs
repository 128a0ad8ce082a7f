pub mod audit;

pub use audit::{AuditRecord, AuditStatus, RunLog, RunSummary};
