use serde::{Deserialize, Serialize};
use std::fmt;

/// One SKU to synchronize, as supplied by the product feed. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuTask {
    pub sku: String,
    pub display_name: String,
    #[serde(default)]
    pub markup_percent: f64,
}

impl SkuTask {
    pub fn new(sku: impl Into<String>, display_name: impl Into<String>, markup_percent: f64) -> Self {
        Self {
            sku: sku.into(),
            display_name: display_name.into(),
            markup_percent,
        }
    }
}

/// Output of the price matcher. `base_price == None` means the source has no
/// usable result for this SKU; nothing is written anywhere in that case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub sku: String,
    pub base_price: Option<f64>,
    pub match_confidence: f64,
}

impl PriceQuote {
    pub fn found(sku: impl Into<String>, base_price: f64, match_confidence: f64) -> Self {
        Self {
            sku: sku.into(),
            base_price: Some(base_price),
            match_confidence,
        }
    }

    pub fn not_found(sku: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            base_price: None,
            match_confidence: 0.0,
        }
    }
}

/// The four systems kept in price sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Public storefront, read-only price source.
    Source,
    Erp,
    Commerce,
    Portal,
}

impl Target {
    /// Targets that receive price writes, in write order.
    pub const WRITABLE: [Target; 3] = [Target::Erp, Target::Commerce, Target::Portal];

    pub fn name(&self) -> &'static str {
        match self {
            Target::Source => "source",
            Target::Erp => "erp",
            Target::Commerce => "commerce",
            Target::Portal => "portal",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one price write against one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    Success,
    Failed,
    /// Target unavailable, or the record does not exist there.
    Skipped,
}

impl UpdateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateOutcome::Success)
    }
}
