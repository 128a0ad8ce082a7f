//! Product feed: the SKU list with per-SKU markup.

use pricesync_core::{Error, Result, SkuTask};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    products: Vec<FeedProduct>,
}

#[derive(Debug, Deserialize)]
struct FeedProduct {
    #[serde(default)]
    sku: Value,
    #[serde(default)]
    nome: Value,
    #[serde(default)]
    incremento_preco: Value,
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Markup as a number or numeric string; anything else counts as 0.
fn markup_of(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().replace(',', ".").parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Parse a feed document into tasks, dropping entries without SKU or name.
pub fn parse_feed(body: &str) -> Result<Vec<SkuTask>> {
    let response: FeedResponse =
        serde_json::from_str(body).map_err(|e| Error::Feed(format!("invalid feed JSON: {}", e)))?;
    if !response.success {
        return Err(Error::Feed("feed reported success=false".into()));
    }

    let mut dropped = 0usize;
    let tasks: Vec<SkuTask> = response
        .products
        .iter()
        .filter_map(|p| {
            let sku = text_of(&p.sku);
            let name = text_of(&p.nome);
            if sku.is_empty() || name.is_empty() {
                dropped += 1;
                return None;
            }
            Some(SkuTask::new(sku, name, markup_of(&p.incremento_preco)))
        })
        .collect();

    if dropped > 0 {
        warn!(dropped = dropped, "Feed entries without sku or name were discarded");
    }
    Ok(tasks)
}

pub struct ProductFeed {
    client: reqwest::Client,
    url: String,
}

impl ProductFeed {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(Error::Config("feed.url is not set".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.trim().to_string(),
        })
    }

    pub async fn fetch(&self) -> Result<Vec<SkuTask>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Feed(format!("request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Feed(format!("feed returned HTTP {}", status)));
        }
        let body = response
            .text()
            .await
            .map_err(|e| Error::Feed(format!("failed to read body: {}", e)))?;
        let tasks = parse_feed(&body)?;
        info!(count = tasks.len(), "Products loaded from feed");
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feed_trims_and_filters() {
        let body = r#"{
          "success": true,
          "products": [
            {"sku": " 7891 ", "nome": " Feijão Carioca 1kg ", "incremento_preco": 33},
            {"sku": "", "nome": "Sem SKU", "incremento_preco": 10},
            {"sku": "7892", "nome": "   "},
            {"sku": 7893, "nome": "Arroz", "incremento_preco": "12,5"},
            {"sku": "7894", "nome": "Óleo", "incremento_preco": null}
          ]
        }"#;
        let tasks = parse_feed(body).unwrap();
        assert_eq!(
            tasks,
            vec![
                SkuTask::new("7891", "Feijão Carioca 1kg", 33.0),
                SkuTask::new("7893", "Arroz", 12.5),
                SkuTask::new("7894", "Óleo", 0.0),
            ]
        );
    }

    #[test]
    fn test_parse_feed_rejects_unsuccessful() {
        let err = parse_feed(r#"{"success": false, "products": []}"#).unwrap_err();
        assert!(matches!(err, Error::Feed(_)));
        assert!(parse_feed("not json").is_err());
    }

    #[test]
    fn test_missing_products_is_empty() {
        assert!(parse_feed(r#"{"success": true}"#).unwrap().is_empty());
    }

    #[test]
    fn test_new_requires_url() {
        assert!(ProductFeed::new("  ", Duration::from_secs(1)).is_err());
    }
}
