//! REST fallback for the commerce platform's product catalog.

use crate::pricing::format_plain;
use async_trait::async_trait;
use pricesync_core::config::CommerceApiConfig;
use pricesync_core::{Error, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const API_PREFIX: &str = "wp-json/wc/v3";

/// Product catalog reachable without the admin UI.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Product id for `sku`, `None` when the catalog has no such product.
    async fn find_product_id(&self, sku: &str) -> Result<Option<u64>>;

    async fn set_regular_price(&self, product_id: u64, price: f64) -> Result<()>;
}

pub struct CommerceApi {
    client: reqwest::Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
}

impl CommerceApi {
    pub fn new(config: &CommerceApiConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::Config("commerce.api.baseUrl is not set".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_PREFIX, path)
    }
}

#[async_trait]
impl Catalog for CommerceApi {
    async fn find_product_id(&self, sku: &str) -> Result<Option<u64>> {
        let response = self
            .client
            .get(self.endpoint("products"))
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .query(&[("sku", sku)])
            .send()
            .await
            .map_err(|e| Error::Http(format!("product lookup failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("product lookup returned HTTP {}", status)));
        }
        let products: Vec<Value> = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("invalid product lookup body: {}", e)))?;
        first_product_id(&products)
    }

    async fn set_regular_price(&self, product_id: u64, price: f64) -> Result<()> {
        let body = json!({"regular_price": format_plain(price)});
        debug!(product_id = product_id, body = %body, "Writing price via REST");
        let response = self
            .client
            .put(self.endpoint(&format!("products/{}", product_id)))
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("price write failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("price write returned HTTP {}", status)));
        }
        Ok(())
    }
}

/// A listed product without a numeric id exists but cannot be written.
fn first_product_id(products: &[Value]) -> Result<Option<u64>> {
    let Some(product) = products.first() else {
        return Ok(None);
    };
    product
        .get("id")
        .and_then(Value::as_u64)
        .map(Some)
        .ok_or_else(|| Error::Http("product lookup returned a product without an id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> CommerceApiConfig {
        CommerceApiConfig {
            base_url: base_url.into(),
            consumer_key: "ck".into(),
            consumer_secret: "cs".into(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_endpoint_building() {
        let api = CommerceApi::new(&config("https://store.example.com/")).unwrap();
        assert_eq!(
            api.endpoint("products/42"),
            "https://store.example.com/wp-json/wc/v3/products/42"
        );
    }

    #[test]
    fn test_requires_base_url() {
        assert!(CommerceApi::new(&config(" ")).is_err());
    }

    #[test]
    fn test_first_product_id() {
        assert_eq!(
            first_product_id(&[json!({"id": 42}), json!({"id": 7})]).unwrap(),
            Some(42)
        );
        assert_eq!(first_product_id(&[]).unwrap(), None);
    }

    #[test]
    fn test_product_without_id_is_an_error() {
        assert!(first_product_id(&[json!({"name": "no id"})]).is_err());
        assert!(first_product_id(&[json!({"id": "42"})]).is_err());
    }
}
