use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::PriceError;

/// Resolves an asset address to a current USD unit price.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
	async fn get_unit_price(&self, asset_address: &str) -> Result<Decimal, PriceError>;
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
	data: HashMap<String, Option<PriceEntry>>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
	price: Decimal,
}

/// HTTP client for `GET <oracle>?ids=<asset>`. One request per call, no
/// caching and no retries.
#[derive(Clone)]
pub struct PriceOracleClient {
	client: Client,
	base_url: String,
}

impl PriceOracleClient {
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PriceError> {
		let client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| PriceError::Upstream(format!("failed to create HTTP client: {e}")))?;
		Ok(Self { client, base_url: base_url.to_string() })
	}
}

#[async_trait]
impl PriceSource for PriceOracleClient {
	async fn get_unit_price(&self, asset_address: &str) -> Result<Decimal, PriceError> {
		if asset_address.is_empty() {
			return Err(PriceError::InvalidInput);
		}
		debug!(asset = %asset_address, "fetching unit price");
		let resp = self
			.client
			.get(&self.base_url)
			.query(&[("ids", asset_address)])
			.send()
			.await
			.map_err(|e| PriceError::Upstream(e.to_string()))?;
		if !resp.status().is_success() {
			return Err(PriceError::Upstream(format!("price oracle returned {}", resp.status())));
		}
		let body: PriceResponse = resp.json().await.map_err(|e| PriceError::Upstream(format!("invalid price payload: {e}")))?;
		body.data
			.get(asset_address)
			.and_then(|entry| entry.as_ref())
			.map(|entry| entry.price)
			.ok_or_else(|| PriceError::NotFound(asset_address.to_string()))
	}
}
