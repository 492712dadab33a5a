use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::RelayError;

/// Backend service that countersigns a partially-signed transaction as fee
/// payer. It is handed only locally built, locally validated transactions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SigningRelay: Send + Sync {
	/// Takes and returns a base64 wire transaction.
	async fn countersign(&self, serialized_transaction: String) -> Result<String, RelayError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SignTransactionBody {
	serialized_transaction: String,
}

#[derive(Clone)]
pub struct HttpSigningRelay {
	client: Client,
	endpoint: String,
}

impl HttpSigningRelay {
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RelayError> {
		let client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| RelayError::Transport(format!("failed to create HTTP client: {e}")))?;
		let endpoint = format!("{}/wallet/sign-transaction", base_url.trim_end_matches('/'));
		Ok(Self { client, endpoint })
	}
}

#[async_trait]
impl SigningRelay for HttpSigningRelay {
	async fn countersign(&self, serialized_transaction: String) -> Result<String, RelayError> {
		let resp = self
			.client
			.post(&self.endpoint)
			.json(&SignTransactionBody { serialized_transaction })
			.send()
			.await
			.map_err(|e| RelayError::Transport(e.to_string()))?;
		let status = resp.status();
		if !status.is_success() {
			let body = resp.text().await.unwrap_or_default();
			return Err(RelayError::Status { status: status.as_u16(), body });
		}
		let body: SignTransactionBody = resp.json().await.map_err(|e| RelayError::Decode(e.to_string()))?;
		Ok(body.serialized_transaction)
	}
}
