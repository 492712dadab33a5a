//! Wallet-facing facade over the read and withdrawal pipelines.
//!
//! Owns the shared ledger, price and registry handles and wires them into
//! each component so callers deal with one object.

use std::sync::Arc;

use crate::activity::{ActivityReconstructor, TokenActivity};
use crate::classify::classify;
use crate::error::{AggregationError, WithdrawalError};
use crate::holdings::{BalanceAggregator, TokenAsset};
use crate::metrics::Metrics;
use crate::price::PriceSource;
use crate::registry::AssetRegistry;
use crate::relay::SigningRelay;
use crate::solana_client::LedgerRpc;
use crate::transfer::{PriorityFee, TransferBuilder, WithdrawalRequest};
use crate::withdrawal::{PollConfig, WalletSigner, WithdrawalOutcome, WithdrawalPipeline};
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

#[derive(Clone)]
pub struct WalletService {
	holdings: BalanceAggregator,
	activity: ActivityReconstructor,
	builder: TransferBuilder,
	pipeline: WithdrawalPipeline,
	metrics: Option<Arc<Metrics>>,
}

pub struct WalletServiceParts {
	pub ledger: Arc<dyn LedgerRpc>,
	pub prices: Arc<dyn PriceSource>,
	pub relay: Arc<dyn SigningRelay>,
	pub registry: Arc<AssetRegistry>,
	pub relay_fee_payer: Pubkey,
	pub priority: PriorityFee,
	pub poll: PollConfig,
}

impl WalletService {
	pub fn new(parts: WalletServiceParts) -> Self {
		let WalletServiceParts { ledger, prices, relay, registry, relay_fee_payer, priority, poll } = parts;
		Self {
			holdings: BalanceAggregator::new(ledger.clone(), prices.clone(), registry.clone()),
			activity: ActivityReconstructor::new(ledger.clone(), prices, registry.clone()),
			builder: TransferBuilder::new(ledger.clone(), registry, priority),
			pipeline: WithdrawalPipeline::new(ledger, relay, relay_fee_payer, poll),
			metrics: None,
		}
	}

	pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
		self.pipeline = self.pipeline.with_metrics(metrics.clone());
		self.metrics = Some(metrics);
		self
	}

	pub async fn list_holdings(&self, wallet_address: &str) -> Result<Vec<TokenAsset>, AggregationError> {
		if let Some(m) = &self.metrics {
			m.holdings_queries.inc();
		}
		self.holdings.list_holdings(wallet_address).await
	}

	pub async fn list_activity(&self, wallet_address: &str, window_size: usize) -> Result<Vec<TokenActivity>, AggregationError> {
		if let Some(m) = &self.metrics {
			m.activity_queries.inc();
		}
		self.activity.list_activity(wallet_address, window_size).await
	}

	/// Builds and submits a withdrawal from the signer's wallet. Build
	/// failures are classified the same way as submission failures.
	pub async fn withdraw(&self, request: &WithdrawalRequest, signer: WalletSigner) -> WithdrawalOutcome {
		let sender = signer.pubkey().to_string();
		let plan = match self.builder.build_transfer(request, &sender).await {
			Ok(plan) => plan,
			Err(e) => {
				let err = WithdrawalError::from(e);
				let classified = classify(&err);
				warn!(category = classified.category.as_str(), error = %err, "withdrawal rejected before signing");
				if let Some(m) = &self.metrics {
					m.withdrawals_failed.with_label_values(&[classified.category.as_str()]).inc();
				}
				return WithdrawalOutcome::Failed { category: classified.category, message: classified.message, signature: None };
			}
		};
		info!(
			asset = %request.asset_address,
			raw_amount = plan.raw_amount,
			setup_fee = plan.setup_fee,
			requires_new_account = plan.requires_new_account,
			"withdrawal built"
		);
		self.pipeline.execute(&plan, signer).await
	}
}
