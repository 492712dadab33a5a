//! Reconstructs a credit/debit ledger for a wallet from its most recent
//! transactions by diffing pre/post balances.

use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::AggregationError;
use crate::holdings::{price_assets, to_decimal_amount, usd_value};
use crate::price::PriceSource;
use crate::registry::{AssetRegistry, NATIVE_ASSET_ADDRESS, NATIVE_DECIMALS};
use crate::solana_client::{LedgerEntry, LedgerRpc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
	Credited,
	Withdrawn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenActivity {
	pub direction: Direction,
	/// Absolute value of the balance delta, never zero.
	pub amount: Decimal,
	pub usd_value: Decimal,
	pub asset_address: String,
	pub symbol: String,
	pub icon_ref: Option<String>,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	pub entry_reference: String,
}

/// Signed balance change for one asset in one entry, before pricing.
#[derive(Debug, Clone, PartialEq)]
struct Delta {
	asset_address: String,
	amount: Decimal,
	timestamp: OffsetDateTime,
	entry_reference: String,
}

#[derive(Clone)]
pub struct ActivityReconstructor {
	ledger: Arc<dyn LedgerRpc>,
	prices: Arc<dyn PriceSource>,
	registry: Arc<AssetRegistry>,
}

impl ActivityReconstructor {
	pub fn new(ledger: Arc<dyn LedgerRpc>, prices: Arc<dyn PriceSource>, registry: Arc<AssetRegistry>) -> Self {
		Self { ledger, prices, registry }
	}

	pub async fn list_activity(&self, wallet_address: &str, window_size: usize) -> Result<Vec<TokenActivity>, AggregationError> {
		let wallet = Pubkey::from_str(wallet_address).map_err(|_| AggregationError::InvalidAddress(wallet_address.to_string()))?;
		if window_size == 0 {
			return Ok(Vec::new());
		}

		let signatures = self.ledger.get_recent_signatures(&wallet, window_size).await?;
		let fetches = signatures.iter().map(|sig| async move { (sig, self.ledger.get_ledger_entry(sig).await) });
		let entries = join_all(fetches).await;

		let mut deltas = Vec::new();
		for (sig, result) in entries {
			match result {
				Ok(Some(entry)) => deltas.extend(self.entry_deltas(&entry, wallet_address)),
				Ok(None) => debug!(signature = %sig, "no detail for ledger entry, skipping"),
				Err(e) => warn!(signature = %sig, error = %e, "failed to fetch ledger entry, skipping"),
			}
		}

		// One lookup per distinct asset in the window.
		let prices = price_assets(self.prices.as_ref(), deltas.iter().map(|d| d.asset_address.as_str())).await;

		let mut activity: Vec<TokenActivity> = deltas
			.into_iter()
			.map(|d| {
				let info = self.registry.get(&d.asset_address).cloned().unwrap_or_else(|| self.registry.native());
				let amount = d.amount.abs();
				let price = prices.get(&d.asset_address).copied().unwrap_or(Decimal::ZERO);
				TokenActivity {
					direction: if d.amount.is_sign_positive() { Direction::Credited } else { Direction::Withdrawn },
					amount,
					usd_value: usd_value(amount, price),
					asset_address: d.asset_address,
					symbol: info.symbol,
					icon_ref: info.icon_ref,
					timestamp: d.timestamp,
					entry_reference: d.entry_reference,
				}
			})
			.collect();
		activity.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
		Ok(activity)
	}

	fn entry_deltas(&self, entry: &LedgerEntry, wallet: &str) -> Vec<Delta> {
		let timestamp = entry
			.block_time
			.and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
			.unwrap_or_else(OffsetDateTime::now_utc);
		let mut out = Vec::new();
		let mut push = |asset_address: &str, amount: Decimal| {
			out.push(Delta {
				asset_address: asset_address.to_string(),
				amount,
				timestamp,
				entry_reference: entry.signature.clone(),
			});
		};

		if let Some(idx) = entry.account_keys.iter().position(|k| k == wallet) {
			if let (Some(pre), Some(post)) = (entry.pre_balances.get(idx), entry.post_balances.get(idx)) {
				let delta = i128::from(*post) - i128::from(*pre);
				if delta != 0 {
					if let Some(amount) = to_decimal_amount(delta, NATIVE_DECIMALS) {
						push(NATIVE_ASSET_ADDRESS, amount);
					}
				}
			}
		}

		for post in entry.post_token_balances.iter().filter(|b| b.owner.as_deref() == Some(wallet)) {
			// Unregistered assets are dropped here, unlike in holdings.
			if !self.registry.contains(&post.mint) {
				continue;
			}
			let pre_raw = entry
				.pre_token_balances
				.iter()
				.find(|b| b.account_index == post.account_index)
				.map(|b| b.raw_amount)
				.unwrap_or(0);
			let delta = i128::from(post.raw_amount) - i128::from(pre_raw);
			if delta == 0 {
				continue;
			}
			if let Some(amount) = to_decimal_amount(delta, post.decimals) {
				push(&post.mint, amount);
			}
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::LedgerError;
	use crate::price::MockPriceSource;
	use crate::solana_client::{MockLedgerRpc, TokenBalanceRecord};
	use mockall::predicate::eq;

	const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

	fn reconstructor(ledger: MockLedgerRpc, prices: MockPriceSource) -> ActivityReconstructor {
		ActivityReconstructor::new(Arc::new(ledger), Arc::new(prices), Arc::new(AssetRegistry::builtin()))
	}

	fn native_entry(sig: &str, wallet: &str, pre: u64, post: u64, block_time: i64) -> LedgerEntry {
		LedgerEntry {
			signature: sig.to_string(),
			block_time: Some(block_time),
			account_keys: vec![Pubkey::new_unique().to_string(), wallet.to_string()],
			pre_balances: vec![10_000_000_000, pre],
			post_balances: vec![9_000_000_000, post],
			..Default::default()
		}
	}

	fn token_record(index: u8, mint: &str, owner: &str, raw: u64) -> TokenBalanceRecord {
		TokenBalanceRecord { account_index: index, mint: mint.to_string(), owner: Some(owner.to_string()), raw_amount: raw, decimals: 6 }
	}

	#[tokio::test]
	async fn native_credits_are_newest_first() {
		let wallet = Pubkey::new_unique().to_string();
		let w = wallet.clone();
		let mut ledger = MockLedgerRpc::new();
		ledger
			.expect_get_recent_signatures()
			.returning(|_, _| Ok(vec!["older".to_string(), "newer".to_string()]));
		ledger.expect_get_ledger_entry().returning(move |sig| {
			Ok(Some(match sig {
				"older" => native_entry("older", &w, 1_000_000_000, 6_000_000_000, 1_700_000_000),
				_ => native_entry("newer", &w, 6_000_000_000, 11_000_000_000, 1_700_000_500),
			}))
		});
		let mut prices = MockPriceSource::new();
		prices.expect_get_unit_price().with(eq(crate::registry::WRAPPED_SOL_MINT)).times(1).returning(|_| Ok(Decimal::from(100)));

		let activity = reconstructor(ledger, prices).list_activity(&wallet, 10).await.unwrap();
		assert_eq!(activity.len(), 2);
		assert_eq!(activity[0].entry_reference, "newer");
		assert_eq!(activity[1].entry_reference, "older");
		for a in &activity {
			assert_eq!(a.direction, Direction::Credited);
			assert_eq!(a.amount, Decimal::from(5));
			assert_eq!(a.usd_value, Decimal::from(500));
		}
	}

	#[tokio::test]
	async fn token_debit_and_unregistered_asset_dropped() {
		let wallet = Pubkey::new_unique().to_string();
		let unlisted = Pubkey::new_unique().to_string();
		let mut entry = native_entry("sig", &wallet, 5_000, 5_000, 1_700_000_000);
		entry.pre_token_balances = vec![token_record(2, USDC, &wallet, 3_000_000), token_record(3, &unlisted, &wallet, 10)];
		entry.post_token_balances = vec![token_record(2, USDC, &wallet, 1_000_000), token_record(3, &unlisted, &wallet, 20)];

		let mut ledger = MockLedgerRpc::new();
		ledger.expect_get_recent_signatures().returning(|_, _| Ok(vec!["sig".to_string()]));
		ledger.expect_get_ledger_entry().returning(move |_| Ok(Some(entry.clone())));
		let mut prices = MockPriceSource::new();
		prices.expect_get_unit_price().with(eq(USDC)).times(1).returning(|_| Ok(Decimal::ONE));

		let activity = reconstructor(ledger, prices).list_activity(&wallet, 5).await.unwrap();
		assert_eq!(activity.len(), 1);
		assert_eq!(activity[0].direction, Direction::Withdrawn);
		assert_eq!(activity[0].symbol, "USDC");
		assert_eq!(activity[0].amount, Decimal::from(2));
		assert_eq!(activity[0].usd_value, Decimal::from(2));
	}

	#[tokio::test]
	async fn new_token_account_counts_from_zero() {
		let wallet = Pubkey::new_unique().to_string();
		let mut entry = native_entry("sig", &wallet, 5_000, 5_000, 1_700_000_000);
		entry.post_token_balances = vec![token_record(4, USDC, &wallet, 250_000)];

		let mut ledger = MockLedgerRpc::new();
		ledger.expect_get_recent_signatures().returning(|_, _| Ok(vec!["sig".to_string()]));
		ledger.expect_get_ledger_entry().returning(move |_| Ok(Some(entry.clone())));
		let mut prices = MockPriceSource::new();
		prices.expect_get_unit_price().returning(|_| Ok(Decimal::ONE));

		let activity = reconstructor(ledger, prices).list_activity(&wallet, 5).await.unwrap();
		assert_eq!(activity.len(), 1);
		assert_eq!(activity[0].direction, Direction::Credited);
		assert_eq!(activity[0].amount.to_string(), "0.250000");
	}

	#[tokio::test]
	async fn wrapping_sol_shows_both_sides() {
		let wallet = Pubkey::new_unique().to_string();
		let wsol = crate::registry::WRAPPED_SOL_MINT;
		let mut entry = native_entry("wrap", &wallet, 3_000_000_000, 1_000_000_000, 1_700_000_000);
		entry.post_token_balances = vec![TokenBalanceRecord {
			account_index: 2,
			mint: wsol.to_string(),
			owner: Some(wallet.clone()),
			raw_amount: 2_000_000_000,
			decimals: 9,
		}];

		let mut ledger = MockLedgerRpc::new();
		ledger.expect_get_recent_signatures().returning(|_, _| Ok(vec!["wrap".to_string()]));
		ledger.expect_get_ledger_entry().returning(move |_| Ok(Some(entry.clone())));
		let mut prices = MockPriceSource::new();
		prices.expect_get_unit_price().with(eq(wsol)).times(1).returning(|_| Ok(Decimal::from(10)));

		let activity = reconstructor(ledger, prices).list_activity(&wallet, 5).await.unwrap();
		assert_eq!(activity.len(), 2);
		let native = activity.iter().find(|a| a.asset_address == NATIVE_ASSET_ADDRESS).unwrap();
		let wrapped = activity.iter().find(|a| a.asset_address == wsol).unwrap();
		assert_eq!(native.direction, Direction::Withdrawn);
		assert_eq!(native.symbol, "SOL");
		assert_eq!(wrapped.direction, Direction::Credited);
		assert_eq!(wrapped.symbol, "WSOL");
		assert_eq!(wrapped.usd_value, Decimal::from(20));
	}

	#[tokio::test]
	async fn missing_or_failed_entries_are_skipped() {
		let wallet = Pubkey::new_unique().to_string();
		let w = wallet.clone();
		let mut ledger = MockLedgerRpc::new();
		ledger
			.expect_get_recent_signatures()
			.returning(|_, _| Ok(vec!["pruned".to_string(), "broken".to_string(), "ok".to_string()]));
		ledger.expect_get_ledger_entry().returning(move |sig| match sig {
			"pruned" => Ok(None),
			"broken" => Err(LedgerError::Transport("reset".to_string())),
			_ => Ok(Some(native_entry("ok", &w, 10, 4, 1_700_000_000))),
		});
		let mut prices = MockPriceSource::new();
		prices.expect_get_unit_price().returning(|_| Err(crate::error::PriceError::NotFound(NATIVE_ASSET_ADDRESS.to_string())));

		let activity = reconstructor(ledger, prices).list_activity(&wallet, 3).await.unwrap();
		assert_eq!(activity.len(), 1);
		assert_eq!(activity[0].direction, Direction::Withdrawn);
		assert_eq!(activity[0].amount.to_string(), "0.000000006");
		assert_eq!(activity[0].usd_value, Decimal::ZERO);
	}

	#[tokio::test]
	async fn signature_listing_failure_is_an_error() {
		let mut ledger = MockLedgerRpc::new();
		ledger
			.expect_get_recent_signatures()
			.returning(|_, _| Err(LedgerError::Rpc { code: -32005, message: "node is behind".to_string() }));
		let err = reconstructor(ledger, MockPriceSource::new())
			.list_activity(&Pubkey::new_unique().to_string(), 5)
			.await
			.unwrap_err();
		assert!(matches!(err, AggregationError::Upstream(_)));
	}

	#[test]
	fn missing_block_time_falls_back_to_now() {
		let wallet = Pubkey::new_unique().to_string();
		let mut entry = native_entry("sig", &wallet, 1, 2, 0);
		entry.block_time = None;
		let r = reconstructor(MockLedgerRpc::new(), MockPriceSource::new());
		let before = OffsetDateTime::now_utc();
		let deltas = r.entry_deltas(&entry, &wallet);
		assert_eq!(deltas.len(), 1);
		assert!(deltas[0].timestamp >= before);
	}
}
