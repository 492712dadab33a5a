//! Balance aggregation: native balance plus every fungible-token account the
//! wallet owns under both token programs, priced in USD.

use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AggregationError;
use crate::price::PriceSource;
use crate::registry::{price_id, AssetRegistry, TokenProgram, NATIVE_ASSET_ADDRESS, NATIVE_DECIMALS};
use crate::solana_client::{LedgerRpc, ParsedTokenAccount};

pub const UNKNOWN_SYMBOL: &str = "Unknown";

/// Holding snapshot surfaced to the UI. `amount` is always strictly positive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenAsset {
	pub asset_address: String,
	pub symbol: String,
	pub display_name: String,
	pub icon_ref: Option<String>,
	pub raw_amount: u64,
	pub decimals: u8,
	pub amount: Decimal,
	pub usd_value: Decimal,
}

/// `raw / 10^decimals` without going through floating point. Returns `None`
/// when the exponent exceeds what `Decimal` can represent.
pub fn to_decimal_amount(raw: i128, decimals: u8) -> Option<Decimal> {
	Decimal::try_from_i128_with_scale(raw, u32::from(decimals)).ok()
}

pub fn usd_value(amount: Decimal, unit_price: Decimal) -> Decimal {
	amount.checked_mul(unit_price).unwrap_or(Decimal::ZERO)
}

/// Looks up each oracle id once, concurrently. A failed lookup prices that
/// asset at zero and leaves the others untouched.
pub async fn price_assets<'a, I>(prices: &dyn PriceSource, addresses: I) -> HashMap<String, Decimal>
where
	I: IntoIterator<Item = &'a str>,
{
	let mut unique: Vec<&str> = addresses.into_iter().collect();
	unique.sort_unstable();
	unique.dedup();
	let mut ids: Vec<&str> = unique.iter().map(|a| price_id(a)).collect();
	ids.sort_unstable();
	ids.dedup();

	let lookups = ids.iter().map(|id| async move {
		let price = match prices.get_unit_price(id).await {
			Ok(p) => p,
			Err(e) => {
				warn!(asset = %id, error = %e, "price lookup failed, valuing at zero");
				Decimal::ZERO
			}
		};
		(*id, price)
	});
	let by_id: HashMap<&str, Decimal> = join_all(lookups).await.into_iter().collect();
	unique
		.into_iter()
		.map(|a| (a.to_string(), by_id.get(price_id(a)).copied().unwrap_or(Decimal::ZERO)))
		.collect()
}

#[derive(Clone)]
pub struct BalanceAggregator {
	ledger: Arc<dyn LedgerRpc>,
	prices: Arc<dyn PriceSource>,
	registry: Arc<AssetRegistry>,
}

impl BalanceAggregator {
	pub fn new(ledger: Arc<dyn LedgerRpc>, prices: Arc<dyn PriceSource>, registry: Arc<AssetRegistry>) -> Self {
		Self { ledger, prices, registry }
	}

	pub async fn list_holdings(&self, wallet_address: &str) -> Result<Vec<TokenAsset>, AggregationError> {
		let owner = Pubkey::from_str(wallet_address).map_err(|_| AggregationError::InvalidAddress(wallet_address.to_string()))?;

		// All three reads must succeed; a partial balance view is not returned.
		let (lamports, classic, token22) = tokio::try_join!(
			self.ledger.get_balance(&owner),
			self.ledger.get_token_accounts(&owner, TokenProgram::SplToken),
			self.ledger.get_token_accounts(&owner, TokenProgram::Token2022),
		)?;
		debug!(owner = %owner, lamports, classic = classic.len(), token22 = token22.len(), "fetched wallet accounts");

		let accounts: Vec<ParsedTokenAccount> = classic.into_iter().chain(token22).collect();

		let mut to_price: Vec<&str> = accounts
			.iter()
			.filter(|a| a.raw_amount > 0 && self.registry.contains(&a.mint))
			.map(|a| a.mint.as_str())
			.collect();
		if lamports > 0 {
			to_price.push(NATIVE_ASSET_ADDRESS);
		}
		let prices = price_assets(self.prices.as_ref(), to_price).await;

		let mut holdings = Vec::with_capacity(accounts.len() + 1);
		if lamports > 0 {
			let native = self.registry.native();
			let amount = to_decimal_amount(i128::from(lamports), NATIVE_DECIMALS).unwrap_or(Decimal::ZERO);
			let price = prices.get(NATIVE_ASSET_ADDRESS).copied().unwrap_or(Decimal::ZERO);
			holdings.push(TokenAsset {
				asset_address: NATIVE_ASSET_ADDRESS.to_string(),
				symbol: native.symbol,
				display_name: native.display_name,
				icon_ref: native.icon_ref,
				raw_amount: lamports,
				decimals: NATIVE_DECIMALS,
				amount,
				usd_value: usd_value(amount, price),
			});
		}

		for account in accounts {
			if let Some(asset) = self.token_asset(&account, &prices) {
				holdings.push(asset);
			}
		}

		Ok(holdings.into_iter().filter(|h| h.amount > Decimal::ZERO).collect())
	}

	fn token_asset(&self, account: &ParsedTokenAccount, prices: &HashMap<String, Decimal>) -> Option<TokenAsset> {
		if account.raw_amount == 0 {
			return None;
		}
		let info = self.registry.get(&account.mint);
		let decimals = info.map_or(account.decimals, |i| i.decimals);
		let Some(amount) = to_decimal_amount(i128::from(account.raw_amount), decimals) else {
			warn!(mint = %account.mint, decimals, raw_amount = account.raw_amount, "decimals out of range, holding not shown");
			return None;
		};
		let asset = match info {
			Some(info) => {
				let price = prices.get(&account.mint).copied().unwrap_or(Decimal::ZERO);
				TokenAsset {
					asset_address: account.mint.clone(),
					symbol: info.symbol.clone(),
					display_name: info.display_name.clone(),
					icon_ref: info.icon_ref.clone(),
					raw_amount: account.raw_amount,
					decimals,
					amount,
					usd_value: usd_value(amount, price),
				}
			}
			// Unlisted assets are still shown so they can be withdrawn.
			None => TokenAsset {
				asset_address: account.mint.clone(),
				symbol: UNKNOWN_SYMBOL.to_string(),
				display_name: "Unknown Token".to_string(),
				icon_ref: None,
				raw_amount: account.raw_amount,
				decimals,
				amount,
				usd_value: Decimal::ZERO,
			},
		};
		Some(asset)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::{LedgerError, PriceError};
	use crate::price::MockPriceSource;
	use crate::solana_client::MockLedgerRpc;
	use crate::registry::WRAPPED_SOL_MINT;
	use mockall::predicate::eq;

	const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
	const BONK: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

	fn account(mint: &str, raw_amount: u64, decimals: u8) -> ParsedTokenAccount {
		ParsedTokenAccount { address: Pubkey::new_unique().to_string(), mint: mint.to_string(), raw_amount, decimals }
	}

	fn aggregator(ledger: MockLedgerRpc, prices: MockPriceSource) -> BalanceAggregator {
		BalanceAggregator::new(Arc::new(ledger), Arc::new(prices), Arc::new(AssetRegistry::builtin()))
	}

	#[test]
	fn decimal_conversion_is_exact() {
		assert_eq!(to_decimal_amount(1_000_000, 6), Some(Decimal::ONE));
		assert_eq!(to_decimal_amount(2_500_000_000, 9).unwrap().to_string(), "2.500000000");
		assert_eq!(to_decimal_amount(1, 29), None);
	}

	#[tokio::test]
	async fn single_usdc_holding_is_priced() {
		let mut ledger = MockLedgerRpc::new();
		ledger.expect_get_balance().returning(|_| Ok(0));
		ledger
			.expect_get_token_accounts()
			.with(mockall::predicate::always(), eq(TokenProgram::SplToken))
			.returning(|_, _| Ok(vec![account(USDC, 1_000_000, 6)]));
		ledger
			.expect_get_token_accounts()
			.with(mockall::predicate::always(), eq(TokenProgram::Token2022))
			.returning(|_, _| Ok(vec![]));
		let mut prices = MockPriceSource::new();
		prices.expect_get_unit_price().with(eq(USDC)).times(1).returning(|_| Ok(Decimal::ONE));

		let holdings = aggregator(ledger, prices).list_holdings(&Pubkey::new_unique().to_string()).await.unwrap();
		assert_eq!(holdings.len(), 1);
		assert_eq!(holdings[0].symbol, "USDC");
		assert_eq!(holdings[0].amount, Decimal::ONE);
		assert_eq!(holdings[0].usd_value, Decimal::ONE);
	}

	#[tokio::test]
	async fn unknown_asset_is_kept_without_price() {
		let unknown = Pubkey::new_unique().to_string();
		let unknown_mint = unknown.clone();
		let mut ledger = MockLedgerRpc::new();
		ledger.expect_get_balance().returning(|_| Ok(0));
		ledger
			.expect_get_token_accounts()
			.returning(move |_, program| match program {
				TokenProgram::SplToken => Ok(vec![account(&unknown_mint, 42, 2)]),
				TokenProgram::Token2022 => Ok(vec![]),
			});
		let mut prices = MockPriceSource::new();
		prices.expect_get_unit_price().never();

		let holdings = aggregator(ledger, prices).list_holdings(&Pubkey::new_unique().to_string()).await.unwrap();
		assert_eq!(holdings.len(), 1);
		assert_eq!(holdings[0].symbol, UNKNOWN_SYMBOL);
		assert_eq!(holdings[0].asset_address, unknown);
		assert_eq!(holdings[0].amount.to_string(), "0.42");
		assert_eq!(holdings[0].usd_value, Decimal::ZERO);
	}

	#[tokio::test]
	async fn zero_balances_are_filtered_and_price_failure_is_isolated() {
		let mut ledger = MockLedgerRpc::new();
		ledger.expect_get_balance().returning(|_| Ok(1_500_000_000));
		ledger.expect_get_token_accounts().returning(|_, program| match program {
			TokenProgram::SplToken => Ok(vec![account(USDC, 0, 6), account(BONK, 100_000, 5)]),
			TokenProgram::Token2022 => Ok(vec![]),
		});
		let mut prices = MockPriceSource::new();
		prices
			.expect_get_unit_price()
			.with(eq(WRAPPED_SOL_MINT))
			.returning(|_| Ok(Decimal::from(150)));
		prices
			.expect_get_unit_price()
			.with(eq(BONK))
			.returning(|_| Err(PriceError::Upstream("timeout".to_string())));

		let holdings = aggregator(ledger, prices).list_holdings(&Pubkey::new_unique().to_string()).await.unwrap();
		assert_eq!(holdings.len(), 2);
		assert!(holdings.iter().all(|h| h.amount > Decimal::ZERO));
		let sol = holdings.iter().find(|h| h.symbol == "SOL").unwrap();
		assert_eq!(sol.usd_value, Decimal::from(225));
		let bonk = holdings.iter().find(|h| h.symbol == "BONK").unwrap();
		assert_eq!(bonk.amount, Decimal::ONE);
		assert_eq!(bonk.usd_value, Decimal::ZERO);
	}

	#[tokio::test]
	async fn any_read_failure_fails_the_whole_call() {
		let mut ledger = MockLedgerRpc::new();
		ledger.expect_get_balance().returning(|_| Ok(1));
		ledger.expect_get_token_accounts().returning(|_, program| match program {
			TokenProgram::SplToken => Ok(vec![]),
			TokenProgram::Token2022 => Err(LedgerError::Transport("connection reset".to_string())),
		});
		let prices = MockPriceSource::new();

		let err = aggregator(ledger, prices).list_holdings(&Pubkey::new_unique().to_string()).await.unwrap_err();
		assert!(matches!(err, AggregationError::Upstream(LedgerError::Transport(_))));
	}

	#[tokio::test]
	async fn invalid_wallet_address_is_rejected_locally() {
		let mut ledger = MockLedgerRpc::new();
		ledger.expect_get_balance().never();
		let err = aggregator(ledger, MockPriceSource::new()).list_holdings("not-a-key").await.unwrap_err();
		assert_eq!(err, AggregationError::InvalidAddress("not-a-key".to_string()));
	}

	#[tokio::test]
	async fn wrapped_sol_is_listed_apart_from_native() {
		let mut ledger = MockLedgerRpc::new();
		ledger.expect_get_balance().returning(|_| Ok(1_000_000_000));
		ledger.expect_get_token_accounts().returning(|_, program| match program {
			TokenProgram::SplToken => Ok(vec![account(WRAPPED_SOL_MINT, 2_000_000_000, 9)]),
			TokenProgram::Token2022 => Ok(vec![]),
		});
		let mut prices = MockPriceSource::new();
		prices.expect_get_unit_price().with(eq(WRAPPED_SOL_MINT)).times(1).returning(|_| Ok(Decimal::from(100)));

		let holdings = aggregator(ledger, prices).list_holdings(&Pubkey::new_unique().to_string()).await.unwrap();
		assert_eq!(holdings.len(), 2);
		let native = holdings.iter().find(|h| h.asset_address == NATIVE_ASSET_ADDRESS).unwrap();
		let wrapped = holdings.iter().find(|h| h.asset_address == WRAPPED_SOL_MINT).unwrap();
		assert_eq!(native.symbol, "SOL");
		assert_eq!(native.usd_value, Decimal::from(100));
		assert_eq!(wrapped.symbol, "WSOL");
		assert_eq!(wrapped.amount, Decimal::from(2));
		assert_eq!(wrapped.usd_value, Decimal::from(200));
	}

	#[tokio::test]
	async fn out_of_range_decimals_drop_only_that_holding() {
		let odd = Pubkey::new_unique().to_string();
		let odd_mint = odd.clone();
		let mut ledger = MockLedgerRpc::new();
		ledger.expect_get_balance().returning(|_| Ok(0));
		ledger.expect_get_token_accounts().returning(move |_, program| match program {
			TokenProgram::SplToken => Ok(vec![account(&odd_mint, 5, 30), account(USDC, 2_000_000, 6)]),
			TokenProgram::Token2022 => Ok(vec![]),
		});
		let mut prices = MockPriceSource::new();
		prices.expect_get_unit_price().returning(|_| Ok(Decimal::ONE));

		let holdings = aggregator(ledger, prices).list_holdings(&Pubkey::new_unique().to_string()).await.unwrap();
		assert_eq!(holdings.len(), 1);
		assert_eq!(holdings[0].symbol, "USDC");
		assert!(holdings.iter().all(|h| h.asset_address != odd));
	}
}
