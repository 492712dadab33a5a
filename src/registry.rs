use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::AppError;

/// Marker for lamports held directly by the wallet. Not a mint, so it can
/// never collide with a token account.
pub const NATIVE_ASSET_ADDRESS: &str = "native";
pub const NATIVE_DECIMALS: u8 = 9;
pub const NATIVE_SYMBOL: &str = "SOL";
/// Wrapped-SOL mint. An ordinary token here; also the oracle id for native SOL.
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";
/// Rent-exempt minimum of a 165-byte token account, in lamports.
const TOKEN_ACCOUNT_RENT_LAMPORTS: u64 = 2_039_280;

pub fn is_native(asset_address: &str) -> bool {
	asset_address == NATIVE_ASSET_ADDRESS
}

/// Identifier the price oracle knows this asset by.
pub fn price_id(asset_address: &str) -> &str {
	if is_native(asset_address) {
		WRAPPED_SOL_MINT
	} else {
		asset_address
	}
}

/// The two fungible-token program variants a holding can live under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TokenProgram {
	#[default]
	SplToken,
	Token2022,
}

impl TokenProgram {
	pub fn id(&self) -> Pubkey {
		match self {
			TokenProgram::SplToken => spl_token::id(),
			TokenProgram::Token2022 => spl_token_2022::id(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
	pub symbol: String,
	pub display_name: String,
	pub icon_ref: Option<String>,
	pub decimals: u8,
	#[serde(default)]
	pub program: TokenProgram,
	/// Raw units withheld from a withdrawal that has to create the
	/// recipient's receiving account.
	#[serde(default)]
	pub setup_fee: u64,
}

/// Static address → metadata table. Read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
	assets: HashMap<String, AssetInfo>,
}

impl AssetRegistry {
	pub fn new(assets: HashMap<String, AssetInfo>) -> Self {
		Self { assets }
	}

	/// Built-in mainnet list.
	pub fn builtin() -> Self {
		let mut assets = HashMap::new();
		let mut add = |address: &str, symbol: &str, name: &str, icon: &str, decimals: u8, setup_fee: u64| {
			assets.insert(
				address.to_string(),
				AssetInfo {
					symbol: symbol.to_string(),
					display_name: name.to_string(),
					icon_ref: Some(icon.to_string()),
					decimals,
					program: TokenProgram::SplToken,
					setup_fee,
				},
			);
		};
		// Fees approximate the account rent at typical prices; deployments tune them in the JSON registry.
		add(NATIVE_ASSET_ADDRESS, NATIVE_SYMBOL, "Solana", "/assets/tokens/sol.png", NATIVE_DECIMALS, 0);
		add(WRAPPED_SOL_MINT, "WSOL", "Wrapped SOL", "/assets/tokens/sol.png", NATIVE_DECIMALS, TOKEN_ACCOUNT_RENT_LAMPORTS);
		add("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", "USDC", "USD Coin", "/assets/tokens/usdc.png", 6, 400_000);
		add("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", "USDT", "Tether USD", "/assets/tokens/usdt.png", 6, 400_000);
		add("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", "BONK", "Bonk", "/assets/tokens/bonk.png", 5, 2_000_000_000);
		add("JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN", "JUP", "Jupiter", "/assets/tokens/jup.png", 6, 500_000);
		Self { assets }
	}

	/// Loads a JSON object of `address -> AssetInfo`.
	pub fn from_json_file(path: &str) -> Result<Self, AppError> {
		let raw = std::fs::read_to_string(path)
			.map_err(|e| AppError::Internal(format!("failed to read asset registry {path}: {e}")))?;
		Self::from_json(&raw)
	}

	pub fn from_json(raw: &str) -> Result<Self, AppError> {
		let assets: HashMap<String, AssetInfo> =
			serde_json::from_str(raw).map_err(|e| AppError::Internal(format!("invalid asset registry: {e}")))?;
		for address in assets.keys().filter(|a| !is_native(a)) {
			Pubkey::from_str(address).map_err(|_| AppError::Internal(format!("invalid asset address in registry: {address}")))?;
		}
		Ok(Self { assets })
	}

	pub fn get(&self, asset_address: &str) -> Option<&AssetInfo> {
		self.assets.get(asset_address)
	}

	pub fn contains(&self, asset_address: &str) -> bool {
		self.assets.contains_key(asset_address)
	}

	pub fn native(&self) -> AssetInfo {
		self.get(NATIVE_ASSET_ADDRESS).cloned().unwrap_or_else(|| AssetInfo {
			symbol: NATIVE_SYMBOL.to_string(),
			display_name: "Solana".to_string(),
			icon_ref: None,
			decimals: NATIVE_DECIMALS,
			program: TokenProgram::SplToken,
			setup_fee: 0,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builtin_has_native_and_stables() {
		let reg = AssetRegistry::builtin();
		assert_eq!(reg.native().decimals, 9);
		assert_eq!(reg.get("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").unwrap().symbol, "USDC");
		assert!(!reg.contains("11111111111111111111111111111111"));
	}

	#[test]
	fn wrapped_sol_is_a_token_distinct_from_native() {
		let reg = AssetRegistry::builtin();
		let wsol = reg.get(WRAPPED_SOL_MINT).unwrap();
		assert_eq!(wsol.symbol, "WSOL");
		assert_ne!(wsol.symbol, reg.native().symbol);
		assert!(!is_native(WRAPPED_SOL_MINT));
		assert_eq!(price_id(NATIVE_ASSET_ADDRESS), WRAPPED_SOL_MINT);
		assert_eq!(price_id(WRAPPED_SOL_MINT), WRAPPED_SOL_MINT);
	}

	#[test]
	fn json_registry_defaults_to_classic_program() {
		let raw = r#"{
			"EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v": {"symbol":"USDC","display_name":"USD Coin","icon_ref":null,"decimals":6},
			"2b1kV6DkPAnxd5ixfnxCpjxmKwqjjaYmCZfHsFu24GXo": {"symbol":"PYUSD","display_name":"PayPal USD","icon_ref":null,"decimals":6,"program":"token2022"}
		}"#;
		let reg = AssetRegistry::from_json(raw).unwrap();
		assert_eq!(reg.get("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").unwrap().program, TokenProgram::SplToken);
		assert_eq!(reg.get("2b1kV6DkPAnxd5ixfnxCpjxmKwqjjaYmCZfHsFu24GXo").unwrap().program, TokenProgram::Token2022);
		assert_eq!(reg.get("2b1kV6DkPAnxd5ixfnxCpjxmKwqjjaYmCZfHsFu24GXo").unwrap().setup_fee, 0);
	}

	#[test]
	fn json_registry_accepts_native_marker() {
		let raw = r#"{"native": {"symbol":"SOL","display_name":"Solana","icon_ref":null,"decimals":9}}"#;
		assert_eq!(AssetRegistry::from_json(raw).unwrap().native().symbol, "SOL");
	}

	#[test]
	fn json_registry_rejects_bad_address() {
		let raw = r#"{"not-an-address": {"symbol":"X","display_name":"X","icon_ref":null,"decimals":6}}"#;
		assert!(AssetRegistry::from_json(raw).is_err());
	}
}
