use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
	pub host: String,
	pub port: u16,
	pub solana_rpc_url: String,
	pub price_oracle_url: String,
	pub signing_relay_url: String,
	/// Public key the signing relay countersigns as fee payer.
	pub relay_fee_payer: String,
	pub wallet_keypair_path: String,
	pub asset_registry_path: Option<String>,
	pub activity_window: usize,
	pub confirm_poll_interval_ms: u64,
	pub confirm_max_attempts: u32,
	pub http_timeout_secs: u64,
	pub setup_compute_unit_limit: u32,
	pub setup_compute_unit_price: u64,
	/// HS256 secret for withdrawal session tokens. Empty rejects every withdrawal.
	pub session_jwt_secret: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
	std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl AppConfig {
	pub fn from_env() -> Self {
		Self {
			host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
			port: env_or("PORT", 8080),
			solana_rpc_url: std::env::var("SOLANA_RPC_URL").unwrap_or_else(|_| "https://api.devnet.solana.com".to_string()),
			price_oracle_url: std::env::var("PRICE_ORACLE_URL").unwrap_or_else(|_| "https://api.jup.ag/price/v2".to_string()),
			signing_relay_url: std::env::var("SIGNING_RELAY_URL").unwrap_or_else(|_| "http://localhost:3000/api".to_string()),
			relay_fee_payer: std::env::var("RELAY_FEE_PAYER").unwrap_or_default(),
			wallet_keypair_path: std::env::var("WALLET_KEYPAIR_PATH").unwrap_or_default(),
			asset_registry_path: std::env::var("ASSET_REGISTRY_PATH").ok().filter(|p| !p.is_empty()),
			activity_window: env_or("ACTIVITY_WINDOW", 20),
			confirm_poll_interval_ms: env_or("CONFIRM_POLL_INTERVAL_MS", 500),
			confirm_max_attempts: env_or("CONFIRM_MAX_ATTEMPTS", 60),
			http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", 15),
			setup_compute_unit_limit: env_or("SETUP_COMPUTE_UNIT_LIMIT", 200_000),
			setup_compute_unit_price: env_or("SETUP_COMPUTE_UNIT_PRICE", 10_000),
			session_jwt_secret: std::env::var("SESSION_JWT_SECRET").unwrap_or_default(),
		}
	}
}
