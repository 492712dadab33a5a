use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use walletback::{
	api::{self, AppState},
	config::AppConfig,
	metrics::Metrics,
	price::PriceOracleClient,
	registry::AssetRegistry,
	relay::HttpSigningRelay,
	solana_client::{load_wallet_keypair, SolanaClient},
	telemetry::init_tracing,
	transfer::PriorityFee,
	wallet::{WalletService, WalletServiceParts},
	withdrawal::{PollConfig, WalletSigner},
};

#[tokio::main]
async fn main() -> Result<()> {
	// Load environment variables from .env if present
	dotenv().ok();
	init_tracing();

	let cfg = AppConfig::from_env();
	let timeout = Duration::from_secs(cfg.http_timeout_secs);

	let registry = match &cfg.asset_registry_path {
		Some(path) => AssetRegistry::from_json_file(path)?,
		None => AssetRegistry::builtin(),
	};

	let signer: Option<WalletSigner> = if cfg.wallet_keypair_path.is_empty() && std::env::var("WALLET_KEYPAIR_BASE64").is_err() {
		warn!("no wallet keypair configured; withdrawals disabled");
		None
	} else {
		let keypair: WalletSigner = load_wallet_keypair(&cfg.wallet_keypair_path)?;
		Some(keypair)
	};
	if signer.is_some() && cfg.session_jwt_secret.is_empty() {
		warn!("SESSION_JWT_SECRET unset; every withdrawal request will be rejected");
	}
	let relay_fee_payer = if cfg.relay_fee_payer.is_empty() {
		if signer.is_some() {
			warn!("RELAY_FEE_PAYER unset; relayed withdrawals will be rejected by the ledger");
		}
		Pubkey::default()
	} else {
		Pubkey::from_str(&cfg.relay_fee_payer).context("RELAY_FEE_PAYER is not a valid public key")?
	};

	let metrics = Metrics::new().map_err(|e| anyhow::anyhow!("metrics registry: {e}"))?;
	let wallet = WalletService::new(WalletServiceParts {
		ledger: Arc::new(SolanaClient::new(&cfg.solana_rpc_url)),
		prices: Arc::new(PriceOracleClient::new(&cfg.price_oracle_url, timeout)?),
		relay: Arc::new(HttpSigningRelay::new(&cfg.signing_relay_url, timeout)?),
		registry: Arc::new(registry),
		relay_fee_payer,
		priority: PriorityFee {
			compute_unit_limit: cfg.setup_compute_unit_limit,
			compute_unit_price: cfg.setup_compute_unit_price,
		},
		poll: PollConfig {
			interval: Duration::from_millis(cfg.confirm_poll_interval_ms),
			max_attempts: cfg.confirm_max_attempts,
			..PollConfig::default()
		},
	})
	.with_metrics(metrics.clone());

	let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
	let app = api::router(AppState { cfg, wallet, metrics, signer });

	info!(%addr, "starting server");
	axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

	Ok(())
}
