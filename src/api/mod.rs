use axum::{routing::{get, post}, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::AppConfig, metrics::Metrics, wallet::WalletService, withdrawal::WalletSigner};

mod routes;

#[derive(Clone)]
pub struct AppState {
	pub cfg: AppConfig,
	pub wallet: WalletService,
	pub metrics: Arc<Metrics>,
	/// Custodial signing key; withdrawals are disabled without one.
	pub signer: Option<WalletSigner>,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(routes::health))
		.route("/metrics", get(routes::metrics))
		.route("/wallet/:address/holdings", get(routes::wallet_holdings))
		.route("/wallet/:address/activity", get(routes::wallet_activity))
		.route("/wallet/withdraw", post(routes::wallet_withdraw))
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
		.with_state(state)
}
