use axum::{
	extract::{Path, Query, State},
	http::{header, StatusCode},
	response::IntoResponse,
	Json,
};
use serde::Deserialize;
use tracing::warn;

use crate::{
	activity::TokenActivity,
	auth::AuthorizedSession,
	error::{AppError, AppResult},
	holdings::TokenAsset,
	transfer::WithdrawalRequest,
	withdrawal::WithdrawalOutcome,
};
use super::AppState;

pub async fn health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "status": "ok" }))
}

pub async fn metrics(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
	let body = state.metrics.render().map_err(|e| AppError::Internal(e.to_string()))?;
	Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

pub async fn wallet_holdings(State(state): State<AppState>, Path(address): Path<String>) -> AppResult<Json<Vec<TokenAsset>>> {
	let assets = state.wallet.list_holdings(&address).await?;
	Ok(Json(assets))
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
	pub limit: Option<usize>,
}

pub async fn wallet_activity(
	State(state): State<AppState>,
	Path(address): Path<String>,
	Query(q): Query<ActivityQuery>,
) -> AppResult<Json<Vec<TokenActivity>>> {
	let window = q.limit.unwrap_or(state.cfg.activity_window);
	let entries = state.wallet.list_activity(&address, window).await?;
	Ok(Json(entries))
}

pub async fn wallet_withdraw(
	State(state): State<AppState>,
	AuthorizedSession(session): AuthorizedSession,
	Json(req): Json<WithdrawalRequest>,
) -> AppResult<(StatusCode, Json<WithdrawalOutcome>)> {
	let signer = state.signer.clone().ok_or(AppError::Unauthorized)?;
	// A session only authorizes the wallet it was issued for.
	if session.sub != signer.pubkey().to_string() {
		warn!(subject = %session.sub, "session does not match the custodial wallet");
		return Err(AppError::Unauthorized);
	}
	let outcome = state.wallet.withdraw(&req, signer).await;
	let status = match &outcome {
		WithdrawalOutcome::Confirmed { .. } => StatusCode::OK,
		WithdrawalOutcome::Failed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
	};
	Ok((status, Json(outcome)))
}
