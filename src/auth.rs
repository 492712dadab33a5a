use axum::{
	async_trait,
	extract::FromRequestParts,
	http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::AppState;
use crate::error::{AppError, AppResult};

/// Session issued to the wallet owner. `sub` is the wallet address the
/// session may move funds from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
	pub sub: String,
	pub exp: usize,
}

pub fn verify_session_jwt(token: &str, secret: &str) -> AppResult<SessionClaims> {
	if secret.is_empty() {
		return Err(AppError::Unauthorized);
	}
	let mut validation = Validation::new(Algorithm::HS256);
	validation.validate_exp = true;
	let token_data = decode::<SessionClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
		.map_err(|_| AppError::Unauthorized)?;
	Ok(token_data.claims)
}

/// Extracts and verifies the `Authorization: Bearer` session token.
#[derive(Debug, Clone)]
pub struct AuthorizedSession(pub SessionClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthorizedSession {
	type Rejection = AppError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		let token = parts
			.headers
			.get(AUTHORIZATION)
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.strip_prefix("Bearer "))
			.map(str::trim)
			.filter(|t| !t.is_empty())
			.ok_or(AppError::Unauthorized)?;
		let claims = verify_session_jwt(token, &state.cfg.session_jwt_secret).map_err(|e| {
			warn!(path = %parts.uri.path(), "rejected session token");
			e
		})?;
		Ok(AuthorizedSession(claims))
	}
}
