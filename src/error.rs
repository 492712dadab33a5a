use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use solana_client::{
	client_error::{ClientError, ClientErrorKind},
	rpc_request::RpcError,
};
use solana_sdk::{signer::SignerError, transaction::TransactionError};
use thiserror::Error;

/// Failure talking to the ledger node.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
	#[error("rpc transport error: {0}")]
	Transport(String),
	#[error("rpc error {code}: {message}")]
	Rpc { code: i64, message: String },
	#[error("transaction error: {0}")]
	Transaction(TransactionError),
	#[error("unexpected rpc payload: {0}")]
	Decode(String),
}

impl LedgerError {
	/// The request may have reached the node even though no usable reply came back.
	pub fn is_indeterminate(&self) -> bool {
		matches!(self, LedgerError::Transport(_) | LedgerError::Decode(_))
	}
}

impl From<ClientError> for LedgerError {
	fn from(e: ClientError) -> Self {
		// Preflight and status failures carry a structured error; use it before the text.
		if let Some(tx_err) = e.get_transaction_error() {
			return LedgerError::Transaction(tx_err);
		}
		match e.kind() {
			ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => LedgerError::Transport(e.to_string()),
			ClientErrorKind::RpcError(RpcError::RpcResponseError { code, message, .. }) => {
				LedgerError::Rpc { code: *code, message: message.clone() }
			}
			ClientErrorKind::SerdeJson(_) => LedgerError::Decode(e.to_string()),
			_ => LedgerError::Transport(e.to_string()),
		}
	}
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriceError {
	#[error("asset identifier must not be empty")]
	InvalidInput,
	#[error("price oracle unavailable: {0}")]
	Upstream(String),
	#[error("no price for asset {0}")]
	NotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
	#[error("invalid wallet address: {0}")]
	InvalidAddress(String),
	#[error("ledger read failed: {0}")]
	Upstream(#[from] LedgerError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
	#[error("invalid withdrawal request: {0}")]
	InputValidation(String),
	#[error("asset {0} is not in the registry")]
	UnknownAsset(String),
	#[error("ledger read failed: {0}")]
	Upstream(#[from] LedgerError),
	#[error("failed to build instruction: {0}")]
	Instruction(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
	#[error("signing relay unreachable: {0}")]
	Transport(String),
	#[error("signing relay returned {status}: {body}")]
	Status { status: u16, body: String },
	#[error("signing relay payload invalid: {0}")]
	Decode(String),
	#[error("signing relay altered the transaction")]
	Tampered,
}

/// Raw cause of a failed withdrawal, before classification.
#[derive(Error, Debug, PartialEq)]
pub enum WithdrawalError {
	#[error(transparent)]
	Build(#[from] BuildError),
	#[error("signing failed: {0}")]
	Signing(SignerError),
	#[error(transparent)]
	Relay(#[from] RelayError),
	/// Ledger failure before or during broadcast. `setup_instruction` is the
	/// index of the account-creation instruction when the plan has one.
	#[error("submission failed: {source}")]
	Submission { source: LedgerError, setup_instruction: Option<u8> },
	#[error("transaction {signature} failed on-chain: {error}")]
	Execution { signature: String, error: TransactionError },
	#[error("transaction {signature} not confirmed after {attempts} attempts")]
	ConfirmationTimeout { signature: String, attempts: u32 },
	#[error("{0}")]
	Other(String),
}

#[derive(Error, Debug)]
pub enum AppError {
	#[error("Bad request: {0}")]
	BadRequest(String),
	#[error("Unauthorized")]
	Unauthorized,
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Upstream error: {0}")]
	Upstream(String),
	#[error("Internal error: {0}")]
	Internal(String),
}

impl From<AggregationError> for AppError {
	fn from(e: AggregationError) -> Self {
		match e {
			AggregationError::InvalidAddress(a) => AppError::BadRequest(format!("invalid wallet address: {a}")),
			AggregationError::Upstream(e) => AppError::Upstream(e.to_string()),
		}
	}
}

#[derive(Serialize)]
struct ErrorBody {
	code: u16,
	message: String,
}

impl IntoResponse for AppError {
	fn into_response(self) -> axum::response::Response {
		let (status, message) = match self {
			AppError::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
			AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
			AppError::NotFound(e) => (StatusCode::NOT_FOUND, e),
			AppError::Upstream(e) => (StatusCode::BAD_GATEWAY, e),
			AppError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e),
		};
		let body = Json(ErrorBody { code: status.as_u16(), message });
		(status, body).into_response()
	}
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
	use super::*;
	use solana_client::client_error::ClientError;
	use solana_sdk::instruction::InstructionError;

	#[test]
	fn client_error_prefers_structured_transaction_error() {
		let err = ClientError::from(TransactionError::InsufficientFundsForRent { account_index: 2 });
		assert_eq!(
			LedgerError::from(err),
			LedgerError::Transaction(TransactionError::InsufficientFundsForRent { account_index: 2 })
		);
	}

	#[test]
	fn client_error_keeps_rpc_code() {
		let err = ClientError::from(ClientErrorKind::RpcError(RpcError::RpcResponseError {
			code: -32005,
			message: "node is behind".to_string(),
			data: solana_client::rpc_request::RpcResponseErrorData::Empty,
		}));
		assert_eq!(LedgerError::from(err), LedgerError::Rpc { code: -32005, message: "node is behind".to_string() });
	}

	#[test]
	fn instruction_error_is_structured() {
		let err = ClientError::from(TransactionError::InstructionError(0, InstructionError::Custom(1)));
		assert!(matches!(LedgerError::from(err), LedgerError::Transaction(TransactionError::InstructionError(0, _))));
	}
}
