//! Maps raw withdrawal failures onto the small set of categories shown to
//! users. Never retries.

use serde::Serialize;
use solana_sdk::{instruction::InstructionError, signer::SignerError, transaction::TransactionError};
use tracing::warn;

use crate::error::{BuildError, LedgerError, RelayError, WithdrawalError};

/// Low-level text emitted when an account cannot fund a transfer.
const INSUFFICIENT_LAMPORTS: &str = "insufficient lamports";
/// System program error code for a transfer that would leave negative lamports.
const SYSTEM_RESULT_WITH_NEGATIVE_LAMPORTS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
	InputValidation,
	UnknownAsset,
	UpstreamUnavailable,
	UserCancelledAuth,
	InsufficientFundsForSetup,
	ExecutionError,
	ConfirmationTimeout,
	Unknown,
}

impl FailureCategory {
	pub fn as_str(&self) -> &'static str {
		match self {
			FailureCategory::InputValidation => "input_validation",
			FailureCategory::UnknownAsset => "unknown_asset",
			FailureCategory::UpstreamUnavailable => "upstream_unavailable",
			FailureCategory::UserCancelledAuth => "user_cancelled_auth",
			FailureCategory::InsufficientFundsForSetup => "insufficient_funds_for_setup",
			FailureCategory::ExecutionError => "execution_error",
			FailureCategory::ConfirmationTimeout => "confirmation_timeout",
			FailureCategory::Unknown => "unknown",
		}
	}

	fn user_message(&self) -> &'static str {
		match self {
			FailureCategory::InputValidation => "Please check the amount and destination address and try again.",
			FailureCategory::UnknownAsset => "This token can't be withdrawn yet.",
			FailureCategory::UpstreamUnavailable => "The network is temporarily unavailable. No funds were moved. Please try again shortly.",
			FailureCategory::UserCancelledAuth => "Authorization was cancelled. No funds were moved.",
			FailureCategory::InsufficientFundsForSetup => {
				"Not enough SOL to open the recipient's token account. Add a small amount of SOL and try again."
			}
			FailureCategory::ExecutionError => "The network rejected this transaction. No funds were moved.",
			FailureCategory::ConfirmationTimeout => {
				"We couldn't confirm this withdrawal in time. It may still complete, so check its status in an explorer before trying again."
			}
			FailureCategory::Unknown => "Something went wrong.",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedFailure {
	pub category: FailureCategory,
	pub message: String,
	/// Set when the category came from matching error text rather than a code.
	#[serde(skip)]
	pub text_fallback: bool,
}

impl ClassifiedFailure {
	fn new(category: FailureCategory) -> Self {
		Self { category, message: category.user_message().to_string(), text_fallback: false }
	}
}

pub fn classify(err: &WithdrawalError) -> ClassifiedFailure {
	match err {
		WithdrawalError::Build(BuildError::InputValidation(detail)) => ClassifiedFailure {
			category: FailureCategory::InputValidation,
			message: format!("{} ({detail})", FailureCategory::InputValidation.user_message()),
			text_fallback: false,
		},
		WithdrawalError::Build(BuildError::UnknownAsset(_)) => ClassifiedFailure::new(FailureCategory::UnknownAsset),
		WithdrawalError::Build(BuildError::Upstream(e)) => classify_ledger(e, None),
		WithdrawalError::Build(BuildError::Instruction(msg)) => unknown(msg),
		WithdrawalError::Signing(SignerError::UserCancel(_)) => ClassifiedFailure::new(FailureCategory::UserCancelledAuth),
		WithdrawalError::Signing(e) => unknown(&e.to_string()),
		WithdrawalError::Relay(RelayError::Transport(_)) => ClassifiedFailure::new(FailureCategory::UpstreamUnavailable),
		WithdrawalError::Relay(RelayError::Status { status, .. }) if *status >= 500 => {
			ClassifiedFailure::new(FailureCategory::UpstreamUnavailable)
		}
		WithdrawalError::Relay(e) => unknown(&e.to_string()),
		WithdrawalError::Submission { source, setup_instruction } => classify_ledger(source, *setup_instruction),
		WithdrawalError::Execution { .. } => ClassifiedFailure::new(FailureCategory::ExecutionError),
		WithdrawalError::ConfirmationTimeout { .. } => ClassifiedFailure::new(FailureCategory::ConfirmationTimeout),
		WithdrawalError::Other(msg) => unknown(msg),
	}
}

fn classify_ledger(err: &LedgerError, setup_instruction: Option<u8>) -> ClassifiedFailure {
	match err {
		LedgerError::Transaction(tx_err) => {
			if is_setup_funding_error(tx_err, setup_instruction) {
				ClassifiedFailure::new(FailureCategory::InsufficientFundsForSetup)
			} else {
				ClassifiedFailure::new(FailureCategory::ExecutionError)
			}
		}
		LedgerError::Rpc { message, .. } | LedgerError::Transport(message) | LedgerError::Decode(message) => {
			if setup_instruction.is_some() && message.to_lowercase().contains(INSUFFICIENT_LAMPORTS) {
				warn!(fallback = "substring", error = %message, "classified insufficient setup funds from error text");
				return ClassifiedFailure { text_fallback: true, ..ClassifiedFailure::new(FailureCategory::InsufficientFundsForSetup) };
			}
			ClassifiedFailure::new(FailureCategory::UpstreamUnavailable)
		}
	}
}

fn is_setup_funding_error(err: &TransactionError, setup_instruction: Option<u8>) -> bool {
	match err {
		TransactionError::InsufficientFundsForRent { .. } => true,
		TransactionError::InstructionError(idx, InstructionError::Custom(code)) => {
			Some(*idx) == setup_instruction && *code == SYSTEM_RESULT_WITH_NEGATIVE_LAMPORTS
		}
		TransactionError::InstructionError(idx, InstructionError::InsufficientFunds) => Some(*idx) == setup_instruction,
		_ => false,
	}
}

/// Keeps the raw text; it is the only information available.
fn unknown(raw: &str) -> ClassifiedFailure {
	ClassifiedFailure { category: FailureCategory::Unknown, message: raw.to_string(), text_fallback: false }
}
