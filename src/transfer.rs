//! Turns a validated withdrawal request into the ordered instruction list
//! that moves the funds.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_instruction};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::BuildError;
use crate::registry::{is_native, AssetRegistry, NATIVE_DECIMALS};
use crate::solana_client::{
	build_compute_budget_instructions, build_create_ata_instruction, derive_associated_token_address, LedgerRpc,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
	pub asset_address: String,
	/// User-entered decimal string.
	pub amount: String,
	pub destination_address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferPlan {
	pub instructions: Vec<Instruction>,
	/// Destination had no receiving account; decided once, here.
	pub requires_new_account: bool,
	pub sender: Pubkey,
	/// Raw units that reach the destination.
	pub raw_amount: u64,
	/// Raw units withheld from the requested amount to pay for account creation.
	pub setup_fee: u64,
}

impl TransferPlan {
	/// Index of the receiving-account creation instruction, if the plan has one.
	pub fn setup_instruction_index(&self) -> Option<u8> {
		if !self.requires_new_account {
			return None;
		}
		self.instructions
			.iter()
			.position(|ix| ix.program_id == spl_associated_token_account::id())
			.and_then(|i| u8::try_from(i).ok())
	}
}

/// Compute-budget settings appended when a receiving account is created.
#[derive(Debug, Clone, Copy)]
pub struct PriorityFee {
	pub compute_unit_limit: u32,
	pub compute_unit_price: u64,
}

impl Default for PriorityFee {
	fn default() -> Self {
		Self { compute_unit_limit: 200_000, compute_unit_price: 10_000 }
	}
}

/// Parses a user-entered amount as a strictly positive decimal.
pub fn parse_amount(amount: &str) -> Result<Decimal, BuildError> {
	let value = Decimal::from_str(amount.trim())
		.map_err(|_| BuildError::InputValidation(format!("amount {amount:?} is not a number")))?;
	if value <= Decimal::ZERO {
		return Err(BuildError::InputValidation("amount must be greater than zero".to_string()));
	}
	Ok(value.normalize())
}

/// Converts a user-entered amount into raw units. Amounts with more
/// fractional digits than `decimals` are rejected rather than rounded.
pub fn parse_raw_amount(amount: &str, decimals: u8) -> Result<u64, BuildError> {
	let value = parse_amount(amount)?;
	let shift = u32::from(decimals)
		.checked_sub(value.scale())
		.ok_or_else(|| BuildError::InputValidation(format!("amount supports at most {decimals} decimal places")))?;
	10i128
		.checked_pow(shift)
		.and_then(|factor| value.mantissa().checked_mul(factor))
		.and_then(|raw| u64::try_from(raw).ok())
		.ok_or_else(|| BuildError::InputValidation("amount is too large".to_string()))
}

pub fn parse_address(address: &str) -> Result<Pubkey, BuildError> {
	Pubkey::from_str(address.trim())
		.map_err(|_| BuildError::InputValidation(format!("{address:?} is not a valid address")))
}

#[derive(Clone)]
pub struct TransferBuilder {
	ledger: Arc<dyn LedgerRpc>,
	registry: Arc<AssetRegistry>,
	priority: PriorityFee,
}

impl TransferBuilder {
	pub fn new(ledger: Arc<dyn LedgerRpc>, registry: Arc<AssetRegistry>, priority: PriorityFee) -> Self {
		Self { ledger, registry, priority }
	}

	pub async fn build_transfer(&self, request: &WithdrawalRequest, sender_address: &str) -> Result<TransferPlan, BuildError> {
		// Re-validated here regardless of what the UI already checked.
		let sender = parse_address(sender_address)?;
		let destination = parse_address(&request.destination_address)?;

		if is_native(&request.asset_address) {
			let lamports = parse_raw_amount(&request.amount, NATIVE_DECIMALS)?;
			return Ok(TransferPlan {
				instructions: vec![system_instruction::transfer(&sender, &destination, lamports)],
				requires_new_account: false,
				sender,
				raw_amount: lamports,
				setup_fee: 0,
			});
		}

		// Validate the amount before touching the registry so bad input is reported as such.
		parse_amount(&request.amount)?;
		let info = self
			.registry
			.get(&request.asset_address)
			.ok_or_else(|| BuildError::UnknownAsset(request.asset_address.clone()))?;
		let raw_amount = parse_raw_amount(&request.amount, info.decimals)?;
		let mint = parse_address(&request.asset_address)?;

		let source_account = derive_associated_token_address(&sender, &mint, info.program);
		let destination_account = derive_associated_token_address(&destination, &mint, info.program);
		let exists = self.ledger.account_exists(&destination_account).await?;
		debug!(mint = %mint, destination = %destination_account, exists, "resolved receiving account");

		// Account rent comes out of the transferred amount. Whether it should
		// instead be charged on top is still unsettled with product.
		let setup_fee = if exists { 0 } else { info.setup_fee };
		let net_amount = raw_amount
			.checked_sub(setup_fee)
			.filter(|net| *net > 0)
			.ok_or_else(|| {
				BuildError::InputValidation(format!(
					"amount must exceed the account setup fee of {setup_fee} raw units for a new recipient"
				))
			})?;
		if setup_fee > 0 {
			info!(mint = %mint, requested = raw_amount, setup_fee, net_amount, "withholding account setup fee");
		}

		let mut instructions = Vec::with_capacity(4);
		if !exists {
			instructions.push(build_create_ata_instruction(&sender, &destination, &mint, info.program));
		}
		let transfer_ix = spl_token_2022::instruction::transfer_checked(
			&info.program.id(),
			&source_account,
			&mint,
			&destination_account,
			&sender,
			&[],
			net_amount,
			info.decimals,
		)
		.map_err(|e| BuildError::Instruction(e.to_string()))?;
		instructions.push(transfer_ix);
		if !exists {
			instructions.extend(build_compute_budget_instructions(self.priority.compute_unit_limit, self.priority.compute_unit_price));
		}

		Ok(TransferPlan { instructions, requires_new_account: !exists, sender, raw_amount: net_amount, setup_fee })
	}
}
