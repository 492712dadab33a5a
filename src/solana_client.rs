use crate::error::{AppError, AppResult, LedgerError};
use crate::registry::TokenProgram;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_client::rpc_response::RpcKeyedAccount;
use solana_sdk::{
	commitment_config::CommitmentConfig,
	compute_budget::ComputeBudgetInstruction,
	hash::Hash,
	instruction::Instruction,
	pubkey::Pubkey,
	signature::{Keypair, Signature},
	transaction::{Transaction, TransactionError},
};
use solana_transaction_status::{
	option_serializer::OptionSerializer, EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction,
	TransactionConfirmationStatus, UiMessage, UiTransactionEncoding, UiTransactionTokenBalance,
};
use spl_associated_token_account as spl_ata;
use std::sync::Arc;

/// Shared ledger connection. Holds no per-call state and is safe to clone
/// into concurrent branches.
#[derive(Clone)]
pub struct SolanaClient {
	pub rpc: Arc<RpcClient>,
}

impl SolanaClient {
	pub fn new(rpc_url: &str) -> Self {
		Self { rpc: Arc::new(RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed())) }
	}
}

// Types

/// A fungible-token account as reported by the node's parsed representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTokenAccount {
	pub address: String,
	pub mint: String,
	pub raw_amount: u64,
	pub decimals: u8,
}

/// One pre/post token balance record from a ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalanceRecord {
	pub account_index: u8,
	pub mint: String,
	pub owner: Option<String>,
	pub raw_amount: u64,
	pub decimals: u8,
}

/// The slice of a confirmed transaction needed to reconstruct balance deltas.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerEntry {
	pub signature: String,
	pub block_time: Option<i64>,
	pub account_keys: Vec<String>,
	pub pre_balances: Vec<u64>,
	pub post_balances: Vec<u64>,
	pub pre_token_balances: Vec<TokenBalanceRecord>,
	pub post_token_balances: Vec<TokenBalanceRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignatureState {
	/// Seen by the node but not yet at `confirmed`.
	Processed,
	Confirmed,
	Finalized,
	Failed(TransactionError),
}

/// Ledger capability consumed by every component. The production
/// implementation is [`SolanaClient`]; tests substitute their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerRpc: Send + Sync {
	async fn get_balance(&self, owner: &Pubkey) -> Result<u64, LedgerError>;
	async fn get_token_accounts(&self, owner: &Pubkey, program: TokenProgram) -> Result<Vec<ParsedTokenAccount>, LedgerError>;
	async fn get_recent_signatures(&self, address: &Pubkey, limit: usize) -> Result<Vec<String>, LedgerError>;
	/// `Ok(None)` when the node has no detail for the signature (e.g. pruned).
	async fn get_ledger_entry(&self, signature: &str) -> Result<Option<LedgerEntry>, LedgerError>;
	async fn account_exists(&self, address: &Pubkey) -> Result<bool, LedgerError>;
	async fn get_latest_blockhash(&self) -> Result<Hash, LedgerError>;
	async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, LedgerError>;
	/// `Ok(None)` when the node does not know the signature yet.
	async fn get_signature_status(&self, signature: &Signature) -> Result<Option<SignatureState>, LedgerError>;
}

#[async_trait]
impl LedgerRpc for SolanaClient {
	async fn get_balance(&self, owner: &Pubkey) -> Result<u64, LedgerError> {
		Ok(self.rpc.get_balance(owner).await?)
	}

	async fn get_token_accounts(&self, owner: &Pubkey, program: TokenProgram) -> Result<Vec<ParsedTokenAccount>, LedgerError> {
		let accounts = self
			.rpc
			.get_token_accounts_by_owner(owner, TokenAccountsFilter::ProgramId(program.id()))
			.await?;
		accounts.iter().map(parse_token_account).collect()
	}

	async fn get_recent_signatures(&self, address: &Pubkey, limit: usize) -> Result<Vec<String>, LedgerError> {
		let cfg = GetConfirmedSignaturesForAddress2Config {
			limit: Some(limit),
			commitment: Some(CommitmentConfig::confirmed()),
			..Default::default()
		};
		let sigs = self.rpc.get_signatures_for_address_with_config(address, cfg).await?;
		Ok(sigs.into_iter().map(|s| s.signature).collect())
	}

	async fn get_ledger_entry(&self, signature: &str) -> Result<Option<LedgerEntry>, LedgerError> {
		let sig: Signature = signature.parse().map_err(|e| LedgerError::Decode(format!("bad signature {signature}: {e}")))?;
		let cfg = RpcTransactionConfig {
			encoding: Some(UiTransactionEncoding::Json),
			commitment: Some(CommitmentConfig::confirmed()),
			max_supported_transaction_version: Some(0),
		};
		match self.rpc.get_transaction_with_config(&sig, cfg).await {
			Ok(tx) => Ok(ledger_entry_from_encoded(signature, &tx)),
			// The node answers `null` for pruned or unknown signatures, which surfaces as a decode error.
			Err(e) if matches!(e.kind(), solana_client::client_error::ClientErrorKind::SerdeJson(_)) => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn account_exists(&self, address: &Pubkey) -> Result<bool, LedgerError> {
		let resp = self.rpc.get_account_with_commitment(address, CommitmentConfig::confirmed()).await?;
		Ok(resp.value.is_some())
	}

	async fn get_latest_blockhash(&self) -> Result<Hash, LedgerError> {
		Ok(self.rpc.get_latest_blockhash().await?)
	}

	async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, LedgerError> {
		Ok(self.rpc.send_transaction(tx).await?)
	}

	async fn get_signature_status(&self, signature: &Signature) -> Result<Option<SignatureState>, LedgerError> {
		let resp = self.rpc.get_signature_statuses(&[*signature]).await?;
		let status = match resp.value.into_iter().next().flatten() {
			Some(s) => s,
			None => return Ok(None),
		};
		if let Some(err) = status.err {
			return Ok(Some(SignatureState::Failed(err)));
		}
		Ok(Some(match status.confirmation_status {
			Some(TransactionConfirmationStatus::Finalized) => SignatureState::Finalized,
			Some(TransactionConfirmationStatus::Confirmed) => SignatureState::Confirmed,
			Some(TransactionConfirmationStatus::Processed) => SignatureState::Processed,
			// Older nodes omit the field; a rooted status has `confirmations == None`.
			None if status.confirmations.is_none() => SignatureState::Finalized,
			None => SignatureState::Processed,
		}))
	}
}

fn parse_token_account(account: &RpcKeyedAccount) -> Result<ParsedTokenAccount, LedgerError> {
	let parsed = match &account.account.data {
		UiAccountData::Json(parsed) => &parsed.parsed,
		_ => return Err(LedgerError::Decode(format!("token account {} is not jsonParsed", account.pubkey))),
	};
	let info = parsed
		.get("info")
		.ok_or_else(|| LedgerError::Decode("missing info field".to_string()))?;
	let mint = info
		.get("mint")
		.and_then(|v| v.as_str())
		.ok_or_else(|| LedgerError::Decode("missing mint field".to_string()))?;
	let token_amount = info
		.get("tokenAmount")
		.ok_or_else(|| LedgerError::Decode("missing tokenAmount field".to_string()))?;
	let raw_amount = token_amount
		.get("amount")
		.and_then(|v| v.as_str())
		.and_then(|v| v.parse::<u64>().ok())
		.ok_or_else(|| LedgerError::Decode("missing amount field".to_string()))?;
	let decimals = token_amount
		.get("decimals")
		.and_then(|v| v.as_u64())
		.and_then(|v| u8::try_from(v).ok())
		.ok_or_else(|| LedgerError::Decode("missing decimals field".to_string()))?;
	Ok(ParsedTokenAccount { address: account.pubkey.clone(), mint: mint.to_string(), raw_amount, decimals })
}

fn token_records(balances: &OptionSerializer<Vec<UiTransactionTokenBalance>>) -> Vec<TokenBalanceRecord> {
	let entries = match balances {
		OptionSerializer::Some(list) => list,
		_ => return Vec::new(),
	};
	entries
		.iter()
		.map(|b| TokenBalanceRecord {
			account_index: b.account_index,
			mint: b.mint.clone(),
			owner: match &b.owner {
				OptionSerializer::Some(o) => Some(o.clone()),
				_ => None,
			},
			raw_amount: b.ui_token_amount.amount.parse().unwrap_or(0),
			decimals: b.ui_token_amount.decimals,
		})
		.collect()
}

/// Flattens an encoded transaction into a [`LedgerEntry`]. Returns `None`
/// when the node omitted the status meta.
pub fn ledger_entry_from_encoded(signature: &str, tx: &EncodedConfirmedTransactionWithStatusMeta) -> Option<LedgerEntry> {
	let meta = tx.transaction.meta.as_ref()?;
	let mut account_keys = match &tx.transaction.transaction {
		EncodedTransaction::Json(ui_tx) => match &ui_tx.message {
			UiMessage::Raw(msg) => msg.account_keys.clone(),
			UiMessage::Parsed(msg) => msg.account_keys.iter().map(|k| k.pubkey.clone()).collect(),
		},
		EncodedTransaction::Accounts(list) => list.account_keys.iter().map(|k| k.pubkey.clone()).collect(),
		_ => return None,
	};
	// v0 transactions append lookup-table addresses after the static keys.
	if let OptionSerializer::Some(loaded) = &meta.loaded_addresses {
		account_keys.extend(loaded.writable.iter().cloned());
		account_keys.extend(loaded.readonly.iter().cloned());
	}
	Some(LedgerEntry {
		signature: signature.to_string(),
		block_time: tx.block_time,
		account_keys,
		pre_balances: meta.pre_balances.clone(),
		post_balances: meta.post_balances.clone(),
		pre_token_balances: token_records(&meta.pre_token_balances),
		post_token_balances: token_records(&meta.post_token_balances),
	})
}

pub fn load_wallet_keypair(path: &str) -> AppResult<Arc<Keypair>> {
	// Prefer env-based secret if provided (WALLET_KEYPAIR_BASE64)
	if let Ok(b64) = std::env::var("WALLET_KEYPAIR_BASE64") {
		use base64::Engine as _;
		let bytes = base64::engine::general_purpose::STANDARD
			.decode(b64)
			.map_err(|e| AppError::Internal(format!("invalid base64 keypair: {e}")))?;
		let kp = Keypair::from_bytes(&bytes).map_err(|e| AppError::Internal(format!("invalid keypair bytes: {e}")))?;
		return Ok(Arc::new(kp));
	}
	use solana_sdk::signature::read_keypair_file;
	let kp = read_keypair_file(path).map_err(|e| AppError::Internal(format!("failed to read keypair: {e}")))?;
	Ok(Arc::new(kp))
}

pub fn build_compute_budget_instructions(units: u32, micro_lamports: u64) -> Vec<Instruction> {
	vec![
		ComputeBudgetInstruction::set_compute_unit_limit(units),
		ComputeBudgetInstruction::set_compute_unit_price(micro_lamports),
	]
}

// SPL Token helpers
pub fn derive_associated_token_address(owner: &Pubkey, mint: &Pubkey, program: TokenProgram) -> Pubkey {
	spl_ata::get_associated_token_address_with_program_id(owner, mint, &program.id())
}

pub fn build_create_ata_instruction(payer: &Pubkey, owner: &Pubkey, mint: &Pubkey, program: TokenProgram) -> Instruction {
	spl_ata::instruction::create_associated_token_account_idempotent(payer, owner, mint, &program.id())
}
