//! Signing, submission and confirmation of a built transfer.
//!
//! `Built → Signing → Submitted → Confirming → {Confirmed | Failed}`
//!
//! Plans that create a receiving account go through [`DirectPath`]: the
//! user's wallet pays the fee and rent and signs the whole transaction.
//! Everything else goes through [`RelayedPath`]: the user signs the message,
//! the backend relay countersigns as fee payer, and the client broadcasts.
//! Once a transaction is broadcast it cannot be cancelled; a confirmation
//! timeout is reported as a failure the caller has to check by hand.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use solana_sdk::{
	message::Message,
	pubkey::Pubkey,
	signature::{Signature, Signer},
	transaction::Transaction,
};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::classify::{classify, FailureCategory};
use crate::error::{RelayError, WithdrawalError};
use crate::metrics::Metrics;
use crate::relay::SigningRelay;
use crate::solana_client::{LedgerRpc, SignatureState};
use crate::transfer::TransferPlan;

pub type WalletSigner = Arc<dyn Signer + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WithdrawalState {
	Built,
	Signing,
	Submitted,
	Confirming,
	Confirmed,
	Failed,
}

impl WithdrawalState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, WithdrawalState::Confirmed | WithdrawalState::Failed)
	}

	pub fn can_transition_to(&self, next: WithdrawalState) -> bool {
		use WithdrawalState::*;
		matches!(
			(self, next),
			(Built, Signing) | (Signing, Submitted) | (Submitted, Confirming) | (Confirming, Confirmed) | (Built, Failed)
				| (Signing, Failed) | (Submitted, Failed) | (Confirming, Failed)
		)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WithdrawalOutcome {
	Confirmed {
		signature: String,
		#[serde(with = "time::serde::rfc3339")]
		confirmed_at: OffsetDateTime,
	},
	Failed {
		category: FailureCategory,
		message: String,
		/// Present when the transaction reached the ledger.
		signature: Option<String>,
	},
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
	pub interval: Duration,
	pub max_attempts: u32,
	/// Bound on a single status call, independent of the overall budget.
	pub call_timeout: Duration,
}

impl Default for PollConfig {
	fn default() -> Self {
		Self { interval: Duration::from_millis(500), max_attempts: 60, call_timeout: Duration::from_secs(2) }
	}
}

/// Signing capability for one submission path.
#[async_trait]
pub trait SubmissionPath: Send + Sync {
	async fn sign(&self, tx: Transaction) -> Result<Vec<u8>, WithdrawalError>;
	async fn broadcast(&self, signed: &[u8]) -> Result<Signature, WithdrawalError>;
}

fn serialize_tx(tx: &Transaction) -> Result<Vec<u8>, WithdrawalError> {
	bincode::serialize(tx).map_err(|e| WithdrawalError::Other(format!("serialize tx: {e}")))
}

fn deserialize_tx(bytes: &[u8]) -> Result<Transaction, WithdrawalError> {
	bincode::deserialize(bytes).map_err(|e| WithdrawalError::Other(format!("deserialize tx: {e}")))
}

async fn broadcast_wire(ledger: &dyn LedgerRpc, signed: &[u8], setup_instruction: Option<u8>) -> Result<Signature, WithdrawalError> {
	let tx = deserialize_tx(signed)?;
	ledger
		.send_transaction(&tx)
		.await
		.map_err(|source| WithdrawalError::Submission { source, setup_instruction })
}

/// Fee paid by the platform through the signing relay.
pub struct RelayedPath {
	ledger: Arc<dyn LedgerRpc>,
	relay: Arc<dyn SigningRelay>,
	user: WalletSigner,
}

impl RelayedPath {
	pub fn new(ledger: Arc<dyn LedgerRpc>, relay: Arc<dyn SigningRelay>, user: WalletSigner) -> Self {
		Self { ledger, relay, user }
	}
}

#[async_trait]
impl SubmissionPath for RelayedPath {
	async fn sign(&self, mut tx: Transaction) -> Result<Vec<u8>, WithdrawalError> {
		let user_key = self.user.pubkey();
		let position = tx.message.account_keys[..usize::from(tx.message.header.num_required_signatures)]
			.iter()
			.position(|k| *k == user_key)
			.ok_or_else(|| WithdrawalError::Other("wallet is not a signer of this transaction".to_string()))?;
		let user_sig = self.user.try_sign_message(&tx.message_data()).map_err(WithdrawalError::Signing)?;
		tx.signatures[position] = user_sig;

		let partial = STANDARD.encode(serialize_tx(&tx)?);
		let returned = self.relay.countersign(partial).await?;
		let bytes = STANDARD.decode(returned).map_err(|e| RelayError::Decode(e.to_string()))?;
		let signed: Transaction = bincode::deserialize(&bytes).map_err(|e| RelayError::Decode(e.to_string()))?;

		// The relay may only add the fee-payer signature.
		if signed.message != tx.message || signed.signatures.get(position) != Some(&user_sig) {
			return Err(RelayError::Tampered.into());
		}
		signed
			.verify()
			.map_err(|e| RelayError::Decode(format!("countersigned transaction does not verify: {e}")))?;
		Ok(bytes)
	}

	async fn broadcast(&self, signed: &[u8]) -> Result<Signature, WithdrawalError> {
		broadcast_wire(self.ledger.as_ref(), signed, None).await
	}
}

/// Fee and rent paid by the user's own wallet.
pub struct DirectPath {
	ledger: Arc<dyn LedgerRpc>,
	user: WalletSigner,
	setup_instruction: Option<u8>,
}

impl DirectPath {
	pub fn new(ledger: Arc<dyn LedgerRpc>, user: WalletSigner, setup_instruction: Option<u8>) -> Self {
		Self { ledger, user, setup_instruction }
	}
}

#[async_trait]
impl SubmissionPath for DirectPath {
	async fn sign(&self, mut tx: Transaction) -> Result<Vec<u8>, WithdrawalError> {
		let blockhash = tx.message.recent_blockhash;
		let user: &dyn Signer = self.user.as_ref();
		let signers = vec![user];
		tx.try_sign(&signers, blockhash).map_err(WithdrawalError::Signing)?;
		serialize_tx(&tx)
	}

	async fn broadcast(&self, signed: &[u8]) -> Result<Signature, WithdrawalError> {
		broadcast_wire(self.ledger.as_ref(), signed, self.setup_instruction).await
	}
}

/// Polls until the ledger reports a terminal status, an execution error, or
/// the attempt budget runs out. Transport errors on individual polls are not
/// terminal.
pub async fn await_confirmation(ledger: &dyn LedgerRpc, signature: &Signature, poll: &PollConfig) -> Result<OffsetDateTime, WithdrawalError> {
	let deadline = Instant::now() + poll.interval * poll.max_attempts + poll.call_timeout;
	let mut attempts = 0;
	while attempts < poll.max_attempts {
		attempts += 1;
		match timeout(poll.call_timeout, ledger.get_signature_status(signature)).await {
			Ok(Ok(Some(SignatureState::Failed(error)))) => {
				return Err(WithdrawalError::Execution { signature: signature.to_string(), error });
			}
			Ok(Ok(Some(SignatureState::Confirmed | SignatureState::Finalized))) => {
				debug!(signature = %signature, attempts, "transaction confirmed");
				return Ok(OffsetDateTime::now_utc());
			}
			Ok(Ok(_)) => {}
			Ok(Err(e)) => warn!(signature = %signature, attempt = attempts, error = %e, "status poll failed"),
			Err(_) => warn!(signature = %signature, attempt = attempts, "status poll timed out"),
		}
		if attempts == poll.max_attempts || Instant::now() >= deadline {
			break;
		}
		sleep(poll.interval).await;
	}
	Err(WithdrawalError::ConfirmationTimeout { signature: signature.to_string(), attempts })
}

struct Tracker {
	state: WithdrawalState,
}

impl Tracker {
	fn advance(&mut self, next: WithdrawalState) {
		debug_assert!(self.state.can_transition_to(next), "{:?} -> {:?}", self.state, next);
		info!(from = ?self.state, to = ?next, "withdrawal state");
		self.state = next;
	}
}

#[derive(Clone)]
pub struct WithdrawalPipeline {
	ledger: Arc<dyn LedgerRpc>,
	relay: Arc<dyn SigningRelay>,
	relay_fee_payer: Pubkey,
	poll: PollConfig,
	metrics: Option<Arc<Metrics>>,
}

impl WithdrawalPipeline {
	pub fn new(ledger: Arc<dyn LedgerRpc>, relay: Arc<dyn SigningRelay>, relay_fee_payer: Pubkey, poll: PollConfig) -> Self {
		Self { ledger, relay, relay_fee_payer, poll, metrics: None }
	}

	pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
		self.metrics = Some(metrics);
		self
	}

	/// Drives `plan` from `Built` to a terminal outcome.
	pub async fn execute(&self, plan: &TransferPlan, user: WalletSigner) -> WithdrawalOutcome {
		let started = std::time::Instant::now();
		let mut tracker = Tracker { state: WithdrawalState::Built };
		let mut submitted: Option<Signature> = None;

		let result = self.run(plan, user, &mut tracker, &mut submitted).await;
		if let Some(m) = &self.metrics {
			m.withdrawal_duration.observe(started.elapsed().as_secs_f64());
		}

		match result {
			Ok((signature, confirmed_at)) => {
				tracker.advance(WithdrawalState::Confirmed);
				if let Some(m) = &self.metrics {
					m.withdrawals_confirmed.inc();
				}
				WithdrawalOutcome::Confirmed { signature: signature.to_string(), confirmed_at }
			}
			Err(err) => {
				tracker.advance(WithdrawalState::Failed);
				let classified = classify(&err);
				error!(category = classified.category.as_str(), error = %err, "withdrawal failed");
				if let Some(m) = &self.metrics {
					m.withdrawals_failed.with_label_values(&[classified.category.as_str()]).inc();
					if classified.text_fallback {
						m.classifier_text_fallbacks.inc();
					}
				}
				WithdrawalOutcome::Failed {
					category: classified.category,
					message: classified.message,
					signature: submitted.map(|s| s.to_string()),
				}
			}
		}
	}

	async fn run(
		&self,
		plan: &TransferPlan,
		user: WalletSigner,
		tracker: &mut Tracker,
		submitted: &mut Option<Signature>,
	) -> Result<(Signature, OffsetDateTime), WithdrawalError> {
		if user.pubkey() != plan.sender {
			return Err(WithdrawalError::Other("signing wallet does not match the transfer sender".to_string()));
		}
		let setup_instruction = plan.setup_instruction_index();
		let (fee_payer, path): (Pubkey, Box<dyn SubmissionPath>) = if plan.requires_new_account {
			(plan.sender, Box::new(DirectPath::new(self.ledger.clone(), user, setup_instruction)))
		} else {
			(self.relay_fee_payer, Box::new(RelayedPath::new(self.ledger.clone(), self.relay.clone(), user)))
		};

		let blockhash = self
			.ledger
			.get_latest_blockhash()
			.await
			.map_err(|source| WithdrawalError::Submission { source, setup_instruction })?;
		let message = Message::new_with_blockhash(&plan.instructions, Some(&fee_payer), &blockhash);
		let tx = Transaction::new_unsigned(message);

		tracker.advance(WithdrawalState::Signing);
		let signed = path.sign(tx).await?;
		let expected = deserialize_tx(&signed)?
			.signatures
			.first()
			.copied()
			.ok_or_else(|| WithdrawalError::Other("signed transaction has no signatures".to_string()))?;

		// A lost reply does not mean the transaction was dropped; the ledger decides.
		let signature = match path.broadcast(&signed).await {
			Ok(signature) => signature,
			Err(WithdrawalError::Submission { source, .. }) if source.is_indeterminate() => {
				warn!(signature = %expected, error = %source, "broadcast reply lost, checking ledger for the transaction");
				expected
			}
			Err(e) => return Err(e),
		};
		*submitted = Some(signature);
		tracker.advance(WithdrawalState::Submitted);
		if let Some(m) = &self.metrics {
			m.withdrawals_submitted.inc();
		}
		info!(signature = %signature, direct = plan.requires_new_account, "withdrawal submitted");

		tracker.advance(WithdrawalState::Confirming);
		let confirmed_at = await_confirmation(self.ledger.as_ref(), &signature, &self.poll).await?;
		Ok((signature, confirmed_at))
	}
}
