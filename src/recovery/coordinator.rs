//! Recovery request, approval tracking and completion.
//!
//! The coordinator owns the second half of the lifecycle. It submits the recovery request through
//! the relay, polls the module until the guardians' approval weight reaches the threshold, and
//! hands the ownership transfer to the relay. The recovered wallet never signs anything itself,
//! since its owner key is the one being replaced. Only the completion call data depends on the
//! module kind: a Safe swaps the owner, a universal module changes the validator's owner.

use crate::chain::{Address, ChainClient, ChainQuery, RecoveryRequest};
use crate::config::ConfigError;
use crate::recovery::polling::{CancellationSignal, poll_stream, submit_with_retry, with_deadline};
use crate::recovery::registrar::require_email;
use crate::recovery::subject::recovery_subject;
use crate::recovery::types::{
	AccountRecord, LifecycleState, ModuleKind, PendingRecovery, RecoveryError, RecoverySettings,
};
use crate::relay::{CompletionResult, RelayClient, RelayTicket, TicketKind};
use crate::transaction::builder::{swap_owner_call, universal_recovery_data};
use crate::utils::format_weight;

use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct RecoveryCoordinator<C, R> {
	chain: Arc<C>,
	relay: Arc<R>,
	settings: RecoverySettings,
}

impl<C: ChainClient, R: RelayClient> RecoveryCoordinator<C, R> {
	pub fn new(chain: Arc<C>, relay: Arc<R>, settings: RecoverySettings) -> Self {
		Self {
			chain,
			relay,
			settings,
		}
	}

	fn validator(&self) -> Result<Address, RecoveryError> {
		self.settings
			.validator
			.ok_or_else(|| ConfigError::Invalid("validator address is required for universal modules".into()).into())
	}

	/// Current owners of `wallet`, asked from the wallet itself or from its validator.
	pub async fn current_owners(&self, wallet: Address) -> Result<Vec<Address>, RecoveryError> {
		let contract = match self.settings.module_kind {
			ModuleKind::Safe => wallet,
			ModuleKind::Universal => self.validator()?,
		};
		let query = ChainQuery::Owners { account: wallet };
		let value = with_deadline(self.settings.policy.call_timeout, self.chain.read_state(&contract, &query)).await?;
		Ok(value.into_owners(&query)?)
	}

	pub async fn read_recovery_request(&self, wallet: Address) -> Result<RecoveryRequest, RecoveryError> {
		let query = ChainQuery::RecoveryRequest { account: wallet };
		let value = with_deadline(
			self.settings.policy.call_timeout,
			self.chain.read_state(&self.settings.module, &query),
		)
		.await?;
		Ok(value.into_recovery_request(&query)?)
	}

	pub async fn is_recovery_ready(&self, wallet: Address) -> Result<bool, RecoveryError> {
		Ok(self.read_recovery_request(wallet).await?.is_ready())
	}

	/// Ask the guardians to approve moving `record`'s wallet from `old_owner` to `new_owner`.
	///
	/// Only valid once guardians are configured. The returned [`PendingRecovery`] is what the
	/// orchestrator records on entering `RecoveryRequested`.
	pub async fn request_recovery(
		&self,
		record: &AccountRecord,
		guardian_email: Option<&str>,
		old_owner: Address,
		new_owner: Address,
	) -> Result<PendingRecovery, RecoveryError> {
		let email = require_email(guardian_email)?;
		self.submit_recovery_request(record, email, old_owner, new_owner)
			.await
			.map_err(RecoveryError::recovery_request_failed)
	}

	async fn submit_recovery_request(
		&self,
		record: &AccountRecord,
		email: &str,
		old_owner: Address,
		new_owner: Address,
	) -> Result<PendingRecovery, RecoveryError> {
		if record.lifecycle_state != LifecycleState::GuardianConfigured {
			return Err(RecoveryError::recovery_request(format!(
				"cannot request recovery while {}",
				record.lifecycle_state
			)));
		}
		let wallet = record.wallet()?;

		let owners = self.current_owners(wallet).await?;
		if owners.contains(&new_owner) {
			return Err(RecoveryError::recovery_request(format!(
				"{} already owns {}",
				new_owner, wallet
			)));
		}

		// the module is the final arbiter; this only avoids an obviously doomed request
		let existing = self.read_recovery_request(wallet).await?;
		if existing.is_outstanding() {
			return Err(RecoveryError::recovery_request(format!(
				"a recovery request for {} is already collecting approvals ({})",
				wallet,
				format_weight(existing.current_weight, existing.threshold)
			)));
		}

		let subject = recovery_subject(&wallet, &old_owner, &new_owner);
		let relay = &self.relay;
		let module = self.settings.module;
		let template_idx = self.settings.template_idx;
		let subject_ref = subject.as_str();
		let request_id = submit_with_retry(&self.settings.policy, "recoveryRequest", || async move {
			relay
				.submit_recovery(&module, email, template_idx, subject_ref)
				.await
				.map_err(RecoveryError::from)
		})
		.await?;

		info!("Requested recovery of {} to {} ({})", wallet, new_owner, request_id);
		Ok(PendingRecovery {
			old_owner,
			new_owner,
			ticket: Some(RelayTicket::new(request_id, TicketKind::Recovery, wallet)),
		})
	}

	/// Poll the recovery request of `wallet` until its weight reaches the threshold.
	pub fn poll_recovery(
		&self,
		wallet: Address,
		interval: Duration,
		cancel: CancellationSignal,
	) -> BoxStream<'_, RecoveryRequest> {
		poll_stream(
			"recovery request",
			interval,
			self.settings.policy.call_timeout,
			cancel,
			move || self.read_recovery_request(wallet),
			RecoveryRequest::is_ready,
		)
	}

	/// Wait until the recovery of `wallet` can be completed.
	pub async fn await_recovery_ready(
		&self,
		wallet: Address,
		cancel: CancellationSignal,
	) -> Result<RecoveryRequest, RecoveryError> {
		let mut requests = self.poll_recovery(wallet, self.settings.policy.poll_interval, cancel);
		while let Some(request) = requests.next().await {
			debug!(
				"Recovery weight for {}: {}",
				wallet,
				format_weight(request.current_weight, request.threshold)
			);
			if request.is_ready() {
				info!("Recovery of {} is ready", wallet);
				return Ok(request);
			}
		}
		Err(RecoveryError::Cancelled)
	}

	/// Execute the ownership transfer of a ready recovery.
	///
	/// Every failure is reported as a completion error; the caller may retry.
	pub async fn complete_recovery(&self, record: &AccountRecord) -> Result<CompletionResult, RecoveryError> {
		self.execute_completion(record)
			.await
			.map_err(RecoveryError::recovery_completion_failed)
	}

	/// Call data the relay passes to the module's `completeRecovery`.
	fn completion_data(&self, pending: &PendingRecovery) -> Result<Vec<u8>, RecoveryError> {
		Ok(match self.settings.module_kind {
			ModuleKind::Safe => swap_owner_call(pending.old_owner, pending.new_owner),
			ModuleKind::Universal => universal_recovery_data(self.validator()?, pending.new_owner),
		})
	}

	async fn execute_completion(&self, record: &AccountRecord) -> Result<CompletionResult, RecoveryError> {
		if record.lifecycle_state != LifecycleState::RecoveryReady {
			return Err(RecoveryError::InvalidTransition {
				from: record.lifecycle_state,
				to: LifecycleState::RecoveryCompleted,
			});
		}
		let wallet = record.wallet()?;
		let pending = record
			.pending_recovery
			.as_ref()
			.ok_or_else(|| RecoveryError::recovery_request(format!("no recovery pending for {}", wallet)))?;

		let call_data = self.completion_data(pending)?;
		let relay = &self.relay;
		let module = self.settings.module;
		let call_data = call_data.as_slice();
		let result = submit_with_retry(&self.settings.policy, "completeRequest", || async move {
			relay
				.submit_completion(&module, &wallet, call_data)
				.await
				.map_err(RecoveryError::from)
		})
		.await?;
		info!("Relay completed recovery of {}", wallet);
		Ok(result)
	}
}
