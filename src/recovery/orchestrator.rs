//! Lifecycle orchestration for one account.
//!
//! `RecoveryOrchestrator` owns the [`AccountRecord`] and is the only place lifecycle transitions
//! happen. Stages exchange data exclusively through the record: the provisioner fills in the
//! wallet and account code, the installer marks the module installed, the registrar moves the
//! account to `GuardianConfigured` and the coordinator drives it through recovery.
//!
//! Every transition is checked, persisted best-effort and announced as a
//! [`LifecycleEvent::StateChanged`]. Every error returned to the caller is also announced as a
//! [`LifecycleEvent::Error`]. A failure never moves the state backwards.

use crate::chain::{Address, ChainClient, GuardianConfig, Receipt, RecoveryRequest};
use crate::recovery::coordinator::RecoveryCoordinator;
use crate::recovery::events::{
	ChannelEventHandler, EventDispatcher, LifecycleEvent, LifecycleEventHandler, LoggingEventHandler, Stage,
};
use crate::recovery::installer::{InstallConfig, ModuleInstaller, build_install_payload};
use crate::recovery::polling::CancellationSignal;
use crate::recovery::provisioner::{AccountProvisioner, AddressDerivation, ProvisionedWallet};
use crate::recovery::repositories::KeyValueStore;
use crate::recovery::registrar::GuardianRegistrar;
use crate::recovery::state_persistence::AccountStateStore;
use crate::recovery::types::{
	AccountId, AccountRecord, LifecycleState, OwnerKeyRef, PendingRecovery, RecoveryError, RecoverySettings,
};
use crate::relay::{AccountCode, CompletionResult, RelayClient, RelayTicket};

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct RecoveryOrchestrator<C, R> {
	record: AccountRecord,
	state: AccountStateStore,
	settings: RecoverySettings,
	provisioner: AccountProvisioner,
	installer: ModuleInstaller<C>,
	registrar: GuardianRegistrar<C, R>,
	coordinator: RecoveryCoordinator<C, R>,
	dispatcher: EventDispatcher,
	cancel: CancellationSignal,
}

impl<C: ChainClient, R: RelayClient> RecoveryOrchestrator<C, R> {
	/// Create an orchestrator for `account_id`, starting in `AwaitingGuardianSetup`.
	///
	/// Call [`resume`](Self::resume) to pick up persisted or on-chain progress.
	pub fn new(
		account_id: AccountId,
		chain: Arc<C>,
		relay: Arc<R>,
		store: Arc<dyn KeyValueStore>,
		derivation: Box<dyn AddressDerivation>,
		settings: RecoverySettings,
	) -> Self {
		let state = AccountStateStore::new(store, &account_id);
		let provisioner = AccountProvisioner::new(derivation, state.clone());
		let installer = ModuleInstaller::new(chain.clone(), settings.policy.clone());
		let registrar = GuardianRegistrar::new(
			chain.clone(),
			relay.clone(),
			settings.module,
			settings.template_idx,
			settings.policy.clone(),
		);
		let coordinator = RecoveryCoordinator::new(chain, relay, settings.clone());

		let mut dispatcher = EventDispatcher::new();
		dispatcher.register_handler(Box::new(LoggingEventHandler));

		Self {
			record: AccountRecord::new(account_id),
			state,
			settings,
			provisioner,
			installer,
			registrar,
			coordinator,
			dispatcher,
			cancel: CancellationSignal::new(),
		}
	}

	pub fn record(&self) -> &AccountRecord {
		&self.record
	}

	pub fn state(&self) -> LifecycleState {
		self.record.lifecycle_state
	}

	pub fn register_handler(&mut self, handler: Box<dyn LifecycleEventHandler>) {
		self.dispatcher.register_handler(handler);
	}

	/// Receive every lifecycle event of this account from now on.
	pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
		let (handler, receiver) = ChannelEventHandler::channel();
		self.dispatcher.register_handler(Box::new(handler));
		receiver
	}

	/// Signal that stops every wait of this orchestrator when fired.
	pub fn cancellation(&self) -> CancellationSignal {
		self.cancel.clone()
	}

	/// Stop in-flight and future waits. They return `Cancelled`.
	pub fn shutdown(&self) {
		info!("Shutting down orchestrator for {}", self.record.account_id);
		self.cancel.cancel();
	}

	/// Reconcile the record with persisted state and the chain.
	///
	/// The persisted snapshot is loaded first. The chain is then asked how far the account got,
	/// and the state is advanced one transition at a time so no state is skipped. A stale
	/// recovery request found on-chain resumes into `RecoveryRequested`.
	pub async fn resume(&mut self) -> Result<LifecycleState, RecoveryError> {
		let result = self.reconcile().await;
		self.observe(Stage::Resume, result).await
	}

	async fn reconcile(&mut self) -> Result<LifecycleState, RecoveryError> {
		if let Some(persisted) = self.state.load_record().await? {
			if persisted.account_id == self.record.account_id {
				debug!("Loaded persisted record for {}", persisted.account_id);
				self.record = persisted;
			} else {
				warn!(
					"Ignoring persisted record of {} in namespace {}",
					persisted.account_id, self.record.account_id
				);
			}
		}
		if self.record.account_code.is_none() {
			self.record.account_code = self.state.load_account_code().await?;
		}
		if self.record.wallet_address.is_none() {
			self.record.wallet_address = self
				.state
				.load_wallet_config()
				.await?
				.map(|config| config.wallet_address);
		}

		let Some(wallet) = self.record.wallet_address else {
			return Ok(self.record.lifecycle_state);
		};

		loop {
			let next = match self.record.lifecycle_state {
				LifecycleState::AwaitingGuardianSetup => self
					.guardians_configured_on_chain(wallet)
					.await?
					.then_some(LifecycleState::GuardianConfigured),
				LifecycleState::GuardianConfigured => self
					.coordinator
					.read_recovery_request(wallet)
					.await?
					.is_outstanding()
					.then_some(LifecycleState::RecoveryRequested),
				LifecycleState::RecoveryRequested => self
					.coordinator
					.is_recovery_ready(wallet)
					.await?
					.then_some(LifecycleState::RecoveryReady),
				LifecycleState::RecoveryReady | LifecycleState::RecoveryCompleted => None,
			};
			match next {
				Some(next) => self.transition(next).await?,
				None => break,
			}
		}

		self.persist().await;
		info!("Resumed {} in {}", self.record.account_id, self.record.lifecycle_state);
		Ok(self.record.lifecycle_state)
	}

	async fn guardians_configured_on_chain(&mut self, wallet: Address) -> Result<bool, RecoveryError> {
		if !self.record.module_installed {
			if !self.installer.is_installed(wallet, self.settings.module).await? {
				return Ok(false);
			}
			self.record.module_installed = true;
		}
		Ok(self.registrar.guardian_config(wallet).await?.acceptance_complete())
	}

	/// Attach an already deployed wallet instead of provisioning one.
	pub async fn attach_wallet(&mut self, wallet: Address) -> Result<(), RecoveryError> {
		let result = self.attach(wallet).await;
		self.observe(Stage::Provision, result).await
	}

	async fn attach(&mut self, wallet: Address) -> Result<(), RecoveryError> {
		match self.record.wallet_address {
			Some(current) if current == wallet => return Ok(()),
			Some(current) if self.record.lifecycle_state != LifecycleState::AwaitingGuardianSetup => {
				return Err(RecoveryError::Provision(format!(
					"account {} is bound to {} while {}",
					self.record.account_id, current, self.record.lifecycle_state
				)));
			}
			_ => {}
		}
		self.record.wallet_address = Some(wallet);
		self.record.module_installed = false;
		self.state.save_wallet_config(wallet).await?;
		self.persist().await;
		info!("Attached wallet {} to {}", wallet, self.record.account_id);
		Ok(())
	}

	/// Provision a fresh counterfactual wallet for `owner`.
	pub async fn provision_account(&mut self, owner: Option<&OwnerKeyRef>) -> Result<ProvisionedWallet, RecoveryError> {
		let result = self.provision(owner).await;
		self.observe(Stage::Provision, result).await
	}

	async fn provision(&mut self, owner: Option<&OwnerKeyRef>) -> Result<ProvisionedWallet, RecoveryError> {
		if self.record.lifecycle_state != LifecycleState::AwaitingGuardianSetup {
			return Err(RecoveryError::Provision(format!(
				"cannot provision a new wallet while {}",
				self.record.lifecycle_state
			)));
		}
		let provisioned = self.provisioner.provision(owner).await?;
		self.record.owner_key_ref = owner.cloned();
		self.record.salt_nonce = Some(provisioned.salt_nonce);
		self.record.wallet_address = Some(provisioned.wallet_address);
		self.record.module_installed = false;
		self.persist().await;
		Ok(provisioned)
	}

	pub async fn ensure_account_code(&mut self) -> Result<AccountCode, RecoveryError> {
		let result = self.provisioner.ensure_account_code().await;
		let code = self.observe(Stage::Provision, result).await?;
		if self.record.account_code.as_ref() != Some(&code) {
			self.record.account_code = Some(code.clone());
			self.persist().await;
		}
		Ok(code)
	}

	/// Guardian address of `email` for this account, as the installer expects it.
	pub async fn guardian_address(&mut self, email: &str) -> Result<Address, RecoveryError> {
		let result = self.resolve_guardian(email).await;
		self.observe(Stage::GuardianAcceptance, result).await
	}

	async fn resolve_guardian(&self, email: &str) -> Result<Address, RecoveryError> {
		let wallet = self.record.wallet()?;
		let code = self
			.record
			.account_code
			.as_ref()
			.ok_or(RecoveryError::MissingAccountCode)?;
		self.registrar.guardian_address(wallet, code, email).await
	}

	/// Install the recovery module with `config`, unless it is installed already.
	///
	/// Returns the install receipt, or `None` when the install was skipped.
	pub async fn install_module(&mut self, config: &InstallConfig) -> Result<Option<Receipt>, RecoveryError> {
		let result = self.install(config).await;
		self.observe(Stage::Install, result).await
	}

	async fn install(&mut self, config: &InstallConfig) -> Result<Option<Receipt>, RecoveryError> {
		self.expect_state(LifecycleState::AwaitingGuardianSetup, LifecycleState::GuardianConfigured)?;
		let wallet = self.record.wallet()?;
		let module = self.settings.module;

		if self.record.module_installed || self.installer.is_installed(wallet, module).await? {
			info!("Module {} already installed on {}", module, wallet);
			self.mark_installed().await;
			return Ok(None);
		}

		let payload = build_install_payload(module, config)?;
		let handle = self.installer.install(wallet, &payload).await?;
		let receipt = self.installer.await_installed(&handle).await?;
		self.mark_installed().await;
		Ok(Some(receipt))
	}

	async fn mark_installed(&mut self) {
		if !self.record.module_installed {
			self.record.module_installed = true;
			self.record.touch();
			self.persist().await;
		}
	}

	/// Ask the guardian behind `email` to accept guarding this account.
	pub async fn request_guardian_acceptance(&mut self, email: Option<&str>) -> Result<RelayTicket, RecoveryError> {
		let result = self.request_acceptance(email).await;
		self.observe(Stage::GuardianAcceptance, result).await
	}

	async fn request_acceptance(&mut self, email: Option<&str>) -> Result<RelayTicket, RecoveryError> {
		self.expect_state(LifecycleState::AwaitingGuardianSetup, LifecycleState::GuardianConfigured)?;
		let wallet = self.record.wallet()?;
		let ticket = self
			.registrar
			.request_acceptance(wallet, email, self.record.account_code.as_ref())
			.await?;
		self.record.acceptance_ticket = Some(ticket.clone());
		self.record.touch();
		self.persist().await;
		Ok(ticket)
	}

	/// Wait until guardian acceptance is visible on-chain, then enter `GuardianConfigured`.
	pub async fn await_guardian_acceptance(&mut self) -> Result<GuardianConfig, RecoveryError> {
		let result = self.wait_for_acceptance().await;
		self.observe(Stage::GuardianAcceptance, result).await
	}

	async fn wait_for_acceptance(&mut self) -> Result<GuardianConfig, RecoveryError> {
		self.expect_state(LifecycleState::AwaitingGuardianSetup, LifecycleState::GuardianConfigured)?;
		let wallet = self.record.wallet()?;
		let config = self.registrar.await_acceptance(wallet, self.cancel.clone()).await?;
		self.transition(LifecycleState::GuardianConfigured).await?;
		Ok(config)
	}

	pub async fn current_owners(&self) -> Result<Vec<Address>, RecoveryError> {
		self.coordinator.current_owners(self.record.wallet()?).await
	}

	/// Request recovery of the wallet from `old_owner` to `new_owner`.
	pub async fn request_recovery(
		&mut self,
		guardian_email: Option<&str>,
		old_owner: Address,
		new_owner: Address,
	) -> Result<PendingRecovery, RecoveryError> {
		let result = self.submit_recovery(guardian_email, old_owner, new_owner).await;
		self.observe(Stage::RecoveryRequest, result).await
	}

	async fn submit_recovery(
		&mut self,
		guardian_email: Option<&str>,
		old_owner: Address,
		new_owner: Address,
	) -> Result<PendingRecovery, RecoveryError> {
		let pending = self
			.coordinator
			.request_recovery(&self.record, guardian_email, old_owner, new_owner)
			.await?;
		self.record.pending_recovery = Some(pending.clone());
		self.transition(LifecycleState::RecoveryRequested).await?;
		Ok(pending)
	}

	/// Wait until the guardians approved the recovery, then enter `RecoveryReady`.
	pub async fn await_recovery_ready(&mut self) -> Result<RecoveryRequest, RecoveryError> {
		let result = self.wait_for_recovery().await;
		self.observe(Stage::RecoveryWait, result).await
	}

	async fn wait_for_recovery(&mut self) -> Result<RecoveryRequest, RecoveryError> {
		self.expect_state(LifecycleState::RecoveryRequested, LifecycleState::RecoveryReady)?;
		let wallet = self.record.wallet()?;
		let request = self
			.coordinator
			.await_recovery_ready(wallet, self.cancel.clone())
			.await?;
		self.transition(LifecycleState::RecoveryReady).await?;
		Ok(request)
	}

	/// Execute the ownership transfer. On failure the state stays `RecoveryReady`.
	pub async fn complete_recovery(&mut self) -> Result<CompletionResult, RecoveryError> {
		let result = self.execute_recovery().await;
		self.observe(Stage::RecoveryCompletion, result).await
	}

	async fn execute_recovery(&mut self) -> Result<CompletionResult, RecoveryError> {
		let outcome = self.coordinator.complete_recovery(&self.record).await?;
		self.transition(LifecycleState::RecoveryCompleted).await?;
		Ok(outcome)
	}

	fn expect_state(&self, expected: LifecycleState, target: LifecycleState) -> Result<(), RecoveryError> {
		if self.record.lifecycle_state == expected {
			Ok(())
		} else {
			Err(RecoveryError::InvalidTransition {
				from: self.record.lifecycle_state,
				to: target,
			})
		}
	}

	async fn transition(&mut self, to: LifecycleState) -> Result<(), RecoveryError> {
		let from = self.record.lifecycle_state;
		if !from.can_transition_to(to) {
			return Err(RecoveryError::InvalidTransition { from, to });
		}
		self.record.lifecycle_state = to;
		self.record.touch();
		self.persist().await;

		let event = LifecycleEvent::StateChanged {
			account_id: self.record.account_id.clone(),
			state: to,
		};
		self.dispatcher.dispatch(&event).await;
		Ok(())
	}

	async fn persist(&self) {
		// the chain stays authoritative, so a lost snapshot only costs a slower resume
		if let Err(e) = self.state.save_record(&self.record).await {
			warn!("Failed to persist record for {}: {}", self.record.account_id, e);
		}
	}

	async fn observe<T>(&mut self, stage: Stage, result: Result<T, RecoveryError>) -> Result<T, RecoveryError> {
		let event = result.as_ref().err().map(|e| LifecycleEvent::Error {
			account_id: self.record.account_id.clone(),
			kind: e.kind(),
			stage,
			message: e.to_string(),
		});
		if let Some(event) = event {
			self.dispatcher.dispatch(&event).await;
		}
		result
	}
}

impl<C, R> Drop for RecoveryOrchestrator<C, R> {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}
