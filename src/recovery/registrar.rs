//! Guardian registration.
//!
//! Guardians are asked through the relay to accept guarding the account. Acceptance is observed
//! only on-chain: the registrar polls the module's guardian config until the accepted weight
//! reaches the threshold.

use crate::chain::{Address, ChainClient, ChainQuery, GuardianConfig};
use crate::recovery::polling::{CancellationSignal, RetryPolicy, poll_stream, submit_with_retry, with_deadline};
use crate::recovery::subject::acceptance_subject;
use crate::recovery::types::RecoveryError;
use crate::relay::{AccountCode, RelayClient, RelayTicket, TicketKind};
use crate::utils::format_weight;

use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct GuardianRegistrar<C, R> {
	chain: Arc<C>,
	relay: Arc<R>,
	module: Address,
	template_idx: u32,
	policy: RetryPolicy,
}

/// Reject absent or blank guardian emails.
pub(crate) fn require_email(email: Option<&str>) -> Result<&str, RecoveryError> {
	email
		.map(str::trim)
		.filter(|email| !email.is_empty())
		.ok_or(RecoveryError::MissingGuardianEmail)
}

impl<C: ChainClient, R: RelayClient> GuardianRegistrar<C, R> {
	pub fn new(chain: Arc<C>, relay: Arc<R>, module: Address, template_idx: u32, policy: RetryPolicy) -> Self {
		Self {
			chain,
			relay,
			module,
			template_idx,
			policy,
		}
	}

	/// Address of the email-auth contract acting as guardian `email` for `account`.
	pub async fn guardian_address(
		&self,
		account: Address,
		account_code: &AccountCode,
		email: &str,
	) -> Result<Address, RecoveryError> {
		let email = require_email(Some(email))?;
		let relay = &self.relay;
		let salt = submit_with_retry(&self.policy, "getAccountSalt", || async move {
			relay
				.get_account_salt(account_code, email)
				.await
				.map_err(RecoveryError::from)
		})
		.await?;

		let query = ChainQuery::ComputeEmailAuthAddress { account, salt };
		let value = with_deadline(self.policy.call_timeout, self.chain.read_state(&self.module, &query)).await?;
		let guardian = value.into_address(&query)?;
		debug!("Guardian {} resolves to {}", email, guardian);
		Ok(guardian)
	}

	/// Ask the guardian behind `guardian_email` to accept guarding `account`.
	pub async fn request_acceptance(
		&self,
		account: Address,
		guardian_email: Option<&str>,
		account_code: Option<&AccountCode>,
	) -> Result<RelayTicket, RecoveryError> {
		let email = require_email(guardian_email)?;
		let account_code = account_code.ok_or(RecoveryError::MissingAccountCode)?;

		let query = ChainQuery::AcceptanceCommandTemplates;
		let value = with_deadline(self.policy.call_timeout, self.chain.read_state(&self.module, &query)).await?;
		let templates = value.into_command_templates(&query)?;
		let subject = acceptance_subject(&templates, self.template_idx, &account)?;

		let relay = &self.relay;
		let module = self.module;
		let template_idx = self.template_idx;
		let subject = subject.as_str();
		let request_id = submit_with_retry(&self.policy, "acceptanceRequest", || async move {
			relay
				.submit_acceptance(&module, email, account_code, template_idx, subject)
				.await
				.map_err(RecoveryError::from)
		})
		.await?;

		info!("Requested guardian acceptance for {} ({})", account, request_id);
		Ok(RelayTicket::new(request_id, TicketKind::Acceptance, account))
	}

	/// Poll the guardian config of `account` every `interval`.
	///
	/// The stream ends after the first snapshot whose accepted weight reached the threshold, or
	/// on cancellation. Calling this again starts a fresh sequence.
	pub fn poll_acceptance(
		&self,
		account: Address,
		interval: Duration,
		cancel: CancellationSignal,
	) -> BoxStream<'_, GuardianConfig> {
		poll_stream(
			"guardian config",
			interval,
			self.policy.call_timeout,
			cancel,
			move || self.guardian_config(account),
			GuardianConfig::acceptance_complete,
		)
	}

	/// Single read of the guardian config of `account`.
	pub async fn guardian_config(&self, account: Address) -> Result<GuardianConfig, RecoveryError> {
		let query = ChainQuery::GuardianConfig { account };
		let value = with_deadline(self.policy.call_timeout, self.chain.read_state(&self.module, &query)).await?;
		Ok(value.into_guardian_config(&query)?)
	}

	/// Wait until guardian acceptance is visible on-chain.
	pub async fn await_acceptance(
		&self,
		account: Address,
		cancel: CancellationSignal,
	) -> Result<GuardianConfig, RecoveryError> {
		let mut snapshots = self.poll_acceptance(account, self.policy.poll_interval, cancel);
		while let Some(config) = snapshots.next().await {
			debug!(
				"Guardian weight for {}: {}",
				account,
				format_weight(config.accepted_weight, config.threshold)
			);
			if config.acceptance_complete() {
				info!("Guardian acceptance complete for {}", account);
				return Ok(config);
			}
		}
		Err(RecoveryError::Cancelled)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::recovery::types::ErrorKind;
	use crate::relay::RelayError;
	use crate::testing::{FakeChain, FakeRelay};

	const MODULE: Address = Address::with_last_byte(0xee);
	const WALLET: Address = Address::with_last_byte(0xaa);

	fn registrar(chain: &Arc<FakeChain>, relay: &Arc<FakeRelay>) -> GuardianRegistrar<FakeChain, FakeRelay> {
		let policy = RetryPolicy {
			initial_backoff: Duration::from_millis(10),
			..RetryPolicy::default()
		};
		GuardianRegistrar::new(chain.clone(), relay.clone(), MODULE, 0, policy)
	}

	fn config(accepted: u64, threshold: u64) -> GuardianConfig {
		GuardianConfig {
			guardian_count: 1,
			total_weight: 1,
			accepted_weight: accepted,
			threshold,
		}
	}

	fn code() -> AccountCode {
		AccountCode::generate()
	}

	#[tokio::test]
	async fn acceptance_subject_names_the_wallet() {
		let chain = Arc::new(FakeChain::new());
		let relay = Arc::new(FakeRelay::new());
		let code = code();

		let ticket = registrar(&chain, &relay)
			.request_acceptance(WALLET, Some("guardian@example.com"), Some(&code))
			.await
			.unwrap();

		assert_eq!(ticket.kind, TicketKind::Acceptance);
		assert_eq!(ticket.account, WALLET);
		let sent = relay.acceptances();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].module, MODULE);
		assert_eq!(
			sent[0].subject,
			format!("Accept guardian request for {}", WALLET)
		);
	}

	#[tokio::test]
	async fn missing_inputs_are_rejected_before_any_call() {
		let chain = Arc::new(FakeChain::new());
		let relay = Arc::new(FakeRelay::new());
		let registrar = registrar(&chain, &relay);
		let code = code();

		let err = registrar.request_acceptance(WALLET, Some(" "), Some(&code)).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::MissingGuardianEmail);
		let err = registrar
			.request_acceptance(WALLET, Some("guardian@example.com"), None)
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::MissingAccountCode);

		assert_eq!(chain.read_count("acceptanceCommandTemplates"), 0);
		assert!(relay.acceptances().is_empty());
	}

	#[tokio::test]
	async fn unknown_template_index_is_a_config_error() {
		let chain = Arc::new(FakeChain::new());
		let relay = Arc::new(FakeRelay::new());
		let registrar = GuardianRegistrar::new(chain.clone(), relay.clone(), MODULE, 3, RetryPolicy::default());

		let err = registrar
			.request_acceptance(WALLET, Some("guardian@example.com"), Some(&code()))
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::ConfigError);
	}

	#[tokio::test(start_paused = true)]
	async fn relay_rejection_is_surfaced_without_retry() {
		let chain = Arc::new(FakeChain::new());
		let relay = Arc::new(FakeRelay::new());
		relay.push_failure(RelayError::Rejected("unknown guardian".into()));

		let err = registrar(&chain, &relay)
			.request_acceptance(WALLET, Some("guardian@example.com"), Some(&code()))
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::RelayRejected);
		assert!(relay.acceptances().is_empty());
	}

	#[tokio::test]
	async fn guardian_address_comes_from_the_module() {
		let chain = Arc::new(FakeChain::new());
		let relay = Arc::new(FakeRelay::new());

		let guardian = registrar(&chain, &relay)
			.guardian_address(WALLET, &code(), "guardian@example.com")
			.await
			.unwrap();
		assert_eq!(
			guardian,
			FakeChain::email_auth_address(&FakeRelay::salt_for("guardian@example.com"))
		);
	}

	#[tokio::test(start_paused = true)]
	async fn polling_ends_once_threshold_is_reached() {
		let chain = Arc::new(FakeChain::new());
		let relay = Arc::new(FakeRelay::new());
		chain.push_guardian_config(WALLET, config(0, 1));
		chain.push_guardian_config(WALLET, config(0, 1));
		chain.push_guardian_config(WALLET, config(1, 1));

		let registrar = registrar(&chain, &relay);
		let snapshots: Vec<GuardianConfig> = registrar
			.poll_acceptance(WALLET, Duration::from_secs(5), CancellationSignal::new())
			.collect()
			.await;

		assert_eq!(snapshots.len(), 3);
		assert!(snapshots[..2].iter().all(|c| !c.acceptance_complete()));
		assert!(snapshots[2].acceptance_complete());
		assert_eq!(chain.read_count("getGuardianConfig"), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn overshooting_weight_still_completes() {
		let chain = Arc::new(FakeChain::new());
		let relay = Arc::new(FakeRelay::new());
		chain.push_guardian_config(WALLET, config(0, 2));
		chain.push_guardian_config(WALLET, config(3, 2));

		let config = registrar(&chain, &relay)
			.await_acceptance(WALLET, CancellationSignal::new())
			.await
			.unwrap();
		assert_eq!(config.accepted_weight, 3);
	}

	#[tokio::test(start_paused = true)]
	async fn read_failures_are_retried_on_the_next_tick() {
		let chain = Arc::new(FakeChain::new());
		let relay = Arc::new(FakeRelay::new());
		chain.push_guardian_config(WALLET, config(1, 1));
		chain.fail_reads(2);

		let config = registrar(&chain, &relay)
			.await_acceptance(WALLET, CancellationSignal::new())
			.await
			.unwrap();
		assert!(config.acceptance_complete());
		assert_eq!(chain.read_count("getGuardianConfig"), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn polling_restarts_on_a_second_call() {
		let chain = Arc::new(FakeChain::new());
		let relay = Arc::new(FakeRelay::new());
		chain.push_guardian_config(WALLET, config(1, 1));
		let registrar = registrar(&chain, &relay);

		for _ in 0..2 {
			let first = registrar
				.poll_acceptance(WALLET, Duration::from_secs(5), CancellationSignal::new())
				.next()
				.await;
			assert_eq!(first, Some(config(1, 1)));
		}
		assert_eq!(chain.read_count("getGuardianConfig"), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn cancelled_wait_reports_cancellation() {
		let chain = Arc::new(FakeChain::new());
		let relay = Arc::new(FakeRelay::new());
		chain.push_guardian_config(WALLET, config(0, 1));
		let registrar = registrar(&chain, &relay);

		let cancel = CancellationSignal::new();
		let trigger = cancel.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_secs(12)).await;
			trigger.cancel();
		});

		let err = registrar.await_acceptance(WALLET, cancel).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Cancelled);
		// reads at 0s, 5s and 10s; none after cancellation at 12s
		tokio::time::sleep(Duration::from_secs(30)).await;
		assert_eq!(chain.read_count("getGuardianConfig"), 3);
	}
}
