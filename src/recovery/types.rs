use crate::chain::{Address, ChainError};
use crate::config::ConfigError;
use crate::recovery::polling::RetryPolicy;
use crate::recovery::repositories::StorageError;
use crate::relay::{AccountCode, RelayError, RelayTicket};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Caller-chosen identifier of a recoverable account.
///
/// Used as the persistence namespace and carried on every lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl fmt::Display for AccountId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for AccountId {
	fn from(value: &str) -> Self {
		AccountId(value.to_string())
	}
}

/// Opaque reference to the key controlling a wallet. Never key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerKeyRef(pub String);

impl OwnerKeyRef {
	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}

	pub fn as_bytes(&self) -> &[u8] {
		self.0.as_bytes()
	}
}

/// Kind of recovery module guarding the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
	/// Safe owner swap, completed through the relay.
	Safe,
	/// ERC-7579 validator owner change, also completed through the relay.
	Universal,
}

impl FromStr for ModuleKind {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"safe" => Ok(ModuleKind::Safe),
			"universal" => Ok(ModuleKind::Universal),
			other => Err(ConfigError::Invalid(format!("unknown module kind `{}`", other))),
		}
	}
}

/// Module wiring shared by every stage of one orchestrator.
#[derive(Debug, Clone)]
pub struct RecoverySettings {
	/// Email recovery module guarding the wallet.
	pub module: Address,
	pub module_kind: ModuleKind,
	/// Owner validator of universal modules.
	pub validator: Option<Address>,
	pub template_idx: u32,
	pub policy: RetryPolicy,
}

/// Lifecycle of one recoverable account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
	AwaitingGuardianSetup,
	GuardianConfigured,
	RecoveryRequested,
	RecoveryReady,
	RecoveryCompleted,
}

impl LifecycleState {
	/// The only state reachable from `self`, if any.
	pub fn next(self) -> Option<LifecycleState> {
		use LifecycleState::*;
		match self {
			AwaitingGuardianSetup => Some(GuardianConfigured),
			GuardianConfigured => Some(RecoveryRequested),
			RecoveryRequested => Some(RecoveryReady),
			RecoveryReady => Some(RecoveryCompleted),
			RecoveryCompleted => None,
		}
	}

	/// Transitions only ever advance one step.
	pub fn can_transition_to(self, target: LifecycleState) -> bool {
		self.next() == Some(target)
	}
}

impl fmt::Display for LifecycleState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Recovery submitted through the relay and not yet completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRecovery {
	pub old_owner: Address,
	pub new_owner: Address,
	pub ticket: Option<RelayTicket>,
}

/// Everything the orchestrator knows about one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
	pub account_id: AccountId,
	pub owner_key_ref: Option<OwnerKeyRef>,
	/// Nonce the current wallet address was derived with.
	pub salt_nonce: Option<u64>,
	pub account_code: Option<AccountCode>,
	pub wallet_address: Option<Address>,
	pub lifecycle_state: LifecycleState,
	#[serde(default)]
	pub module_installed: bool,
	#[serde(default)]
	pub acceptance_ticket: Option<RelayTicket>,
	#[serde(default)]
	pub pending_recovery: Option<PendingRecovery>,
	pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
	pub fn new(account_id: AccountId) -> Self {
		Self {
			account_id,
			owner_key_ref: None,
			salt_nonce: None,
			account_code: None,
			wallet_address: None,
			lifecycle_state: LifecycleState::AwaitingGuardianSetup,
			module_installed: false,
			acceptance_ticket: None,
			pending_recovery: None,
			updated_at: Utc::now(),
		}
	}

	/// Wallet address, failing when the account has not been provisioned or attached.
	pub fn wallet(&self) -> Result<Address, RecoveryError> {
		self.wallet_address
			.ok_or_else(|| RecoveryError::Provision(format!("account {} has no wallet address", self.account_id)))
	}

	pub fn touch(&mut self) {
		self.updated_at = Utc::now();
	}
}

/// Classification of a [`RecoveryError`], carried on error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
	ConfigError,
	ProvisionError,
	ReadError,
	SubmitError,
	Timeout,
	Reverted,
	RecoveryRequestError,
	RecoveryCompletionError,
	MissingGuardianEmail,
	MissingAccountCode,
	StorageError,
	RelayRejected,
	Cancelled,
	InvalidTransition,
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Errors surfaced by the recovery engine
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("Provision error: {0}")]
	Provision(String),

	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),

	#[error("Relay error: {0}")]
	Relay(#[from] RelayError),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Timed out after {0:?}")]
	Timeout(Duration),

	#[error("Recovery request error: {message}")]
	RecoveryRequest {
		message: String,
		#[source]
		cause: Option<Box<RecoveryError>>,
	},

	#[error("Recovery completion error: {0}")]
	RecoveryCompletion(#[source] Box<RecoveryError>),

	#[error("Guardian email is missing")]
	MissingGuardianEmail,

	#[error("Account code is missing")]
	MissingAccountCode,

	#[error("Operation cancelled")]
	Cancelled,

	#[error("Invalid transition from {from} to {to}")]
	InvalidTransition { from: LifecycleState, to: LifecycleState },
}

impl RecoveryError {
	pub fn recovery_request(message: impl Into<String>) -> Self {
		RecoveryError::RecoveryRequest {
			message: message.into(),
			cause: None,
		}
	}

	/// Wrap a failure that happened while requesting recovery, keeping a request error as is.
	pub fn recovery_request_failed(cause: RecoveryError) -> Self {
		match cause {
			RecoveryError::RecoveryRequest { .. } => cause,
			other => RecoveryError::RecoveryRequest {
				message: other.to_string(),
				cause: Some(Box::new(other)),
			},
		}
	}

	pub fn recovery_completion_failed(cause: RecoveryError) -> Self {
		match cause {
			RecoveryError::RecoveryCompletion(_) => cause,
			other => RecoveryError::RecoveryCompletion(Box::new(other)),
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			RecoveryError::Config(_) => ErrorKind::ConfigError,
			RecoveryError::Provision(_) => ErrorKind::ProvisionError,
			RecoveryError::Chain(e) => match e {
				ChainError::SubmitError(_) => ErrorKind::SubmitError,
				ChainError::Timeout(_) => ErrorKind::Timeout,
				ChainError::Reverted(_) => ErrorKind::Reverted,
				_ => ErrorKind::ReadError,
			},
			RecoveryError::Relay(e) => match e {
				RelayError::Rejected(_) => ErrorKind::RelayRejected,
				_ => ErrorKind::SubmitError,
			},
			RecoveryError::Storage(_) => ErrorKind::StorageError,
			RecoveryError::Timeout(_) => ErrorKind::Timeout,
			RecoveryError::RecoveryRequest { .. } => ErrorKind::RecoveryRequestError,
			RecoveryError::RecoveryCompletion(_) => ErrorKind::RecoveryCompletionError,
			RecoveryError::MissingGuardianEmail => ErrorKind::MissingGuardianEmail,
			RecoveryError::MissingAccountCode => ErrorKind::MissingAccountCode,
			RecoveryError::Cancelled => ErrorKind::Cancelled,
			RecoveryError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
		}
	}

	/// Whether a bounded retry should try again.
	pub fn is_transient(&self) -> bool {
		match self {
			RecoveryError::Chain(e) => e.is_transient(),
			RecoveryError::Relay(e) => e.is_transient(),
			RecoveryError::Timeout(_) => true,
			_ => false,
		}
	}
}
