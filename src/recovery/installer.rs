use crate::chain::{Address, ChainClient, ChainQuery, Operation, OperationHandle, Receipt};
use crate::config::{ConfigError, DEFAULT_EXPIRY_SECS};
use crate::recovery::polling::{RetryPolicy, submit_with_retry, with_deadline};
use crate::recovery::types::RecoveryError;
use crate::transaction::{InstallArgs, MODULE_TYPE_EXECUTOR};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Unit of a recovery delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DelayUnit {
	Secs,
	Mins,
	Hours,
	Days,
}

impl DelayUnit {
	pub fn seconds(self) -> u64 {
		match self {
			DelayUnit::Secs => 1,
			DelayUnit::Mins => 60,
			DelayUnit::Hours => 60 * 60,
			DelayUnit::Days => 24 * 60 * 60,
		}
	}
}

/// Time the owner has to cancel a recovery before it can be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryDelay {
	pub amount: u64,
	pub unit: DelayUnit,
}

impl RecoveryDelay {
	pub fn as_secs(&self) -> Result<u64, ConfigError> {
		self.amount
			.checked_mul(self.unit.seconds())
			.ok_or_else(|| ConfigError::Invalid(format!("recovery delay {:?} overflows", self)))
	}
}

/// Guardian setup encoded into the module install payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallConfig {
	/// Validator whose owner the module may change.
	pub validator: Address,
	pub guardians: Vec<Address>,
	pub weights: Vec<u64>,
	pub threshold: u64,
	pub delay: RecoveryDelay,
	pub expiry_secs: u64,
}

impl InstallConfig {
	/// A setup where every guardian has weight 1 and the default expiry applies.
	pub fn equal_weights(validator: Address, guardians: Vec<Address>, threshold: u64, delay: RecoveryDelay) -> Self {
		let weights = vec![1; guardians.len()];
		Self {
			validator,
			guardians,
			weights,
			threshold,
			delay,
			expiry_secs: DEFAULT_EXPIRY_SECS,
		}
	}
}

/// Everything needed to install the recovery module on an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPayload {
	pub module: Address,
	pub module_type_id: u8,
	pub init_data: Vec<u8>,
}

/// Validate `config` and encode the install payload for `module`.
pub fn build_install_payload(module: Address, config: &InstallConfig) -> Result<InstallPayload, RecoveryError> {
	if config.guardians.is_empty() {
		return Err(ConfigError::Invalid("at least one guardian is required".into()).into());
	}
	if config.guardians.len() != config.weights.len() {
		return Err(ConfigError::Invalid(format!(
			"{} guardians but {} weights",
			config.guardians.len(),
			config.weights.len()
		))
		.into());
	}
	if config.threshold == 0 {
		return Err(ConfigError::Invalid("threshold must be positive".into()).into());
	}
	let total_weight = config
		.weights
		.iter()
		.try_fold(0u64, |sum, w| sum.checked_add(*w))
		.ok_or_else(|| ConfigError::Invalid("guardian weights overflow".into()))?;
	if config.threshold > total_weight {
		return Err(ConfigError::Invalid(format!(
			"threshold {} exceeds total guardian weight {}",
			config.threshold, total_weight
		))
		.into());
	}
	let delay = config.delay.as_secs()?;

	let init_data = InstallArgs {
		validator: config.validator,
		guardians: config.guardians.clone(),
		weights: config.weights.iter().copied().map(U256::from).collect(),
		threshold: U256::from(config.threshold),
		delay_secs: U256::from(delay),
		expiry_secs: U256::from(config.expiry_secs),
	}
	.encode();

	debug!(
		"Built install payload for {} guardians, threshold {}, delay {}s",
		config.guardians.len(),
		config.threshold,
		delay
	);

	Ok(InstallPayload {
		module,
		module_type_id: MODULE_TYPE_EXECUTOR,
		init_data,
	})
}

/// Installs the recovery module and waits for the install to land.
pub struct ModuleInstaller<C> {
	chain: Arc<C>,
	policy: RetryPolicy,
}

impl<C: ChainClient> ModuleInstaller<C> {
	pub fn new(chain: Arc<C>, policy: RetryPolicy) -> Self {
		Self { chain, policy }
	}

	/// Submit the install operation; the caller awaits the receipt.
	pub async fn install(&self, account: Address, payload: &InstallPayload) -> Result<OperationHandle, RecoveryError> {
		let chain = &self.chain;
		let handle = submit_with_retry(&self.policy, "installModule", || {
			let operation = Operation::InstallModule {
				account,
				module: payload.module,
				module_type_id: payload.module_type_id,
				init_data: payload.init_data.clone(),
			};
			async move { chain.submit(operation).await.map_err(RecoveryError::from) }
		})
		.await?;

		info!("Submitted module install for {} as {}", account, handle);
		Ok(handle)
	}

	/// Wait for the install receipt within the call deadline.
	pub async fn await_installed(&self, handle: &OperationHandle) -> Result<Receipt, RecoveryError> {
		let deadline = self.policy.call_timeout;
		let receipt = with_deadline(deadline, self.chain.await_receipt(handle, deadline)).await?;
		info!("Module install {} confirmed", handle);
		Ok(receipt)
	}

	pub async fn is_installed(&self, account: Address, module: Address) -> Result<bool, RecoveryError> {
		let query = ChainQuery::IsModuleInstalled { account, module };
		let value = with_deadline(self.policy.call_timeout, self.chain.read_state(&account, &query)).await?;
		Ok(value.into_bool(&query)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::recovery::types::ErrorKind;
	use crate::testing::FakeChain;
	use proptest::prelude::*;
	use std::time::Duration;

	const MODULE: Address = Address::with_last_byte(0xee);
	const VALIDATOR: Address = Address::with_last_byte(0xdd);

	fn config(weights: Vec<u64>, threshold: u64) -> InstallConfig {
		InstallConfig {
			validator: VALIDATOR,
			guardians: (1..=weights.len() as u8).map(Address::with_last_byte).collect(),
			weights,
			threshold,
			delay: RecoveryDelay {
				amount: 2,
				unit: DelayUnit::Hours,
			},
			expiry_secs: DEFAULT_EXPIRY_SECS,
		}
	}

	fn policy() -> RetryPolicy {
		RetryPolicy {
			call_timeout: Duration::from_secs(2),
			initial_backoff: Duration::from_millis(10),
			..RetryPolicy::default()
		}
	}

	#[test]
	fn valid_thresholds_build_a_payload() {
		for (weights, threshold) in [(vec![1], 1), (vec![1, 2, 3], 6), (vec![5, 1], 3)] {
			let payload = build_install_payload(MODULE, &config(weights, threshold)).unwrap();
			assert_eq!(payload.module, MODULE);
			assert_eq!(payload.module_type_id, 2);
		}
	}

	#[test]
	fn invalid_thresholds_are_config_errors() {
		let cases = [
			config(vec![1, 1], 0),
			config(vec![1, 1], 3),
			InstallConfig {
				weights: vec![1],
				..config(vec![1, 1], 1)
			},
			InstallConfig {
				guardians: vec![],
				weights: vec![],
				..config(vec![1], 1)
			},
		];
		for case in cases {
			let err = build_install_payload(MODULE, &case).unwrap_err();
			assert_eq!(err.kind(), ErrorKind::ConfigError, "{:?}", case);
		}
	}

	#[test]
	fn payload_layout_matches_the_module_abi() {
		let payload = build_install_payload(MODULE, &config(vec![1, 2], 2)).unwrap();
		let args = InstallArgs::decode(&payload.init_data).unwrap();

		assert_eq!(args.validator, VALIDATOR);
		assert_eq!(args.guardians, vec![Address::with_last_byte(1), Address::with_last_byte(2)]);
		assert_eq!(args.weights, vec![U256::from(1), U256::from(2)]);
		assert_eq!(args.threshold, U256::from(2));
		assert_eq!(args.delay_secs, U256::from(7200));
		assert_eq!(args.expiry_secs, U256::from(1_209_600));
	}

	fn valid_config() -> impl Strategy<Value = InstallConfig> {
		prop::collection::vec(1u64..=u64::from(u32::MAX), 1..8)
			.prop_flat_map(|weights| {
				let total: u64 = weights.iter().sum();
				(Just(weights), 1..=total, 0u64..=10_000, any::<u32>())
			})
			.prop_map(|(weights, threshold, amount, expiry)| InstallConfig {
				delay: RecoveryDelay {
					amount,
					unit: DelayUnit::Mins,
				},
				expiry_secs: u64::from(expiry),
				..config(weights, threshold)
			})
	}

	proptest! {
		#[test]
		fn valid_configs_round_trip_through_the_payload(config in valid_config()) {
			let payload = build_install_payload(MODULE, &config).unwrap();
			let args = InstallArgs::decode(&payload.init_data).unwrap();

			prop_assert_eq!(args.validator, config.validator);
			prop_assert_eq!(&args.guardians, &config.guardians);
			prop_assert_eq!(
				args.weights,
				config.weights.iter().copied().map(U256::from).collect::<Vec<_>>()
			);
			prop_assert_eq!(args.threshold, U256::from(config.threshold));
			prop_assert_eq!(args.delay_secs, U256::from(config.delay.amount * 60));
			prop_assert_eq!(args.expiry_secs, U256::from(config.expiry_secs));
		}

		#[test]
		fn thresholds_above_the_total_weight_are_rejected(
			weights in prop::collection::vec(0u64..1_000, 1..8),
			excess in 1u64..1_000,
		) {
			let total: u64 = weights.iter().sum();
			let err = build_install_payload(MODULE, &config(weights, total + excess)).unwrap_err();
			prop_assert_eq!(err.kind(), ErrorKind::ConfigError);
		}

		#[test]
		fn mismatched_weights_are_rejected(
			guardians in 1usize..8,
			weights in prop::collection::vec(1u64..100, 0..8),
		) {
			prop_assume!(guardians != weights.len());
			let invalid = InstallConfig {
				guardians: (1..=guardians as u8).map(Address::with_last_byte).collect(),
				..config(weights, 1)
			};
			let err = build_install_payload(MODULE, &invalid).unwrap_err();
			prop_assert_eq!(err.kind(), ErrorKind::ConfigError);
		}

		#[test]
		fn zero_threshold_is_rejected(weights in prop::collection::vec(1u64..100, 1..8)) {
			let err = build_install_payload(MODULE, &config(weights, 0)).unwrap_err();
			prop_assert_eq!(err.kind(), ErrorKind::ConfigError);
		}
	}

	#[tokio::test]
	async fn rejected_configs_submit_nothing() {
		let chain = Arc::new(FakeChain::new());
		let installer = ModuleInstaller::new(chain.clone(), policy());

		assert!(build_install_payload(MODULE, &config(vec![1, 1], 3)).is_err());
		assert!(!installer.is_installed(Address::with_last_byte(0xaa), MODULE).await.unwrap());
		assert!(chain.submitted().is_empty());
	}

	#[test]
	fn delay_units_convert_to_seconds() {
		let days = RecoveryDelay {
			amount: 3,
			unit: DelayUnit::Days,
		};
		assert_eq!(days.as_secs().unwrap(), 259_200);
		let huge = RecoveryDelay {
			amount: u64::MAX,
			unit: DelayUnit::Mins,
		};
		assert!(huge.as_secs().is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn install_retries_transient_submit_failures() {
		let chain = Arc::new(FakeChain::new());
		chain.fail_submits(2);
		let installer = ModuleInstaller::new(chain.clone(), policy());
		let account = Address::with_last_byte(0xaa);

		let payload = build_install_payload(MODULE, &config(vec![1], 1)).unwrap();
		let handle = installer.install(account, &payload).await.unwrap();
		installer.await_installed(&handle).await.unwrap();

		assert_eq!(chain.submitted().len(), 1);
		assert!(installer.is_installed(account, MODULE).await.unwrap());
	}

	#[tokio::test(start_paused = true)]
	async fn reverted_install_is_reported() {
		let chain = Arc::new(FakeChain::new());
		chain.revert_receipts(true);
		let installer = ModuleInstaller::new(chain, policy());

		let payload = build_install_payload(MODULE, &config(vec![1], 1)).unwrap();
		let handle = installer.install(Address::with_last_byte(0xaa), &payload).await.unwrap();
		let err = installer.await_installed(&handle).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Reverted);
	}

	#[tokio::test(start_paused = true)]
	async fn unconfirmed_install_times_out() {
		let chain = Arc::new(FakeChain::new());
		chain.hang_receipts(true);
		let installer = ModuleInstaller::new(chain, policy());

		let payload = build_install_payload(MODULE, &config(vec![1], 1)).unwrap();
		let handle = installer.install(Address::with_last_byte(0xaa), &payload).await.unwrap();
		let err = installer.await_installed(&handle).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Timeout);
	}
}
