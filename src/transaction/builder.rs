//! Call data builders
//!
//! Encodes the module install payload and the ownership-transfer calls the
//! recovery flow hands to the wallet and the relay.

use crate::chain::Address;
use crate::transaction::contracts::{IERC7579Account, IOwnableValidator, ISafe};
use crate::transaction::{MODULE_TYPE_EXECUTOR, SAFE_SENTINEL_OWNERS};

use alloy_primitives::{Bytes, FixedBytes, U256};
use alloy_sol_types::{SolCall, SolValue};

/// Arguments of the recovery module's `onInstall(bytes)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallArgs {
	/// Validator whose owner the module may change.
	pub validator: Address,
	pub guardians: Vec<Address>,
	pub weights: Vec<U256>,
	pub threshold: U256,
	pub delay_secs: U256,
	pub expiry_secs: U256,
}

/// ABI layout of [`InstallArgs`]:
/// `(validator, isInstalledContext, recoverySelector, guardians, weights, threshold, delay, expiry)`.
type InstallArgsTuple = (
	Address,
	Bytes,
	FixedBytes<4>,
	Vec<Address>,
	Vec<U256>,
	U256,
	U256,
	U256,
);

impl InstallArgs {
	/// `abi.encode` of the arguments, with `changeOwner` as the recovery selector.
	pub fn encode(&self) -> Vec<u8> {
		let tuple: InstallArgsTuple = (
			self.validator,
			// isInstalledContext
			Bytes::from_static(&[0x00]),
			FixedBytes(IOwnableValidator::changeOwnerCall::SELECTOR),
			self.guardians.clone(),
			self.weights.clone(),
			self.threshold,
			self.delay_secs,
			self.expiry_secs,
		);
		let encoded = tuple.abi_encode_params();
		log::debug!(
			"Encoded install arguments for {} guardians into {} bytes",
			self.guardians.len(),
			encoded.len()
		);
		encoded
	}

	/// Inverse of [`InstallArgs::encode`].
	pub fn decode(data: &[u8]) -> Result<Self, alloy_sol_types::Error> {
		let (validator, _, _, guardians, weights, threshold, delay_secs, expiry_secs) =
			InstallArgsTuple::abi_decode_params(data)?;
		Ok(Self {
			validator,
			guardians,
			weights,
			threshold,
			delay_secs,
			expiry_secs,
		})
	}
}

/// `installModule(EXECUTOR, module, initData)` on an ERC-7579 account.
pub fn install_module_call(module: Address, module_type_id: u8, init_data: &[u8]) -> Vec<u8> {
	IERC7579Account::installModuleCall {
		moduleTypeId: U256::from(module_type_id),
		module,
		initData: Bytes::copy_from_slice(init_data),
	}
	.abi_encode()
}

/// `isModuleInstalled(EXECUTOR, module, "")` on an ERC-7579 account.
pub fn is_module_installed_call(module: Address) -> Vec<u8> {
	IERC7579Account::isModuleInstalledCall {
		moduleTypeId: U256::from(MODULE_TYPE_EXECUTOR),
		module,
		additionalContext: Bytes::new(),
	}
	.abi_encode()
}

/// `swapOwner(prevOwner, oldOwner, newOwner)` on a Safe whose owner list
/// starts with `old_owner`.
pub fn swap_owner_call(old_owner: Address, new_owner: Address) -> Vec<u8> {
	let data = ISafe::swapOwnerCall {
		prevOwner: SAFE_SENTINEL_OWNERS,
		oldOwner: old_owner,
		newOwner: new_owner,
	}
	.abi_encode();
	log::debug!("Built swapOwner call data ({} bytes)", data.len());
	data
}

/// `changeOwner(newOwner)` on an ownable validator.
pub fn change_owner_call(new_owner: Address) -> Vec<u8> {
	IOwnableValidator::changeOwnerCall { newOwner: new_owner }.abi_encode()
}

/// Recovery data a universal module checks on completion:
/// `abi.encode(validator, changeOwner(newOwner))`.
pub fn universal_recovery_data(validator: Address, new_owner: Address) -> Vec<u8> {
	let data = (validator, Bytes::from(change_owner_call(new_owner))).abi_encode_params();
	log::debug!("Built universal recovery data for validator {} ({} bytes)", validator, data.len());
	data
}
