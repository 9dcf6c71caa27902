/// Call data builders for the install and ownership-transfer calls
pub mod builder;
/// Solidity interfaces of the recovery module, Safe and ERC-7579 accounts
pub mod contracts;

pub use builder::InstallArgs;

use crate::chain::Address;

/// Head of the Safe owner linked list.
pub const SAFE_SENTINEL_OWNERS: Address = Address::with_last_byte(1);

/// ERC-7579 module type id of an executor.
pub const MODULE_TYPE_EXECUTOR: u8 = 2;
