//! Solidity interfaces the orchestrator reads from and calls into.

use alloy_sol_types::sol;

sol! {
	/// Email recovery module, in both its Safe and universal flavours.
	#[derive(Debug, PartialEq, Eq)]
	interface IEmailRecoveryModule {
		function getGuardianConfig(address account)
			external
			view
			returns (uint256 guardianCount, uint256 totalWeight, uint256 acceptedWeight, uint256 threshold);

		function getRecoveryRequest(address account)
			external
			view
			returns (uint256 executeAfter, uint256 executeBefore, uint256 currentWeight, bytes32 recoveryDataHash);

		function acceptanceCommandTemplates() external pure returns (string[][] memory);

		function computeEmailAuthAddress(address recoveredAccount, bytes32 accountSalt)
			external
			view
			returns (address);
	}

	/// The owner-management subset of a Safe.
	#[derive(Debug, PartialEq, Eq)]
	interface ISafe {
		function getOwners() external view returns (address[] memory);

		function swapOwner(address prevOwner, address oldOwner, address newOwner) external;
	}

	/// An ownable validator guarding an ERC-7579 account.
	#[derive(Debug, PartialEq, Eq)]
	interface IOwnableValidator {
		function getOwners(address account) external view returns (address[] memory);

		function changeOwner(address newOwner) external;
	}

	/// ERC-7579 module management.
	#[derive(Debug, PartialEq, Eq)]
	interface IERC7579Account {
		function installModule(uint256 moduleTypeId, address module, bytes calldata initData) external payable;

		function isModuleInstalled(uint256 moduleTypeId, address module, bytes calldata additionalContext)
			external
			view
			returns (bool);
	}
}
