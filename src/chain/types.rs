//! Types for on-chain reads and operation submission

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 20-byte account or contract address.
///
/// Displayed with its EIP-55 checksum; parsing accepts any hex case.
pub use alloy_primitives::Address;

/// Guardian configuration of one account as reported by the recovery module.
///
/// The module only exposes aggregate counters; the individual guardian
/// addresses and weights are the ones encoded in the install payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianConfig {
    /// Number of registered guardians.
    pub guardian_count: u64,
    /// Sum of all guardian weights.
    pub total_weight: u64,
    /// Weight of the guardians that have accepted so far.
    pub accepted_weight: u64,
    /// Weight needed for the configuration (and for recovery) to be effective.
    pub threshold: u64,
}

impl GuardianConfig {
    /// Whether guardian registration has reached its terminal condition.
    pub fn acceptance_complete(&self) -> bool {
        self.threshold != 0 && self.accepted_weight >= self.threshold
    }
}

/// Recovery request of one account as reported by the recovery module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Guardian weight approving the request so far.
    pub current_weight: u64,
    /// Weight required before the request can be completed.
    pub threshold: u64,
    /// New owner named by the request, when the module exposes it.
    pub requested_new_owner: Option<Address>,
    /// Earliest timestamp at which the request can be executed.
    pub execute_after: u64,
    /// Timestamp after which the request expires.
    pub execute_before: u64,
}

impl RecoveryRequest {
    /// Whether guardian approvals are already in flight for this account.
    ///
    /// The module reports an all-zero request when nothing is pending.
    pub fn is_outstanding(&self) -> bool {
        self.current_weight > 0
    }

    /// Whether the accumulated weight allows completing the recovery.
    pub fn is_ready(&self) -> bool {
        self.threshold != 0 && self.current_weight >= self.threshold
    }
}

/// A read against contract state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainQuery {
    /// `getGuardianConfig(account)` on the recovery module.
    GuardianConfig { account: Address },
    /// `getRecoveryRequest(account)` combined with the guardian threshold.
    RecoveryRequest { account: Address },
    /// `acceptanceCommandTemplates()` on the recovery module.
    AcceptanceCommandTemplates,
    /// Current owners of `account`.
    Owners { account: Address },
    /// Whether `module` is installed on `account`.
    IsModuleInstalled { account: Address, module: Address },
    /// `computeEmailAuthAddress(account, salt)` on the recovery module.
    ComputeEmailAuthAddress { account: Address, salt: [u8; 32] },
}

impl ChainQuery {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ChainQuery::GuardianConfig { .. } => "getGuardianConfig",
            ChainQuery::RecoveryRequest { .. } => "getRecoveryRequest",
            ChainQuery::AcceptanceCommandTemplates => "acceptanceCommandTemplates",
            ChainQuery::Owners { .. } => "getOwners",
            ChainQuery::IsModuleInstalled { .. } => "isModuleInstalled",
            ChainQuery::ComputeEmailAuthAddress { .. } => "computeEmailAuthAddress",
        }
    }
}

/// Value produced by a [`ChainQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainValue {
    GuardianConfig(GuardianConfig),
    RecoveryRequest(RecoveryRequest),
    CommandTemplates(Vec<Vec<String>>),
    Owners(Vec<Address>),
    Bool(bool),
    Address(Address),
}

impl ChainValue {
    fn unexpected(self, query: &ChainQuery) -> ChainError {
        ChainError::UnexpectedValue {
            query: query.name(),
            detail: format!("{:?}", self),
        }
    }

    pub fn into_guardian_config(self, query: &ChainQuery) -> Result<GuardianConfig, ChainError> {
        match self {
            ChainValue::GuardianConfig(config) => Ok(config),
            other => Err(other.unexpected(query)),
        }
    }

    pub fn into_recovery_request(self, query: &ChainQuery) -> Result<RecoveryRequest, ChainError> {
        match self {
            ChainValue::RecoveryRequest(request) => Ok(request),
            other => Err(other.unexpected(query)),
        }
    }

    pub fn into_command_templates(self, query: &ChainQuery) -> Result<Vec<Vec<String>>, ChainError> {
        match self {
            ChainValue::CommandTemplates(templates) => Ok(templates),
            other => Err(other.unexpected(query)),
        }
    }

    pub fn into_owners(self, query: &ChainQuery) -> Result<Vec<Address>, ChainError> {
        match self {
            ChainValue::Owners(owners) => Ok(owners),
            other => Err(other.unexpected(query)),
        }
    }

    pub fn into_bool(self, query: &ChainQuery) -> Result<bool, ChainError> {
        match self {
            ChainValue::Bool(value) => Ok(value),
            other => Err(other.unexpected(query)),
        }
    }

    pub fn into_address(self, query: &ChainQuery) -> Result<Address, ChainError> {
        match self {
            ChainValue::Address(address) => Ok(address),
            other => Err(other.unexpected(query)),
        }
    }
}

/// An operation submitted to the chain on behalf of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Operation {
    /// Install `module` on `account` (ERC-7579 `installModule`).
    InstallModule {
        account: Address,
        module: Address,
        #[serde(rename = "moduleTypeId")]
        module_type_id: u8,
        #[serde(rename = "initData", with = "hex_bytes")]
        init_data: Vec<u8>,
    },
}

impl Operation {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::InstallModule { .. } => "installModule",
        }
    }
}

/// Identifier returned by the chain for a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle(pub String);

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Confirmation that an operation was included on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub handle: OperationHandle,
    /// Hash of the transaction that carried the operation.
    pub transaction_hash: Option<String>,
    /// Block the transaction was included in.
    pub block_number: Option<u64>,
}

/// Errors from chain reads and submissions.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Submit error: {0}")]
    SubmitError(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Reverted: {0}")]
    Reverted(String),

    #[error("Unexpected value for {query}: {detail}")]
    UnexpectedValue { query: &'static str, detail: String },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("ABI error: {0}")]
    AbiError(#[from] alloy_sol_types::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ChainError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::ReadError(_)
                | ChainError::SubmitError(_)
                | ChainError::Timeout(_)
                | ChainError::HttpError(_)
        )
    }
}

/// Serde adapter for `0x`-prefixed hex byte strings.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let digits = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(digits).map_err(serde::de::Error::custom)
    }
}
