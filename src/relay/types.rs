//! Types for the email relay integration

use crate::chain::Address;
use crate::utils::truncate_hex;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Private token binding a wallet to its guardian approvals.
///
/// The relay uses it to derive per-guardian salts without learning which
/// on-chain account it belongs to until the guardian accepts.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountCode(String);

impl AccountCode {
    /// Generate a fresh code: 31 random bytes as a 32-byte `0x` hex word.
    ///
    /// The zero leading byte keeps the value below the BN254 scalar field
    /// the relay's circuits operate in.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes[1..]);
        AccountCode(format!("0x{}", hex::encode(bytes)))
    }

    /// Wrap a previously persisted code.
    pub fn from_persisted(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(AccountCode(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccountCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountCode({})", truncate_hex(&self.0, 6))
    }
}

/// Identifier the relay assigns to a submitted request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which on-chain condition a relay ticket waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    /// Guardian acceptance, satisfied by the guardian config reaching its threshold.
    Acceptance,
    /// Recovery approval, satisfied by the recovery request reaching its threshold.
    Recovery,
}

/// Correlates a relay submission with the chain condition it is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTicket {
    pub request_id: RequestId,
    pub kind: TicketKind,
    /// Wallet the request is about.
    pub account: Address,
    pub submitted_at: DateTime<Utc>,
}

impl RelayTicket {
    pub fn new(request_id: RequestId, kind: TicketKind, account: Address) -> Self {
        Self {
            request_id,
            kind,
            account,
            submitted_at: Utc::now(),
        }
    }
}

/// Outcome of a completion submitted through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    /// Raw relay response body.
    pub response: serde_json::Value,
}

/// Error types for relay requests
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Relay returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Relay rejected request: {0}")]
    Rejected(String),

    #[error("Invalid relay response: {0}")]
    InvalidResponse(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::HttpError(_) => true,
            RelayError::Status { status, .. } => *status >= 500 || *status == 429,
            RelayError::Rejected(_) | RelayError::InvalidResponse(_) | RelayError::JsonError(_) => false,
        }
    }
}
