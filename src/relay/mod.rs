//! Email relay integration module
//!
//! This module provides the client trait and types for the relay that delivers guardian
//! acceptance and recovery requests by email and submits the guardians' approvals on-chain.

/// Relay client trait and HTTP implementation
mod client;
/// Type definitions for relay requests and tickets
mod types;

pub use client::{HttpRelayClient, RelayClient};
pub use types::*;
