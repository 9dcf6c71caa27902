//! Chain integration module
//!
//! This module provides the client trait and types for reading recovery-module state and
//! submitting operations. The orchestrator only ever talks to the chain through
//! [`ChainClient`], so any node or wallet backend can be plugged in.

/// Chain client trait and the JSON-RPC implementation
mod client;
/// Type definitions for chain reads and operations
mod types;

pub use client::{ChainClient, JsonRpcChainClient};
pub use types::*;
