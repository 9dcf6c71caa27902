//! Email-guardian recovery for smart-contract wallets.
//!
//! The engine provisions a recoverable account, registers email guardians, tracks a recovery
//! request until the guardians' approval weight reaches the threshold and executes the
//! ownership transfer. It talks to the outside world only through [`chain::ChainClient`] and
//! [`relay::RelayClient`].

pub mod chain;
pub mod config;
pub mod recovery;
pub mod relay;
pub mod transaction;
pub mod utils;

#[cfg(test)]
mod testing;
