//! Recovery Orchestration Module
//!
//! This module provides the engine that takes an account from provisioning to a completed
//! ownership transfer. It is composed of several submodules, each responsible for one stage or
//! one cross-cutting concern:
//!
//! - `orchestrator`: The root. Owns the account record and sequences every stage through the lifecycle state machine.
//! - `provisioner`: Derives collision-free wallet addresses and the per-account account code.
//! - `installer`: Builds the module install payload and drives the install to a receipt.
//! - `registrar`: Requests guardian acceptance and polls until it is visible on-chain.
//! - `coordinator`: Requests recovery, tracks approval weight and completes the transfer.
//! - `events`: Lifecycle events and the handlers that observe them.
//! - `polling`: Deadlines, bounded retry and cancellable polling streams.
//! - `repositories` / `state_persistence`: Key-value persistence of the account state.
//!
//! Stages never share mutable state; they only exchange data through the orchestrator's record.

/// Recovery request, approval tracking and completion
pub mod coordinator;
/// Lifecycle events and handlers
pub mod events;
/// Module install payload and install tracking
pub mod installer;
/// Main coordinator for one account's lifecycle
pub mod orchestrator;
/// Deadlines, retry and polling primitives
pub mod polling;
/// Address derivation and account codes
pub mod provisioner;
/// Guardian acceptance
pub mod registrar;
/// Key-value storage backends
pub mod repositories;
/// Typed persistence of account state
pub mod state_persistence;
/// Email subject builders
pub mod subject;
/// Shared types and the error taxonomy
pub mod types;

pub use events::{LifecycleEvent, LifecycleEventHandler, Stage};
pub use installer::{DelayUnit, InstallConfig, RecoveryDelay};
pub use orchestrator::*;
pub use polling::{CancellationSignal, RetryPolicy};
pub use provisioner::{AddressDerivation, Create2Derivation, ProvisionedWallet};
pub use repositories::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, StorageError};
pub use types::*;
