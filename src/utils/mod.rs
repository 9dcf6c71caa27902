//!
//! Utility module for the recovery engine.
//!
//! Re-exports formatting helpers used when logging and printing account state.
/// Utility functions for formatting and display
pub mod format;

pub use format::{format_weight, truncate_hex};
