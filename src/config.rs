//! Layered configuration for the recovery engine.
//!
//! Values start from built-in defaults, are overridden by an optional JSON file and finally by
//! `RECOVERY_*` environment variables. [`RecoveryConfig::validate`] runs last.

use crate::chain::Address;
use crate::recovery::{
    Create2Derivation, DelayUnit, ModuleKind, RecoveryDelay, RecoverySettings, RetryPolicy,
};

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Two weeks, the module's default recovery window.
pub const DEFAULT_EXPIRY_SECS: u64 = 14 * 24 * 60 * 60;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value in {key}: {message}")]
    Env { key: String, message: String },

    #[error("{0}")]
    Invalid(String),
}

/// Engine and client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// JSON-RPC endpoint used for reads.
    pub rpc_url: String,
    /// Wallet endpoint accepting `wallet_sendCalls`; defaults to `rpc_url`.
    pub wallet_url: Option<String>,
    pub chain_id: u64,
    pub relay_url: String,
    /// Address of the email recovery module.
    pub module_address: Option<Address>,
    pub module_kind: ModuleKind,
    /// Owner validator, required for universal modules.
    pub validator_address: Option<Address>,
    /// Index into the module's acceptance and recovery command templates.
    pub template_idx: u32,
    pub recovery_delay: RecoveryDelay,
    pub expiry_secs: u64,
    /// Account factory used for counterfactual addresses.
    pub factory_address: Address,
    /// `0x` hex hash of the account init code.
    pub init_code_hash: String,
    pub poll_interval_ms: u64,
    pub call_timeout_ms: u64,
    pub submit_attempts: u32,
    /// Directory holding persisted account state.
    pub data_dir: PathBuf,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://sepolia.base.org".to_string(),
            wallet_url: None,
            chain_id: 84532,
            relay_url: "http://127.0.0.1:4500".to_string(),
            module_address: None,
            module_kind: ModuleKind::Safe,
            validator_address: None,
            template_idx: 0,
            recovery_delay: RecoveryDelay {
                amount: 1,
                unit: DelayUnit::Secs,
            },
            expiry_secs: DEFAULT_EXPIRY_SECS,
            factory_address: Address::ZERO,
            init_code_hash: format!("0x{}", "00".repeat(32)),
            poll_interval_ms: 5_000,
            call_timeout_ms: 30_000,
            submit_attempts: 3,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl RecoveryConfig {
    /// Load defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.merge_with_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply `RECOVERY_*` overrides looked up through `lookup`.
    pub fn merge_with_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RECOVERY_RPC_URL") {
            self.rpc_url = v;
        }
        if let Some(v) = lookup("RECOVERY_WALLET_URL") {
            self.wallet_url = Some(v);
        }
        if let Some(v) = lookup("RECOVERY_CHAIN_ID") {
            self.chain_id = parse_env("RECOVERY_CHAIN_ID", &v)?;
        }
        if let Some(v) = lookup("RECOVERY_RELAY_URL") {
            self.relay_url = v;
        }
        if let Some(v) = lookup("RECOVERY_MODULE_ADDRESS") {
            self.module_address = Some(parse_env("RECOVERY_MODULE_ADDRESS", &v)?);
        }
        if let Some(v) = lookup("RECOVERY_MODULE_KIND") {
            self.module_kind = parse_env("RECOVERY_MODULE_KIND", &v)?;
        }
        if let Some(v) = lookup("RECOVERY_VALIDATOR_ADDRESS") {
            self.validator_address = Some(parse_env("RECOVERY_VALIDATOR_ADDRESS", &v)?);
        }
        if let Some(v) = lookup("RECOVERY_TEMPLATE_IDX") {
            self.template_idx = parse_env("RECOVERY_TEMPLATE_IDX", &v)?;
        }
        if let Some(v) = lookup("RECOVERY_EXPIRY_SECS") {
            self.expiry_secs = parse_env("RECOVERY_EXPIRY_SECS", &v)?;
        }
        if let Some(v) = lookup("RECOVERY_FACTORY_ADDRESS") {
            self.factory_address = parse_env("RECOVERY_FACTORY_ADDRESS", &v)?;
        }
        if let Some(v) = lookup("RECOVERY_INIT_CODE_HASH") {
            self.init_code_hash = v;
        }
        if let Some(v) = lookup("RECOVERY_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_env("RECOVERY_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("RECOVERY_CALL_TIMEOUT_MS") {
            self.call_timeout_ms = parse_env("RECOVERY_CALL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("RECOVERY_SUBMIT_ATTEMPTS") {
            self.submit_attempts = parse_env("RECOVERY_SUBMIT_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("RECOVERY_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("call_timeout_ms must be positive".into()));
        }
        if self.submit_attempts == 0 {
            return Err(ConfigError::Invalid("submit_attempts must be at least 1".into()));
        }
        if self.module_kind == ModuleKind::Universal && self.validator_address.is_none() {
            return Err(ConfigError::Invalid(
                "validator_address is required for universal modules".into(),
            ));
        }
        self.recovery_delay.as_secs()?;
        self.init_code_hash()?;
        Ok(())
    }

    /// Module address, which every chain-facing command needs.
    pub fn module(&self) -> Result<Address, ConfigError> {
        self.module_address
            .ok_or_else(|| ConfigError::Invalid("module_address is not configured".into()))
    }

    pub fn wallet_endpoint(&self) -> &str {
        self.wallet_url.as_deref().unwrap_or(&self.rpc_url)
    }

    pub fn init_code_hash(&self) -> Result<B256, ConfigError> {
        self.init_code_hash
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("init_code_hash: {}", e)))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            submit_attempts: self.submit_attempts,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            ..RetryPolicy::default()
        }
    }

    /// Module wiring for the orchestrator.
    pub fn settings(&self) -> Result<RecoverySettings, ConfigError> {
        Ok(RecoverySettings {
            module: self.module()?,
            module_kind: self.module_kind,
            validator: self.validator_address,
            template_idx: self.template_idx,
            policy: self.retry_policy(),
        })
    }

    pub fn derivation(&self) -> Result<Create2Derivation, ConfigError> {
        Ok(Create2Derivation::new(
            self.factory_address,
            self.init_code_hash()?,
        ))
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        key: key.to_string(),
        message: e.to_string(),
    })
}
