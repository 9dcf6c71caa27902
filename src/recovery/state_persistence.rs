//! Typed access to the persisted state of one account.
//!
//! `AccountStateStore` wraps a [`KeyValueStore`] namespace and knows the keys the engine uses:
//! the salt high-water mark, the account code, the burner wallet config shown to the user and the
//! best-effort snapshot of the [`AccountRecord`].

use crate::chain::Address;
use crate::recovery::repositories::{KeyValueStore, StorageError};
use crate::recovery::types::{AccountId, AccountRecord};
use crate::relay::AccountCode;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub const ACCOUNT_CODE_KEY: &str = "accountCode";
pub const SALT_NONCE_KEY: &str = "saltNonce";
pub const BURNER_WALLET_CONFIG_KEY: &str = "burnerWalletConfig";
pub const ACCOUNT_RECORD_KEY: &str = "accountRecord";

/// Display config of the provisioned wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnerWalletConfig {
    pub wallet_address: Address,
}

/// Persistence for one account namespace.
#[derive(Clone)]
pub struct AccountStateStore {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl AccountStateStore {
    pub fn new(store: Arc<dyn KeyValueStore>, account_id: &AccountId) -> Self {
        Self {
            store,
            namespace: account_id.0.clone(),
        }
    }

    async fn load<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.store.get(&self.namespace, key).await? {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        self.store
            .put(&self.namespace, key, serde_json::to_value(value)?)
            .await?;
        debug!("Persisted {} for {}", key, self.namespace);
        Ok(())
    }

    /// Next unused salt nonce, 0 when nothing was provisioned yet.
    pub async fn load_salt_nonce(&self) -> Result<u64, StorageError> {
        Ok(self.load(SALT_NONCE_KEY).await?.unwrap_or(0))
    }

    pub async fn save_salt_nonce(&self, nonce: u64) -> Result<(), StorageError> {
        self.save(SALT_NONCE_KEY, &nonce).await
    }

    pub async fn load_account_code(&self) -> Result<Option<AccountCode>, StorageError> {
        let raw: Option<String> = self.load(ACCOUNT_CODE_KEY).await?;
        Ok(raw.and_then(AccountCode::from_persisted))
    }

    pub async fn save_account_code(&self, code: &AccountCode) -> Result<(), StorageError> {
        self.save(ACCOUNT_CODE_KEY, code).await
    }

    pub async fn load_wallet_config(&self) -> Result<Option<BurnerWalletConfig>, StorageError> {
        self.load(BURNER_WALLET_CONFIG_KEY).await
    }

    pub async fn save_wallet_config(&self, wallet_address: Address) -> Result<(), StorageError> {
        self.save(BURNER_WALLET_CONFIG_KEY, &BurnerWalletConfig { wallet_address })
            .await
    }

    /// Load the last record snapshot. An unreadable snapshot is ignored, since the
    /// orchestrator can always rebuild its state from the chain.
    pub async fn load_record(&self) -> Result<Option<AccountRecord>, StorageError> {
        match self.load(ACCOUNT_RECORD_KEY).await {
            Ok(record) => Ok(record),
            Err(StorageError::Serialization(e)) => {
                warn!("Ignoring unreadable record for {}: {}", self.namespace, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn save_record(&self, record: &AccountRecord) -> Result<(), StorageError> {
        self.save(ACCOUNT_RECORD_KEY, record).await
    }
}
