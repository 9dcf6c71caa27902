//! Deterministic, collision-free account provisioning.
//!
//! The provisioner is the single writer of the salt high-water mark and the account code of one
//! account namespace. Both are persisted before they are handed out, so an address is never
//! returned twice and a code is never regenerated, even across restarts.

use crate::chain::Address;
use crate::recovery::state_persistence::AccountStateStore;
use crate::recovery::types::{OwnerKeyRef, RecoveryError};
use crate::relay::AccountCode;

use alloy_primitives::{B256, keccak256};
use tokio::sync::Mutex;
use tracing::info;

/// Maps an owner key reference and a salt nonce to a counterfactual address.
pub trait AddressDerivation: Send + Sync {
    fn derive(&self, owner: &OwnerKeyRef, nonce: u64) -> Address;
}

/// Counterfactual address of a wallet deployed by a CREATE2 factory:
/// `factory.create2(keccak256(owner ‖ nonce_be32), init_code_hash)`.
#[derive(Debug, Clone)]
pub struct Create2Derivation {
    factory: Address,
    init_code_hash: B256,
}

impl Create2Derivation {
    pub fn new(factory: Address, init_code_hash: B256) -> Self {
        Self {
            factory,
            init_code_hash,
        }
    }

    fn salt(owner: &OwnerKeyRef, nonce: u64) -> B256 {
        let mut preimage = owner.as_bytes().to_vec();
        preimage.extend_from_slice(&B256::left_padding_from(&nonce.to_be_bytes())[..]);
        keccak256(preimage)
    }
}

impl AddressDerivation for Create2Derivation {
    fn derive(&self, owner: &OwnerKeyRef, nonce: u64) -> Address {
        self.factory.create2(Self::salt(owner, nonce), self.init_code_hash)
    }
}

/// A freshly provisioned wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionedWallet {
    pub wallet_address: Address,
    pub salt_nonce: u64,
}

pub struct AccountProvisioner {
    derivation: Box<dyn AddressDerivation>,
    state: AccountStateStore,
    // single writer for the nonce and the account code
    lock: Mutex<()>,
}

impl AccountProvisioner {
    pub fn new(derivation: Box<dyn AddressDerivation>, state: AccountStateStore) -> Self {
        Self {
            derivation,
            state,
            lock: Mutex::new(()),
        }
    }

    /// Derive the next wallet address for `owner`.
    ///
    /// The incremented nonce is persisted before the address is returned.
    pub async fn provision(&self, owner: Option<&OwnerKeyRef>) -> Result<ProvisionedWallet, RecoveryError> {
        let owner = owner
            .filter(|owner| !owner.is_blank())
            .ok_or_else(|| RecoveryError::Provision("owner key reference is missing".into()))?;

        let _guard = self.lock.lock().await;

        let salt_nonce = self.state.load_salt_nonce().await?;
        let next = salt_nonce
            .checked_add(1)
            .ok_or_else(|| RecoveryError::Provision("salt nonce exhausted".into()))?;
        let wallet_address = self.derivation.derive(owner, salt_nonce);

        self.state.save_salt_nonce(next).await?;
        self.state.save_wallet_config(wallet_address).await?;

        info!("Provisioned wallet {} with salt nonce {}", wallet_address, salt_nonce);
        Ok(ProvisionedWallet {
            wallet_address,
            salt_nonce,
        })
    }

    /// Return the persisted account code, generating and persisting one on first use.
    pub async fn ensure_account_code(&self) -> Result<AccountCode, RecoveryError> {
        let _guard = self.lock.lock().await;

        if let Some(code) = self.state.load_account_code().await? {
            return Ok(code);
        }

        let code = AccountCode::generate();
        self.state.save_account_code(&code).await?;
        info!("Generated new account code");
        Ok(code)
    }
}
