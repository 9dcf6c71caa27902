//! Scriptable chain and relay doubles for unit tests.

use crate::chain::{
    Address, ChainClient, ChainError, ChainQuery, ChainValue, GuardianConfig, Operation,
    OperationHandle, Receipt, RecoveryRequest,
};
use crate::relay::{AccountCode, CompletionResult, RelayClient, RelayError, RequestId};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Sequence of scripted values; the last one repeats once the others are consumed.
#[derive(Default)]
struct Script<T: Clone + Default> {
    values: VecDeque<T>,
}

impl<T: Clone + Default> Script<T> {
    fn push(&mut self, value: T) {
        self.values.push_back(value);
    }

    fn next(&mut self) -> T {
        if self.values.len() > 1 {
            self.values.pop_front().unwrap_or_default()
        } else {
            self.values.front().cloned().unwrap_or_default()
        }
    }
}

#[derive(Default)]
struct ChainState {
    guardian_configs: HashMap<Address, Script<GuardianConfig>>,
    recovery_requests: HashMap<Address, Script<RecoveryRequest>>,
    templates: Vec<Vec<String>>,
    owners: HashMap<Address, Vec<Address>>,
    installed: HashSet<(Address, Address)>,
    read_failures: u32,
    submit_failures: u32,
    revert_receipts: bool,
    hang_receipts: bool,
    reads: HashMap<&'static str, u32>,
    submitted: Vec<Operation>,
}

/// In-memory [`ChainClient`] with scripted state and injectable failures.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new() -> Self {
        let chain = Self::default();
        chain.set_templates(vec![vec![
            "Accept".into(),
            "guardian".into(),
            "request".into(),
            "for".into(),
            "{ethAddr}".into(),
        ]]);
        chain
    }

    pub fn push_guardian_config(&self, account: Address, config: GuardianConfig) {
        let mut state = self.state.lock().unwrap();
        state.guardian_configs.entry(account).or_default().push(config);
    }

    pub fn push_recovery_request(&self, account: Address, request: RecoveryRequest) {
        let mut state = self.state.lock().unwrap();
        state.recovery_requests.entry(account).or_default().push(request);
    }

    pub fn set_templates(&self, templates: Vec<Vec<String>>) {
        self.state.lock().unwrap().templates = templates;
    }

    pub fn set_owners(&self, contract: Address, owners: Vec<Address>) {
        self.state.lock().unwrap().owners.insert(contract, owners);
    }

    pub fn mark_installed(&self, account: Address, module: Address) {
        self.state.lock().unwrap().installed.insert((account, module));
    }

    /// Fail the next `count` reads with a transient error.
    pub fn fail_reads(&self, count: u32) {
        self.state.lock().unwrap().read_failures = count;
    }

    /// Fail the next `count` submissions with a transient error.
    pub fn fail_submits(&self, count: u32) {
        self.state.lock().unwrap().submit_failures = count;
    }

    pub fn revert_receipts(&self, revert: bool) {
        self.state.lock().unwrap().revert_receipts = revert;
    }

    /// Never confirm receipts, so waits run into their deadline.
    pub fn hang_receipts(&self, hang: bool) {
        self.state.lock().unwrap().hang_receipts = hang;
    }

    pub fn read_count(&self, query: &'static str) -> u32 {
        self.state.lock().unwrap().reads.get(query).copied().unwrap_or(0)
    }

    pub fn submitted(&self) -> Vec<Operation> {
        self.state.lock().unwrap().submitted.clone()
    }

    /// Guardian address the fake module derives for `salt`.
    pub fn email_auth_address(salt: &[u8; 32]) -> Address {
        Address::from_slice(&salt[12..])
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn read_state(&self, contract: &Address, query: &ChainQuery) -> Result<ChainValue, ChainError> {
        let mut state = self.state.lock().unwrap();
        *state.reads.entry(query.name()).or_default() += 1;

        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(ChainError::ReadError("connection reset".into()));
        }

        Ok(match query {
            ChainQuery::GuardianConfig { account } => ChainValue::GuardianConfig(
                state.guardian_configs.entry(*account).or_default().next(),
            ),
            ChainQuery::RecoveryRequest { account } => ChainValue::RecoveryRequest(
                state.recovery_requests.entry(*account).or_default().next(),
            ),
            ChainQuery::AcceptanceCommandTemplates => ChainValue::CommandTemplates(state.templates.clone()),
            ChainQuery::Owners { .. } => {
                ChainValue::Owners(state.owners.get(contract).cloned().unwrap_or_default())
            }
            ChainQuery::IsModuleInstalled { account, module } => {
                ChainValue::Bool(state.installed.contains(&(*account, *module)))
            }
            ChainQuery::ComputeEmailAuthAddress { salt, .. } => {
                ChainValue::Address(Self::email_auth_address(salt))
            }
        })
    }

    async fn submit(&self, operation: Operation) -> Result<OperationHandle, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.submit_failures > 0 {
            state.submit_failures -= 1;
            return Err(ChainError::SubmitError("replacement transaction underpriced".into()));
        }

        let Operation::InstallModule { account, module, .. } = &operation;
        state.installed.insert((*account, *module));
        state.submitted.push(operation);
        Ok(OperationHandle(format!("0x{:064x}", state.submitted.len())))
    }

    async fn await_receipt(&self, handle: &OperationHandle, deadline: Duration) -> Result<Receipt, ChainError> {
        let (revert, hang) = {
            let state = self.state.lock().unwrap();
            (state.revert_receipts, state.hang_receipts)
        };
        if hang {
            tokio::time::sleep(deadline).await;
            return Err(ChainError::Timeout(deadline));
        }
        if revert {
            return Err(ChainError::Reverted(format!("{} reverted", handle)));
        }
        Ok(Receipt {
            handle: handle.clone(),
            transaction_hash: Some(handle.0.clone()),
            block_number: Some(1),
        })
    }
}

/// A request the relay received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedRequest {
    pub module: Address,
    pub guardian_email: String,
    pub template_idx: u32,
    pub subject: String,
}

#[derive(Default)]
struct RelayState {
    failures: VecDeque<RelayError>,
    acceptances: Vec<RelayedRequest>,
    recoveries: Vec<RelayedRequest>,
    completions: Vec<(Address, Address, Vec<u8>)>,
    salt_requests: Vec<String>,
    next_id: u64,
}

/// In-memory [`RelayClient`] recording every request.
#[derive(Default)]
pub struct FakeRelay {
    state: Mutex<RelayState>,
}

impl FakeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call, whatever it is, with `error`.
    pub fn push_failure(&self, error: RelayError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    pub fn acceptances(&self) -> Vec<RelayedRequest> {
        self.state.lock().unwrap().acceptances.clone()
    }

    pub fn recoveries(&self) -> Vec<RelayedRequest> {
        self.state.lock().unwrap().recoveries.clone()
    }

    pub fn completions(&self) -> Vec<(Address, Address, Vec<u8>)> {
        self.state.lock().unwrap().completions.clone()
    }

    /// Salt handed out for `email`, stable per email.
    pub fn salt_for(email: &str) -> [u8; 32] {
        let mut salt = [0u8; 32];
        for (i, byte) in email.bytes().enumerate() {
            salt[31 - (i % 20)] ^= byte;
        }
        salt
    }

    fn take_failure(state: &mut RelayState) -> Result<(), RelayError> {
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_id(state: &mut RelayState) -> RequestId {
        state.next_id += 1;
        RequestId(state.next_id.to_string())
    }
}

#[async_trait]
impl RelayClient for FakeRelay {
    async fn get_account_salt(&self, _account_code: &AccountCode, guardian_email: &str) -> Result<[u8; 32], RelayError> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state)?;
        state.salt_requests.push(guardian_email.to_string());
        Ok(Self::salt_for(guardian_email))
    }

    async fn submit_acceptance(
        &self,
        module: &Address,
        guardian_email: &str,
        _account_code: &AccountCode,
        template_idx: u32,
        subject: &str,
    ) -> Result<RequestId, RelayError> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state)?;
        state.acceptances.push(RelayedRequest {
            module: *module,
            guardian_email: guardian_email.to_string(),
            template_idx,
            subject: subject.to_string(),
        });
        Ok(Self::next_id(&mut state))
    }

    async fn submit_recovery(
        &self,
        module: &Address,
        guardian_email: &str,
        template_idx: u32,
        subject: &str,
    ) -> Result<RequestId, RelayError> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state)?;
        state.recoveries.push(RelayedRequest {
            module: *module,
            guardian_email: guardian_email.to_string(),
            template_idx,
            subject: subject.to_string(),
        });
        Ok(Self::next_id(&mut state))
    }

    async fn submit_completion(
        &self,
        module: &Address,
        wallet: &Address,
        call_data: &[u8],
    ) -> Result<CompletionResult, RelayError> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state)?;
        state.completions.push((*module, *wallet, call_data.to_vec()));
        Ok(CompletionResult {
            response: serde_json::Value::String("ok".into()),
        })
    }
}
