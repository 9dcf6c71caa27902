//!
//! Chain access for the recovery orchestrator.
//!
//! This module defines the `ChainClient` trait the recovery stages are written against and a
//! JSON-RPC implementation of it. Reads are plain `eth_call`s against the recovery module,
//! the account and its validator. Operations are handed to the connected wallet through
//! EIP-5792 `wallet_sendCalls`, so signing stays with the key holder, and receipts are
//! tracked with `wallet_getCallsStatus`.

use super::types::*;
use crate::transaction::builder::{install_module_call, is_module_installed_call};
use crate::transaction::contracts::{IERC7579Account, IEmailRecoveryModule, IOwnableValidator, ISafe};

use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read and write access to contract state.
#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Read a value from `contract`.
	async fn read_state(&self, contract: &Address, query: &ChainQuery) -> Result<ChainValue, ChainError>;

	/// Submit an operation and return a handle for tracking it.
	async fn submit(&self, operation: Operation) -> Result<OperationHandle, ChainError>;

	/// Wait until the operation is included, failing with `Timeout` once `deadline` elapses
	/// or `Reverted` if the chain rejected it.
	async fn await_receipt(&self, handle: &OperationHandle, deadline: Duration) -> Result<Receipt, ChainError>;
}

/// EIP-5792 batch status codes.
const CALLS_STATUS_PENDING: u64 = 100;
const CALLS_STATUS_CONFIRMED: u64 = 200;
const CALLS_STATUS_OFFCHAIN_FAILURE: u64 = 400;

/// JSON-RPC chain client
#[derive(Debug)]
pub struct JsonRpcChainClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Node endpoint serving `eth_call`.
	rpc_url: String,
	/// Wallet endpoint serving `wallet_sendCalls` and `wallet_getCallsStatus`.
	wallet_url: String,
	/// Chain id passed with every call batch.
	chain_id: u64,
	/// Interval between `wallet_getCallsStatus` polls.
	receipt_poll_interval: Duration,
	next_request_id: AtomicU64,
}

impl JsonRpcChainClient {
	/// Create a new JSON-RPC client.
	///
	/// # Arguments
	/// * `rpc_url` - The node endpoint used for reads.
	/// * `wallet_url` - The wallet endpoint used for submissions.
	/// * `chain_id` - The chain the wallet submits to.
	/// * `request_timeout` - Upper bound for a single HTTP request.
	pub fn new(
		rpc_url: String,
		wallet_url: String,
		chain_id: u64,
		request_timeout: Duration,
	) -> Result<Self, ChainError> {
		let http_client = Client::builder().timeout(request_timeout).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			wallet_url,
			chain_id,
			receipt_poll_interval: Duration::from_secs(1),
			next_request_id: AtomicU64::new(1),
		})
	}

	/// Override how often receipts are polled.
	pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
		self.receipt_poll_interval = interval;
		self
	}

	/// Execute a JSON-RPC request and return its `result` field.
	async fn execute_rpc(&self, url: &str, method: &str, params: Value) -> Result<Value, RpcFailure> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": self.next_request_id.fetch_add(1, Ordering::Relaxed),
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await
			.map_err(RpcFailure::Transport)?;

		if !response.status().is_success() {
			return Err(RpcFailure::Status(response.status().as_u16()));
		}

		let response_json: Value = response.json().await.map_err(RpcFailure::Transport)?;

		if let Some(error) = response_json.get("error") {
			let message = error
				.get("message")
				.and_then(|m| m.as_str())
				.unwrap_or("unknown JSON-RPC error")
				.to_string();
			return Err(RpcFailure::Rpc(message));
		}

		response_json.get("result").cloned().ok_or(RpcFailure::MissingResult)
	}

	/// `eth_call` against `to` at the latest block, returning the raw return data.
	async fn eth_call(&self, to: &Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
		let params = json!([
			{ "to": to.to_string(), "data": format!("0x{}", hex::encode(&data)) },
			"latest"
		]);

		let result = self
			.execute_rpc(&self.rpc_url, "eth_call", params)
			.await
			.map_err(|failure| failure.into_chain_error(ChainError::ReadError))?;

		let encoded = result.as_str().ok_or_else(|| {
			ChainError::ReadError(format!("eth_call returned non-string result: {}", result))
		})?;
		hex::decode(encoded.trim_start_matches("0x"))
			.map_err(|e| ChainError::ReadError(format!("eth_call returned invalid hex: {}", e)))
	}

	/// `eth_call` with an encoded `call`, decoding its return data.
	async fn call<T: SolCall>(&self, to: &Address, call: T) -> Result<T::Return, ChainError> {
		let raw = self.eth_call(to, call.abi_encode()).await?;
		Ok(T::abi_decode_returns(&raw)?)
	}

	async fn read_guardian_config(&self, module: &Address, account: Address) -> Result<GuardianConfig, ChainError> {
		let config = self
			.call(module, IEmailRecoveryModule::getGuardianConfigCall { account })
			.await?;

		Ok(GuardianConfig {
			guardian_count: narrow("guardianCount", config.guardianCount)?,
			total_weight: narrow("totalWeight", config.totalWeight)?,
			accepted_weight: narrow("acceptedWeight", config.acceptedWeight)?,
			threshold: narrow("threshold", config.threshold)?,
		})
	}

	async fn read_recovery_request(&self, module: &Address, account: Address) -> Result<RecoveryRequest, ChainError> {
		let request = self
			.call(module, IEmailRecoveryModule::getRecoveryRequestCall { account })
			.await?;
		let config = self.read_guardian_config(module, account).await?;

		Ok(RecoveryRequest {
			current_weight: narrow("currentWeight", request.currentWeight)?,
			threshold: config.threshold,
			requested_new_owner: None,
			execute_after: narrow("executeAfter", request.executeAfter)?,
			execute_before: narrow("executeBefore", request.executeBefore)?,
		})
	}

	async fn read(&self, contract: &Address, query: &ChainQuery) -> Result<ChainValue, ChainError> {
		match query {
			ChainQuery::GuardianConfig { account } => Ok(ChainValue::GuardianConfig(
				self.read_guardian_config(contract, *account).await?,
			)),
			ChainQuery::RecoveryRequest { account } => Ok(ChainValue::RecoveryRequest(
				self.read_recovery_request(contract, *account).await?,
			)),
			ChainQuery::AcceptanceCommandTemplates => Ok(ChainValue::CommandTemplates(
				self.call(contract, IEmailRecoveryModule::acceptanceCommandTemplatesCall {})
					.await?,
			)),
			ChainQuery::Owners { account } => {
				// A Safe answers `getOwners()` itself; a validator is asked about the account.
				let owners = if contract == account {
					self.call(contract, ISafe::getOwnersCall {}).await?
				} else {
					self.call(contract, IOwnableValidator::getOwnersCall { account: *account })
						.await?
				};
				Ok(ChainValue::Owners(owners))
			}
			ChainQuery::IsModuleInstalled { account, module } => {
				let raw = self.eth_call(account, is_module_installed_call(*module)).await?;
				Ok(ChainValue::Bool(
					IERC7579Account::isModuleInstalledCall::abi_decode_returns(&raw)?,
				))
			}
			ChainQuery::ComputeEmailAuthAddress { account, salt } => {
				let call = IEmailRecoveryModule::computeEmailAuthAddressCall {
					recoveredAccount: *account,
					accountSalt: (*salt).into(),
				};
				Ok(ChainValue::Address(self.call(contract, call).await?))
			}
		}
	}

	/// Translate an operation into the `(from, to, data)` call the wallet sends.
	fn operation_call(operation: &Operation) -> (Address, Address, Vec<u8>) {
		match operation {
			Operation::InstallModule {
				account,
				module,
				module_type_id,
				init_data,
			} => (*account, *account, install_module_call(*module, *module_type_id, init_data)),
		}
	}

	async fn fetch_calls_status(&self, handle: &OperationHandle) -> Result<CallsStatus, ChainError> {
		let result = self
			.execute_rpc(&self.wallet_url, "wallet_getCallsStatus", json!([handle.0]))
			.await
			.map_err(|failure| failure.into_chain_error(ChainError::ReadError))?;
		Ok(serde_json::from_value(result)?)
	}
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
	async fn read_state(&self, contract: &Address, query: &ChainQuery) -> Result<ChainValue, ChainError> {
		debug!("Reading {} from {}", query.name(), contract);
		self.read(contract, query).await
	}

	async fn submit(&self, operation: Operation) -> Result<OperationHandle, ChainError> {
		let (from, to, data) = Self::operation_call(&operation);

		let params = json!([{
			"version": "2.0.0",
			"from": from.to_string(),
			"chainId": format!("0x{:x}", self.chain_id),
			"atomicRequired": true,
			"calls": [{
				"to": to.to_string(),
				"data": format!("0x{}", hex::encode(&data)),
				"value": "0x0",
			}],
		}]);

		let result = self
			.execute_rpc(&self.wallet_url, "wallet_sendCalls", params)
			.await
			.map_err(|failure| failure.into_chain_error(ChainError::SubmitError))?;

		let id = result
			.get("id")
			.and_then(|id| id.as_str())
			.or_else(|| result.as_str())
			.ok_or_else(|| ChainError::SubmitError(format!("wallet_sendCalls returned no id: {}", result)))?
			.to_string();

		info!("Submitted {} from {} as call batch {}", operation.name(), from, id);
		Ok(OperationHandle(id))
	}

	async fn await_receipt(&self, handle: &OperationHandle, deadline: Duration) -> Result<Receipt, ChainError> {
		let wait = async {
			loop {
				match self.fetch_calls_status(handle).await {
					Ok(status) if status.status == CALLS_STATUS_CONFIRMED => {
						let receipt = status.receipts.into_iter().next();
						return Ok(Receipt {
							handle: handle.clone(),
							transaction_hash: receipt.as_ref().map(|r| r.transaction_hash.clone()),
							block_number: receipt
								.as_ref()
								.and_then(|r| u64::from_str_radix(r.block_number.trim_start_matches("0x"), 16).ok()),
						});
					}
					Ok(status) if status.status == CALLS_STATUS_PENDING => {
						debug!("Call batch {} still pending", handle);
					}
					Ok(status) if status.status >= CALLS_STATUS_OFFCHAIN_FAILURE => {
						return Err(ChainError::Reverted(format!(
							"call batch {} failed with status {}",
							handle, status.status
						)));
					}
					Ok(status) => debug!("Call batch {} reported status {}", handle, status.status),
					Err(e) if e.is_transient() => warn!("Failed to fetch status of {}: {}", handle, e),
					Err(e) => return Err(e),
				}
				tokio::time::sleep(self.receipt_poll_interval).await;
			}
		};

		tokio::time::timeout(deadline, wait)
			.await
			.map_err(|_| ChainError::Timeout(deadline))?
	}
}

/// Response of `wallet_getCallsStatus`.
#[derive(Debug, Deserialize)]
struct CallsStatus {
	status: u64,
	#[serde(default)]
	receipts: Vec<CallReceipt>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallReceipt {
	transaction_hash: String,
	#[serde(default)]
	block_number: String,
}

/// Failure of a single JSON-RPC exchange, before it is attributed to a read or a submit.
#[derive(Debug)]
enum RpcFailure {
	Transport(reqwest::Error),
	Status(u16),
	Rpc(String),
	MissingResult,
}

impl RpcFailure {
	fn into_chain_error(self, transient: fn(String) -> ChainError) -> ChainError {
		match self {
			RpcFailure::Transport(e) => ChainError::HttpError(e),
			RpcFailure::Status(status) => transient(format!("HTTP status {}", status)),
			RpcFailure::Rpc(message) if message.contains("revert") => ChainError::Reverted(message),
			RpcFailure::Rpc(message) => transient(message),
			RpcFailure::MissingResult => transient("response carried no result".to_string()),
		}
	}
}

/// Narrow a `uint256` counter the orchestrator tracks as `u64`, rejecting values that do not fit.
fn narrow(field: &'static str, value: U256) -> Result<u64, ChainError> {
	u64::try_from(value).map_err(|_| ChainError::UnexpectedValue {
		query: field,
		detail: format!("{} does not fit in 64 bits", value),
	})
}
