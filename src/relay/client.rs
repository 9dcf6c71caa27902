//!
//! HTTP client for the email relay.
//!
//! The relay turns guardian email replies into on-chain submissions. This module defines the
//! `RelayClient` trait used by the recovery stages and an implementation speaking the relay's
//! JSON API. Every call is a single request/response; correlation with on-chain state happens
//! by polling the chain, not through the relay.

use super::types::*;
use crate::chain::Address;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

/// Off-chain approval channel.
#[async_trait]
pub trait RelayClient: Send + Sync {
	/// Derive the salt of the guardian's email-auth contract for this account.
	async fn get_account_salt(&self, account_code: &AccountCode, guardian_email: &str) -> Result<[u8; 32], RelayError>;

	/// Ask a guardian to accept guarding the account named in `subject`.
	async fn submit_acceptance(
		&self,
		module: &Address,
		guardian_email: &str,
		account_code: &AccountCode,
		template_idx: u32,
		subject: &str,
	) -> Result<RequestId, RelayError>;

	/// Ask a guardian to approve the recovery described in `subject`.
	async fn submit_recovery(
		&self,
		module: &Address,
		guardian_email: &str,
		template_idx: u32,
		subject: &str,
	) -> Result<RequestId, RelayError>;

	/// Have the relay execute the ownership transfer for `wallet`.
	async fn submit_completion(
		&self,
		module: &Address,
		wallet: &Address,
		call_data: &[u8],
	) -> Result<CompletionResult, RelayError>;
}

/// Relay HTTP client
#[derive(Clone, Debug)]
pub struct HttpRelayClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the relay, without trailing slash.
	base_url: String,
}

#[derive(Debug, Deserialize)]
struct RequestAccepted {
	request_id: Value,
}

impl HttpRelayClient {
	/// Create a new relay client.
	///
	/// # Arguments
	/// * `base_url` - Base URL of the relay API.
	/// * `request_timeout` - Upper bound for a single HTTP request.
	pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, RelayError> {
		let http_client = Client::builder().timeout(request_timeout).build()?;
		let base_url = base_url.into().trim_end_matches('/').to_string();

		Ok(Self { http_client, base_url })
	}

	/// POST a JSON body to `path` and return the parsed response body.
	async fn post(&self, path: &str, body: Value) -> Result<Value, RelayError> {
		let url = format!("{}{}", self.base_url, path);
		debug!("POST {}", url);

		let response = self
			.http_client
			.post(&url)
			.header("Content-Type", "application/json")
			.json(&body)
			.send()
			.await?;

		let status = response.status();
		let text = response.text().await?;

		if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
			return Err(RelayError::Rejected(format!("{}: {}", status, text)));
		}
		if !status.is_success() {
			return Err(RelayError::Status {
				status: status.as_u16(),
				body: text,
			});
		}

		// Some endpoints answer with a bare string rather than JSON.
		Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
	}

	fn request_id(response: Value) -> Result<RequestId, RelayError> {
		let accepted: RequestAccepted = serde_json::from_value(response)?;
		match accepted.request_id {
			Value::String(id) => Ok(RequestId(id)),
			Value::Number(id) => Ok(RequestId(id.to_string())),
			other => Err(RelayError::InvalidResponse(format!("unexpected request_id {}", other))),
		}
	}
}

/// Parse a `0x`-prefixed 32-byte hex salt.
fn parse_salt(response: &Value) -> Result<[u8; 32], RelayError> {
	let raw = response
		.as_str()
		.ok_or_else(|| RelayError::InvalidResponse(format!("salt is not a string: {}", response)))?;
	let mut salt = [0u8; 32];
	hex::decode_to_slice(raw.trim().trim_start_matches("0x"), &mut salt)
		.map_err(|e| RelayError::InvalidResponse(format!("invalid salt `{}`: {}", raw, e)))?;
	Ok(salt)
}

#[async_trait]
impl RelayClient for HttpRelayClient {
	async fn get_account_salt(&self, account_code: &AccountCode, guardian_email: &str) -> Result<[u8; 32], RelayError> {
		let response = self
			.post(
				"/api/getAccountSalt",
				json!({
					"account_code": account_code.as_str(),
					"email_addr": guardian_email,
				}),
			)
			.await?;
		parse_salt(&response)
	}

	async fn submit_acceptance(
		&self,
		module: &Address,
		guardian_email: &str,
		account_code: &AccountCode,
		template_idx: u32,
		subject: &str,
	) -> Result<RequestId, RelayError> {
		let response = self
			.post(
				"/api/acceptanceRequest",
				json!({
					"controller_eth_addr": module.to_string(),
					"guardian_email_addr": guardian_email,
					"account_code": account_code.as_str(),
					"template_idx": template_idx,
					"subject": subject,
				}),
			)
			.await?;
		let request_id = Self::request_id(response)?;
		info!("Relay accepted acceptance request {}", request_id);
		Ok(request_id)
	}

	async fn submit_recovery(
		&self,
		module: &Address,
		guardian_email: &str,
		template_idx: u32,
		subject: &str,
	) -> Result<RequestId, RelayError> {
		let response = self
			.post(
				"/api/recoveryRequest",
				json!({
					"controller_eth_addr": module.to_string(),
					"guardian_email_addr": guardian_email,
					"template_idx": template_idx,
					"subject": subject,
				}),
			)
			.await?;
		let request_id = Self::request_id(response)?;
		info!("Relay accepted recovery request {}", request_id);
		Ok(request_id)
	}

	async fn submit_completion(
		&self,
		module: &Address,
		wallet: &Address,
		call_data: &[u8],
	) -> Result<CompletionResult, RelayError> {
		let response = self
			.post(
				"/api/completeRequest",
				json!({
					"controller_eth_addr": module.to_string(),
					"account_eth_addr": wallet.to_string(),
					"complete_calldata": format!("0x{}", hex::encode(call_data)),
				}),
			)
			.await?;
		Ok(CompletionResult { response })
	}
}
