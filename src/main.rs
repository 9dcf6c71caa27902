use clap::{Parser, Subcommand};
use email_recovery_orchestrator::chain::{Address, ChainError, JsonRpcChainClient};
use email_recovery_orchestrator::config::{ConfigError, RecoveryConfig};
use email_recovery_orchestrator::recovery::{
	AccountId, FileKeyValueStore, InstallConfig, LifecycleState, OwnerKeyRef, RecoveryError, RecoveryOrchestrator,
};
use email_recovery_orchestrator::relay::{HttpRelayClient, RelayError};
use email_recovery_orchestrator::utils::{format_weight, truncate_hex};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

type Orchestrator = RecoveryOrchestrator<JsonRpcChainClient, HttpRelayClient>;

#[derive(Debug, Parser)]
#[command(name = "email-recovery", about = "Email-guardian recovery for smart-contract wallets")]
struct Cli {
	/// JSON config file
	#[arg(long, env = "RECOVERY_CONFIG")]
	config: Option<PathBuf>,

	/// Local identifier of the account; names its persisted state
	#[arg(long, default_value = "default")]
	account: String,

	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Provision or attach a wallet, install the module and wait for the guardian to accept
	Setup {
		/// Owner key reference used to derive a new wallet
		#[arg(long, conflicts_with = "wallet")]
		owner: Option<String>,
		/// Existing wallet to guard instead of a derived one
		#[arg(long)]
		wallet: Option<Address>,
		#[arg(long)]
		guardian_email: String,
	},
	/// Request recovery, wait for the guardian's approval and complete it
	Recover {
		#[arg(long)]
		guardian_email: String,
		#[arg(long)]
		old_owner: Address,
		#[arg(long)]
		new_owner: Address,
		/// Return after submitting the request instead of waiting for approval
		#[arg(long)]
		no_wait: bool,
	},
	/// Print the reconciled state of the account
	Status,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Chain(#[from] ChainError),

	#[error(transparent)]
	Relay(#[from] RelayError),

	#[error(transparent)]
	Recovery(#[from] RecoveryError),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("{0}")]
	Usage(String),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into())
				.add_directive(
					"email_recovery_orchestrator=debug"
						.parse()
						.expect("static directive"),
				),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let cli = Cli::parse();
	if let Err(e) = run(cli).await {
		error!("{}", e);
		std::process::exit(1);
	}
}

async fn run(cli: Cli) -> Result<(), CliError> {
	let config = RecoveryConfig::load(cli.config.as_deref())?;
	let settings = config.settings()?;
	let call_timeout = Duration::from_millis(config.call_timeout_ms);

	let chain = Arc::new(JsonRpcChainClient::new(
		config.rpc_url.clone(),
		config.wallet_endpoint().to_string(),
		config.chain_id,
		call_timeout,
	)?);
	let relay = Arc::new(HttpRelayClient::new(config.relay_url.clone(), call_timeout)?);
	let store = Arc::new(FileKeyValueStore::new(config.data_dir.clone()));

	let mut orchestrator: Orchestrator = RecoveryOrchestrator::new(
		AccountId(cli.account),
		chain,
		relay,
		store,
		Box::new(config.derivation()?),
		settings,
	);

	let cancel = orchestrator.cancellation();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("Interrupted, stopping");
			cancel.cancel();
		}
	});

	orchestrator.resume().await?;

	match cli.command {
		Command::Setup {
			owner,
			wallet,
			guardian_email,
		} => setup(&mut orchestrator, &config, owner, wallet, &guardian_email).await,
		Command::Recover {
			guardian_email,
			old_owner,
			new_owner,
			no_wait,
		} => recover(&mut orchestrator, &guardian_email, old_owner, new_owner, no_wait).await,
		Command::Status => status(&orchestrator).await,
	}
}

async fn setup(
	orchestrator: &mut Orchestrator,
	config: &RecoveryConfig,
	owner: Option<String>,
	wallet: Option<Address>,
	guardian_email: &str,
) -> Result<(), CliError> {
	if orchestrator.state() != LifecycleState::AwaitingGuardianSetup {
		info!("Guardians are already configured ({})", orchestrator.state());
		return Ok(());
	}

	let wallet = match (wallet, orchestrator.record().wallet_address) {
		(Some(wallet), _) => {
			orchestrator.attach_wallet(wallet).await?;
			wallet
		}
		(None, Some(existing)) => existing,
		(None, None) => {
			let owner = owner.map(OwnerKeyRef);
			orchestrator.provision_account(owner.as_ref()).await?.wallet_address
		}
	};
	orchestrator.ensure_account_code().await?;

	let guardian = orchestrator.guardian_address(guardian_email).await?;
	let install = InstallConfig {
		validator: config.validator_address.unwrap_or(wallet),
		guardians: vec![guardian],
		weights: vec![1],
		threshold: 1,
		delay: config.recovery_delay,
		expiry_secs: config.expiry_secs,
	};
	orchestrator.install_module(&install).await?;

	if orchestrator.record().acceptance_ticket.is_none() {
		orchestrator.request_guardian_acceptance(Some(guardian_email)).await?;
	}
	info!("Waiting for {} to accept guarding {}", guardian_email, wallet);
	orchestrator.await_guardian_acceptance().await?;
	info!("Wallet {} is guarded", wallet);
	Ok(())
}

async fn recover(
	orchestrator: &mut Orchestrator,
	guardian_email: &str,
	old_owner: Address,
	new_owner: Address,
	no_wait: bool,
) -> Result<(), CliError> {
	if orchestrator.state() == LifecycleState::GuardianConfigured {
		orchestrator
			.request_recovery(Some(guardian_email), old_owner, new_owner)
			.await?;
	}
	if no_wait {
		info!("Recovery state: {}", orchestrator.state());
		return Ok(());
	}
	if orchestrator.state() == LifecycleState::RecoveryRequested {
		let request = orchestrator.await_recovery_ready().await?;
		info!(
			"Guardians approved with weight {}",
			format_weight(request.current_weight, request.threshold)
		);
	}
	match orchestrator.state() {
		LifecycleState::RecoveryReady => {
			orchestrator.complete_recovery().await?;
			info!("Recovery completed, new owner {}", new_owner);
			Ok(())
		}
		LifecycleState::RecoveryCompleted => {
			info!("Recovery was already completed");
			Ok(())
		}
		other => Err(CliError::Usage(format!("cannot recover while {}", other))),
	}
}

async fn status(orchestrator: &Orchestrator) -> Result<(), CliError> {
	let record = orchestrator.record();
	let owners = match record.wallet_address {
		Some(_) => orchestrator.current_owners().await?,
		None => Vec::new(),
	};
	let status = json!({
		"account": record.account_id,
		"state": record.lifecycle_state,
		"wallet": record.wallet_address,
		"moduleInstalled": record.module_installed,
		"accountCode": record.account_code.as_ref().map(|code| truncate_hex(code.as_str(), 6)),
		"owners": owners,
		"pendingRecovery": record.pending_recovery,
		"updatedAt": record.updated_at,
	});
	println!("{}", serde_json::to_string_pretty(&status)?);
	Ok(())
}
