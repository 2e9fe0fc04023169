//! `genesis`: manage a TEE-backed ERC-8004 agent identity.

use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use genesis_identity::error::RegistryError;
use genesis_identity::feedback::{FeedbackLedger, NewFeedback};
use genesis_identity::identity::agent_card::{AgentCardInput, RegistrationRef, agent_card_json};
use genesis_identity::identity::provider::tee_provider;
use genesis_identity::identity::wallet::{
    SignatureReport, recover_digest_signer, recover_message_signer,
};
use genesis_identity::settings::Settings;
use genesis_identity::{
    AgentSession, Config, DstackClient, IdentityProvider, KeyDerivationService,
    LocalIdentityProvider, RegistrationOutcome, RegistryClient,
};

#[derive(Debug, Parser)]
#[command(name = "genesis", version, about = "TEE-backed ERC-8004 agent identity")]
struct Cli {
    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    /// TOML settings file to use instead of ~/.genesis/settings.json.
    #[arg(long, global = true, env = "GENESIS_CONFIG")]
    config: Option<PathBuf>,

    /// Use the development key backend (GENESIS_DEV_PRIVATE_KEY, or a
    /// local hash of domain and salt). Not hardware-protected.
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the agent's derived address.
    Address,
    /// Produce an attestation quote binding domain, address and agent id.
    Attest {
        #[arg(long, value_parser = parse_u256)]
        agent_id: Option<U256>,
    },
    /// Look up registrations by domain and/or address (defaults to this agent).
    Check {
        #[arg(long)]
        domain: Option<String>,
        #[arg(long, value_parser = parse_address)]
        address: Option<Address>,
    },
    /// Register this agent with the identity registry (idempotent).
    Register,
    /// Ask a validator agent to validate work identified by a data hash.
    RequestValidation {
        #[arg(value_parser = parse_u256)]
        validator_id: U256,
        #[arg(value_parser = parse_b256)]
        data_hash: B256,
    },
    /// Respond to a validation request with a score (0-100).
    Respond {
        #[arg(value_parser = parse_b256)]
        data_hash: B256,
        score: u8,
    },
    /// Allow a client agent to leave feedback about this agent.
    AuthorizeFeedback {
        #[arg(value_parser = parse_u256)]
        client_id: U256,
    },
    /// Off-chain feedback ledger.
    #[command(subcommand)]
    Feedback(FeedbackCommand),
    /// Sign with the agent key (EIP-191 personal message by default).
    Sign {
        message: String,
        /// Treat MESSAGE as a 32-byte hex digest and sign it unprefixed.
        #[arg(long)]
        digest: bool,
    },
    /// Print the ERC-8004 agent card.
    Card,
    /// Read or change persisted settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Debug, Subcommand)]
enum FeedbackCommand {
    /// Record feedback about a server agent.
    Record {
        #[arg(value_parser = parse_u256)]
        server_id: U256,
        rating: u8,
        #[arg(long, value_parser = parse_u256)]
        client_id: U256,
        #[arg(long)]
        comment: Option<String>,
        /// acceptFeedback transaction that authorized this feedback.
        #[arg(long, value_parser = parse_b256)]
        authorization_tx: Option<B256>,
    },
    /// Show feedback and the average rating for a server agent.
    Show {
        #[arg(value_parser = parse_u256)]
        server_id: U256,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsCommand {
    Get { path: String },
    Set { path: String, value: String },
    Reset { path: String },
    List,
}

fn parse_u256(s: &str) -> Result<U256, String> {
    s.parse::<U256>().map_err(|e| e.to_string())
}

fn parse_b256(s: &str) -> Result<B256, String> {
    s.parse::<B256>().map_err(|e| e.to_string())
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.parse::<Address>().map_err(|e| e.to_string())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("genesis_identity=info,genesis=info"));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_provider(config: &Config, dev: bool) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    let identity = config.identity()?;
    if dev {
        let provider = match &config.dev_private_key {
            Some(key) => LocalIdentityProvider::from_private_key(identity, key)?,
            None => LocalIdentityProvider::hashed(identity)?,
        };
        return Ok(Arc::new(provider));
    }

    let service = DstackClient::from_mode(config.tee.mode, config.tee.endpoint.as_deref())
        .map(|client| Arc::new(client) as Arc<dyn KeyDerivationService>);
    let provider = tee_provider(identity, service)
        .context("TEE unavailable; pass --dev to use the development key backend")?;
    Ok(Arc::new(provider))
}

async fn build_client(config: &Config) -> anyhow::Result<Arc<RegistryClient>> {
    let client = RegistryClient::connect_http(
        config.chain.rpc_url.clone(),
        config.chain.chain_id,
        config.registry_addresses()?,
        config.registry_options.clone(),
    )
    .await?;
    Ok(Arc::new(client))
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Next step for errors the operator can act on.
fn hint(err: &anyhow::Error) -> Option<String> {
    let registry = err.downcast_ref::<RegistryError>().or_else(|| {
        err.downcast_ref::<genesis_identity::Error>()
            .and_then(|e| match e {
                genesis_identity::Error::Registry(r) => Some(r),
                _ => None,
            })
    })?;
    match registry {
        RegistryError::InsufficientFunds {
            address, shortfall, ..
        } => Some(format!("fund {address:#x} with at least {shortfall} wei")),
        RegistryError::ConfirmationTimeout { tx_hash, .. } => Some(format!(
            "transaction {tx_hash} may still confirm; run `genesis check` before retrying"
        )),
        RegistryError::AgentIdUnresolved { address, .. } => Some(format!(
            "registration succeeded; run `genesis check --address {address:#x}` later"
        )),
        RegistryError::Conflict(_) => Some("choose a different domain or salt".to_string()),
        RegistryError::NotRegistered { .. } => Some("run `genesis register` first".to_string()),
        _ => None,
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::from_toml_file(path)?),
        None => Ok(Config::resolve(&Settings::load_from(&Settings::default_path()))?),
    }
}

fn settings_command(cmd: SettingsCommand) -> anyhow::Result<()> {
    let settings_path = Settings::default_path();
    let mut settings = Settings::load_from(&settings_path);
    match cmd {
        SettingsCommand::Get { path } => match settings.get(&path) {
            Some(value) => println!("{value}"),
            None => bail!("unknown setting: {path}"),
        },
        SettingsCommand::Set { path, value } => {
            settings.set(&path, &value).map_err(anyhow::Error::msg)?;
            settings.save_to(&settings_path)?;
        }
        SettingsCommand::Reset { path } => {
            settings.reset(&path).map_err(anyhow::Error::msg)?;
            settings.save_to(&settings_path)?;
        }
        SettingsCommand::List => {
            for (path, value) in settings.list() {
                println!("{path} = {value}");
            }
        }
    }
    Ok(())
}

fn feedback_command(config: &Config, cmd: FeedbackCommand) -> anyhow::Result<()> {
    let mut ledger = FeedbackLedger::load(&config.feedback_path)?;
    match cmd {
        FeedbackCommand::Record {
            server_id,
            rating,
            client_id,
            comment,
            authorization_tx,
        } => {
            let record = ledger.record(NewFeedback {
                client_agent_id: client_id,
                server_agent_id: server_id,
                rating,
                comment,
                authorization_tx,
            })?;
            print_json(&serde_json::to_value(record)?)?;
        }
        FeedbackCommand::Show { server_id } => {
            print_json(&json!({
                "server_agent_id": server_id,
                "average_rating": ledger.average_rating(server_id),
                "records": ledger.for_server(server_id),
            }))?;
        }
    }
    Ok(())
}

async fn sign_command(
    provider: &dyn IdentityProvider,
    message: &str,
    digest: bool,
) -> anyhow::Result<SignatureReport> {
    if digest {
        let digest = parse_b256(message).map_err(anyhow::Error::msg)?;
        let signature = provider.sign_digest(digest).await?;
        let signer = recover_digest_signer(&signature, &digest)?;
        Ok(SignatureReport::new(&signature, signer))
    } else {
        let signature = provider.sign_personal_message(message.as_bytes()).await?;
        let signer = recover_message_signer(&signature, message.as_bytes())?;
        Ok(SignatureReport::new(&signature, signer))
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        config: config_path,
        dev,
        command,
        ..
    } = cli;

    match command {
        Command::Settings(cmd) => settings_command(cmd)?,
        Command::Feedback(cmd) => feedback_command(&load_config(config_path.as_ref())?, cmd)?,
        Command::Address => {
            let config = load_config(config_path.as_ref())?;
            let provider = build_provider(&config, dev)?;
            let address = provider.derive_address().await?;
            print_json(&json!({
                "domain": provider.identity().domain(),
                "address": address,
                "backend": provider.backend(),
                "hardware_backed": provider.backend().is_hardware_backed(),
            }))?;
        }
        Command::Attest { agent_id } => {
            let config = load_config(config_path.as_ref())?;
            let provider = build_provider(&config, dev)?;
            let quote = provider.attestation(agent_id).await?;
            print_json(&json!({
                "report_data": alloy::hex::encode_prefixed(quote.report_data.as_bytes()),
                "quote": quote.quote_hex(),
                "event_log": quote.event_log.as_ref().map(|log| String::from_utf8_lossy(log).into_owned()),
                "generated_at": quote.generated_at,
            }))?;
        }
        Command::Check { domain, address } => {
            let config = load_config(config_path.as_ref())?;
            let client = build_client(&config).await?;
            let (domain, address) = if domain.is_none() && address.is_none() {
                let provider = build_provider(&config, dev)?;
                (
                    Some(provider.identity().domain().to_string()),
                    Some(provider.derive_address().await?),
                )
            } else {
                (domain, address)
            };
            let status = client.check_registration(domain.as_deref(), address).await?;
            print_json(&json!({
                "registered": status.is_registered(),
                "by_domain": status.by_domain,
                "by_address": status.by_address,
            }))?;
        }
        Command::Register => {
            let config = load_config(config_path.as_ref())?;
            let session = AgentSession::new(build_provider(&config, dev)?, build_client(&config).await?);
            let outcome = session.register().await?;
            let status = match &outcome {
                RegistrationOutcome::AlreadyRegistered(_) => "already_registered",
                RegistrationOutcome::NewlyRegistered { .. } => "registered",
            };
            print_json(&json!({
                "status": status,
                "agent": outcome.agent(),
                "tx_hash": outcome.tx_hash(),
            }))?;
        }
        Command::RequestValidation {
            validator_id,
            data_hash,
        } => {
            let config = load_config(config_path.as_ref())?;
            let session = AgentSession::new(build_provider(&config, dev)?, build_client(&config).await?);
            let tx_hash = session.request_validation(validator_id, data_hash).await?;
            print_json(&json!({ "tx_hash": tx_hash }))?;
        }
        Command::Respond { data_hash, score } => {
            let config = load_config(config_path.as_ref())?;
            let session = AgentSession::new(build_provider(&config, dev)?, build_client(&config).await?);
            let tx_hash = session.respond(data_hash, score).await?;
            print_json(&json!({ "tx_hash": tx_hash }))?;
        }
        Command::AuthorizeFeedback { client_id } => {
            let config = load_config(config_path.as_ref())?;
            let session = AgentSession::new(build_provider(&config, dev)?, build_client(&config).await?);
            let tx_hash = session.authorize_feedback(client_id).await?;
            print_json(&json!({ "tx_hash": tx_hash }))?;
        }
        Command::Sign { message, digest } => {
            let config = load_config(config_path.as_ref())?;
            let provider = build_provider(&config, dev)?;
            let report = sign_command(provider.as_ref(), &message, digest).await?;
            print_json(&serde_json::to_value(report)?)?;
        }
        Command::Card => {
            let config = load_config(config_path.as_ref())?;
            let provider = build_provider(&config, dev)?;
            let address = provider.derive_address().await?;
            let registration = match config.registries {
                Some(addresses) => {
                    let client = build_client(&config).await?;
                    client
                        .resolve_by_address(address)
                        .await?
                        .map(|agent| RegistrationRef {
                            agent_id: agent.agent_id,
                            chain_id: config.chain.chain_id,
                            identity_registry: addresses.identity,
                        })
                }
                None => None,
            };
            let domain = provider.identity().domain().to_string();
            let input = AgentCardInput {
                name: config.agent.name.clone().unwrap_or_else(|| domain.clone()),
                domain,
                description: config.agent.description.clone(),
                image: config.agent.image_url.clone(),
                endpoints: config.agent.endpoints.clone(),
                address,
                backend: provider.backend(),
                registration,
            };
            println!("{}", agent_card_json(&input)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        if let Some(hint) = hint(&err) {
            eprintln!("hint: {hint}");
        }
        std::process::exit(1);
    }
}
