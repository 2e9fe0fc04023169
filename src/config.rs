//! Resolved runtime configuration.
//!
//! Built once at startup from [`Settings`] overlaid with `GENESIS_*`
//! environment variables (priority: env > settings.json > default). Library
//! code only ever sees the resolved values.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use secrecy::SecretString;
use url::Url;

use crate::error::{Error, Result};
use crate::identity::AgentIdentity;
use crate::identity::agent_card::CardEndpoint;
use crate::registry::{RegistryAddresses, RegistryOptions};
use crate::settings::Settings;
use crate::tee::TeeMode;

pub const ENV_RPC_URL: &str = "GENESIS_RPC_URL";
pub const ENV_CHAIN_ID: &str = "GENESIS_CHAIN_ID";
pub const ENV_IDENTITY_REGISTRY: &str = "GENESIS_IDENTITY_REGISTRY";
pub const ENV_REPUTATION_REGISTRY: &str = "GENESIS_REPUTATION_REGISTRY";
pub const ENV_VALIDATION_REGISTRY: &str = "GENESIS_VALIDATION_REGISTRY";
pub const ENV_TEE_MODE: &str = "GENESIS_TEE_MODE";
pub const ENV_TEE_ENDPOINT: &str = "GENESIS_TEE_ENDPOINT";
pub const ENV_AGENT_DOMAIN: &str = "GENESIS_AGENT_DOMAIN";
pub const ENV_AGENT_SALT: &str = "GENESIS_AGENT_SALT";
pub const ENV_DEV_PRIVATE_KEY: &str = "GENESIS_DEV_PRIVATE_KEY";
pub const ENV_RECEIPT_TIMEOUT_SECS: &str = "GENESIS_RECEIPT_TIMEOUT_SECS";

#[derive(Debug, Clone)]
pub struct TeeConfig {
    pub mode: TeeMode,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: Url,
    pub chain_id: u64,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub domain: Option<String>,
    pub salt: Option<SecretString>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub endpoints: Vec<CardEndpoint>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub tee: TeeConfig,
    pub chain: ChainConfig,
    /// `None` until all three registry addresses are configured.
    pub registries: Option<RegistryAddresses>,
    pub registry_options: RegistryOptions,
    pub agent: AgentConfig,
    /// Only used when the TEE is off and a development provider is
    /// requested explicitly.
    pub dev_private_key: Option<SecretString>,
    pub feedback_path: PathBuf,
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| Error::Config(format!("{key}: invalid value '{value}': {e}")))
}

fn parse_address(key: &str, value: Option<String>) -> Result<Option<Address>> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| parse::<Address>(key, &v))
        .transpose()
}

impl Config {
    /// Resolve from settings and the process environment (after loading
    /// `.env` if present).
    pub fn resolve(settings: &Settings) -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::resolve_with(settings, |key| std::env::var(key).ok())
    }

    /// Load settings from a TOML file, then resolve against the environment.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let settings: Settings = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::resolve(&settings)
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve_with(settings: &Settings, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let tee = TeeConfig {
            mode: match env(ENV_TEE_MODE) {
                Some(v) => v.parse::<TeeMode>()?,
                None => settings.tee.mode,
            },
            endpoint: env(ENV_TEE_ENDPOINT).or_else(|| settings.tee.endpoint.clone()),
        };

        let rpc_url = env(ENV_RPC_URL).unwrap_or_else(|| settings.chain.rpc_url.clone());
        let chain = ChainConfig {
            rpc_url: parse::<Url>(ENV_RPC_URL, &rpc_url)?,
            chain_id: match env(ENV_CHAIN_ID) {
                Some(v) => parse(ENV_CHAIN_ID, &v)?,
                None => settings.chain.chain_id,
            },
        };

        let identity = parse_address(
            ENV_IDENTITY_REGISTRY,
            env(ENV_IDENTITY_REGISTRY).or_else(|| settings.registry.identity.clone()),
        )?;
        let reputation = parse_address(
            ENV_REPUTATION_REGISTRY,
            env(ENV_REPUTATION_REGISTRY).or_else(|| settings.registry.reputation.clone()),
        )?;
        let validation = parse_address(
            ENV_VALIDATION_REGISTRY,
            env(ENV_VALIDATION_REGISTRY).or_else(|| settings.registry.validation.clone()),
        )?;
        let registries = match (identity, reputation, validation) {
            (Some(identity), Some(reputation), Some(validation)) => Some(RegistryAddresses {
                identity,
                reputation,
                validation,
            }),
            _ => None,
        };

        let tx = &settings.tx;
        let receipt_timeout_secs = match env(ENV_RECEIPT_TIMEOUT_SECS) {
            Some(v) => parse(ENV_RECEIPT_TIMEOUT_SECS, &v)?,
            None => tx.receipt_timeout_secs,
        };
        let registration_fee = match &tx.registration_fee_wei {
            Some(v) => parse::<U256>("tx.registration_fee_wei", v)?,
            None => RegistryOptions::default().registration_fee,
        };
        let registry_options = RegistryOptions {
            registration_fee,
            gas_buffer_percent: tx.gas_buffer_percent,
            default_gas_limit: tx.default_gas_limit,
            receipt_timeout: Duration::from_secs(receipt_timeout_secs),
            poll_interval: Duration::from_millis(tx.poll_interval_ms),
            id_resolution_attempts: tx.id_resolution_attempts.max(1),
            id_resolution_delay: Duration::from_millis(tx.id_resolution_delay_ms),
        };

        let agent = AgentConfig {
            domain: env(ENV_AGENT_DOMAIN).or_else(|| settings.agent.domain.clone()),
            salt: env(ENV_AGENT_SALT)
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            name: settings.agent.name.clone(),
            description: settings.agent.description.clone(),
            image_url: settings.agent.image_url.clone(),
            endpoints: settings
                .agent
                .endpoints
                .iter()
                .map(|e| CardEndpoint {
                    name: e.name.clone(),
                    endpoint: e.endpoint.clone(),
                    version: e.version.clone(),
                })
                .collect(),
        };

        let feedback_path = settings
            .agent
            .feedback_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Settings::base_dir().join("feedback.jsonl"));

        Ok(Self {
            tee,
            chain,
            registries,
            registry_options,
            agent,
            dev_private_key: env(ENV_DEV_PRIVATE_KEY)
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            feedback_path,
        })
    }

    /// The configured agent identity. Both domain and salt are required.
    pub fn identity(&self) -> Result<AgentIdentity> {
        let domain = self.agent.domain.as_deref().ok_or_else(|| {
            Error::Config(format!("agent domain not set ({ENV_AGENT_DOMAIN} or agent.domain)"))
        })?;
        let salt = self
            .agent
            .salt
            .as_ref()
            .ok_or_else(|| Error::Config(format!("agent salt not set ({ENV_AGENT_SALT})")))?;
        Ok(AgentIdentity::new(
            domain,
            secrecy::ExposeSecret::expose_secret(salt),
        )?)
    }

    pub fn registry_addresses(&self) -> Result<RegistryAddresses> {
        self.registries.ok_or_else(|| {
            Error::Config(format!(
                "registry addresses not configured ({ENV_IDENTITY_REGISTRY}, \
                 {ENV_REPUTATION_REGISTRY}, {ENV_VALIDATION_REGISTRY})"
            ))
        })
    }
}
