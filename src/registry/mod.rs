//! ERC-8004 registry client.
//!
//! One [`RegistryClient`] is built per process and shared (`Arc`) between
//! agents. It holds the node connection and contract addresses, never a
//! signing key: every write takes the caller's [`IdentityProvider`].
//!
//! Writes follow one pipeline (see [`tx`]): estimate gas, check the
//! balance, fetch the nonce, sign, send, then poll for a receipt with a
//! bounded timeout. Reverts are classified from the contract's custom
//! errors and never retried.
//!
//! Callers must serialize writes per identity; [`AgentSession`] does this.
//!
//! [`IdentityProvider`]: crate::identity::IdentityProvider

pub mod abi;
mod identity;
#[cfg(test)]
pub(crate) mod mock;
mod reputation;
pub mod rpc;
pub mod session;
pub mod tx;
mod validation;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use serde::Serialize;

pub use rpc::{CallRequest, ChainRpc, HttpChainRpc, TxReceipt};
pub use session::AgentSession;
pub use tx::SignedTransaction;

/// Registration fee required by the identity registry (0.005 ETH).
pub const REGISTRATION_FEE_WEI: u128 = 5_000_000_000_000_000;
/// Percent added to gas estimates.
pub const GAS_BUFFER_PERCENT: u64 = 20;
/// Gas limit used when estimation fails.
pub const DEFAULT_GAS_LIMIT: u64 = 500_000;
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Address lookups attempted when the registration event is missing.
pub const ID_RESOLUTION_ATTEMPTS: u32 = 5;
pub const ID_RESOLUTION_DELAY: Duration = Duration::from_secs(2);

/// Highest accepted validation score.
pub const MAX_VALIDATION_SCORE: u8 = 100;

/// Deployed registry contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryAddresses {
    pub identity: Address,
    pub reputation: Address,
    pub validation: Address,
}

/// Transaction tuning.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub registration_fee: U256,
    pub gas_buffer_percent: u64,
    pub default_gas_limit: u64,
    pub receipt_timeout: Duration,
    pub poll_interval: Duration,
    pub id_resolution_attempts: u32,
    pub id_resolution_delay: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            registration_fee: U256::from(REGISTRATION_FEE_WEI),
            gas_buffer_percent: GAS_BUFFER_PERCENT,
            default_gas_limit: DEFAULT_GAS_LIMIT,
            receipt_timeout: RECEIPT_TIMEOUT,
            poll_interval: RECEIPT_POLL_INTERVAL,
            id_resolution_attempts: ID_RESOLUTION_ATTEMPTS,
            id_resolution_delay: ID_RESOLUTION_DELAY,
        }
    }
}

/// An agent as recorded by the identity registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredAgent {
    pub agent_id: U256,
    pub domain: String,
    pub address: Address,
}

impl From<abi::IIdentityRegistry::AgentInfo> for RegisteredAgent {
    fn from(info: abi::IIdentityRegistry::AgentInfo) -> Self {
        Self {
            agent_id: info.agentId,
            domain: info.agentDomain,
            address: info.agentAddress,
        }
    }
}

/// Result of looking an agent up by domain and/or address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationStatus {
    pub by_domain: Option<RegisteredAgent>,
    pub by_address: Option<RegisteredAgent>,
}

impl RegistrationStatus {
    pub fn is_registered(&self) -> bool {
        self.by_domain.is_some() || self.by_address.is_some()
    }

    /// The agent found by either lookup, preferring the domain match.
    pub fn agent(&self) -> Option<&RegisteredAgent> {
        self.by_domain.as_ref().or(self.by_address.as_ref())
    }
}

/// Successful outcome of [`RegistryClient::register_agent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Already bound to exactly this domain and address. No transaction sent.
    AlreadyRegistered(RegisteredAgent),
    NewlyRegistered { agent: RegisteredAgent, tx_hash: B256 },
}

impl RegistrationOutcome {
    pub fn agent(&self) -> &RegisteredAgent {
        match self {
            Self::AlreadyRegistered(agent) | Self::NewlyRegistered { agent, .. } => agent,
        }
    }

    pub fn agent_id(&self) -> U256 {
        self.agent().agent_id
    }

    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::AlreadyRegistered(_) => None,
            Self::NewlyRegistered { tx_hash, .. } => Some(*tx_hash),
        }
    }
}

/// Shared client for the identity, reputation and validation registries.
pub struct RegistryClient {
    rpc: Arc<dyn ChainRpc>,
    chain_id: u64,
    addresses: RegistryAddresses,
    options: RegistryOptions,
}

impl RegistryClient {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        chain_id: u64,
        addresses: RegistryAddresses,
        options: RegistryOptions,
    ) -> Self {
        Self {
            rpc,
            chain_id,
            addresses,
            options,
        }
    }

    /// Connect over HTTP, checking the node serves the expected chain.
    pub async fn connect_http(
        rpc_url: url::Url,
        chain_id: u64,
        addresses: RegistryAddresses,
        options: RegistryOptions,
    ) -> Result<Self, crate::error::RegistryError> {
        let rpc = Arc::new(HttpChainRpc::new(rpc_url));
        let reported = rpc.chain_id().await?;
        if reported != chain_id {
            return Err(crate::error::RegistryError::Transaction(format!(
                "node reports chain id {reported}, configured {chain_id}"
            )));
        }
        Ok(Self::new(rpc, chain_id, addresses, options))
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn addresses(&self) -> &RegistryAddresses {
        &self.addresses
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Native balance of `address`, in wei.
    pub async fn balance(&self, address: Address) -> Result<U256, crate::error::RegistryError> {
        Ok(self.rpc.balance(address).await?)
    }
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("chain_id", &self.chain_id)
            .field("addresses", &self.addresses)
            .field("options", &self.options)
            .finish()
    }
}
