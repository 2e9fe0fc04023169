//! Error types for identity derivation, attestation and registry operations.
//!
//! Every failure kind a caller may need to act on has its own variant so it
//! can be matched without inspecting message text.

use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes, U256};

use crate::registry::RegisteredAgent;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Tee(#[from] TeeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Feedback(#[from] FeedbackError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures talking to the key derivation / attestation service.
#[derive(Debug, thiserror::Error)]
pub enum TeeError {
    #[error("TEE service unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("TEE service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("Invalid TEE request: {0}")]
    InvalidRequest(String),

    #[error("Malformed TEE response: {0}")]
    MalformedResponse(String),

    #[error("TEE backend disabled (mode is off)")]
    Disabled,

    #[error("No TEE endpoint configured for mode '{0}'")]
    NoEndpoint(String),

    #[error("Invalid TEE_MODE '{0}', expected one of: local, docker, production, off")]
    InvalidMode(String),
}

/// Failures producing or using an agent's signing identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The key derivation backend was unreachable or returned garbage.
    #[error("Identity derivation failed: {0}")]
    Derivation(#[source] TeeError),

    /// Derived or supplied material is not a valid secp256k1 scalar.
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Invalid agent identity: {0}")]
    InvalidIdentity(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    /// No attestation could be produced. The identity is unverifiable for
    /// this call, not invalid.
    #[error("Attestation unavailable: {0}")]
    AttestationUnavailable(String),
}

/// Why a registry transaction reverted, decoded from the contract ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertReason {
    InsufficientFee,
    OutOfGas,
    DomainTaken,
    AddressTaken,
    NotFound,
    Unauthorized,
    InvalidInput,
    Unknown,
}

impl std::fmt::Display for RevertReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InsufficientFee => "insufficient registration fee",
            Self::OutOfGas => "out of gas",
            Self::DomainTaken => "domain already registered",
            Self::AddressTaken => "address already registered",
            Self::NotFound => "agent not found",
            Self::Unauthorized => "unauthorized",
            Self::InvalidInput => "invalid input",
            Self::Unknown => "unknown revert",
        };
        f.write_str(s)
    }
}

/// A JSON-RPC level failure, with any revert payload the node attached.
#[derive(Debug, Clone, thiserror::Error)]
#[error("RPC error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
pub struct RpcFailure {
    pub code: Option<i64>,
    pub message: String,
    pub revert_data: Option<Bytes>,
}

impl RpcFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            revert_data: None,
        }
    }

    pub fn reverted(message: impl Into<String>, data: Bytes) -> Self {
        Self {
            code: Some(3),
            message: message.into(),
            revert_data: Some(data),
        }
    }

    /// Whether the node reported an execution revert rather than a
    /// transport or node-side problem.
    pub fn is_execution_revert(&self) -> bool {
        self.revert_data.is_some() || self.code == Some(3)
    }
}

/// Details of a domain/address binding conflict.
#[derive(Debug, Clone)]
pub struct RegistrationConflict {
    pub requested_domain: String,
    pub requested_address: Address,
    /// Existing agent bound to the requested domain, if any.
    pub by_domain: Option<RegisteredAgent>,
    /// Existing agent bound to the requested address, if any.
    pub by_address: Option<RegisteredAgent>,
}

impl std::fmt::Display for RegistrationConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requested {} -> {:#x}",
            self.requested_domain, self.requested_address
        )?;
        if let Some(agent) = &self.by_domain {
            write!(
                f,
                "; domain already bound to {:#x} (agent {})",
                agent.address, agent.agent_id
            )?;
        }
        if let Some(agent) = &self.by_address {
            write!(
                f,
                "; address already bound to {} (agent {})",
                agent.domain, agent.agent_id
            )?;
        }
        Ok(())
    }
}

/// Registry operation failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Registration conflict: {0}")]
    Conflict(Box<RegistrationConflict>),

    #[error(
        "Insufficient funds in {address:#x}: need {required} wei, have {available} wei (short {shortfall} wei)"
    )]
    InsufficientFunds {
        address: Address,
        required: U256,
        available: U256,
        shortfall: U256,
    },

    #[error("Transaction reverted ({reason}){}: {detail}", .tx_hash.map(|h| format!(" in {h}")).unwrap_or_default())]
    Reverted {
        tx_hash: Option<B256>,
        reason: RevertReason,
        detail: String,
    },

    /// Submitted but unconfirmed. The transaction may still land; re-query
    /// before resubmitting.
    #[error("No receipt for {tx_hash} after {waited:?}; outcome unknown")]
    ConfirmationTimeout { tx_hash: B256, waited: Duration },

    /// The registration transaction succeeded but the agent id could not be
    /// determined. On-chain state is registered.
    #[error("Registered in {tx_hash} but agent id for {address:#x} unresolved after {attempts} lookups")]
    AgentIdUnresolved {
        tx_hash: B256,
        address: Address,
        attempts: u32,
    },

    /// The operation needs an on-chain agent id and the identity has none.
    #[error("{domain} is not registered")]
    NotRegistered { domain: String },

    #[error("Validation score {0} out of range (0-100)")]
    InvalidScore(u8),

    #[error(transparent)]
    Rpc(#[from] RpcFailure),

    #[error("Transaction construction failed: {0}")]
    Transaction(String),

    #[error("Unexpected contract response: {0}")]
    Decode(String),
}

impl RegistryError {
    /// Whether resubmitting the same request could double-spend.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, Self::ConfirmationTimeout { .. })
    }
}

/// Off-chain feedback ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("Rating {0} out of range (0-100)")]
    InvalidRating(u8),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_the_only_unknown_outcome() {
        let timeout = RegistryError::ConfirmationTimeout {
            tx_hash: B256::ZERO,
            waited: Duration::from_secs(1),
        };
        assert!(timeout.outcome_unknown());

        let reverted = RegistryError::Reverted {
            tx_hash: Some(B256::ZERO),
            reason: RevertReason::Unknown,
            detail: String::new(),
        };
        assert!(!reverted.outcome_unknown());
    }

    #[test]
    fn rpc_failure_revert_detection() {
        assert!(!RpcFailure::new("connection refused").is_execution_revert());
        assert!(RpcFailure::reverted("execution reverted", Bytes::new()).is_execution_revert());
    }

    #[test]
    fn insufficient_funds_message_names_address() {
        let err = RegistryError::InsufficientFunds {
            address: Address::repeat_byte(0xaa),
            required: U256::from(10),
            available: U256::from(4),
            shortfall: U256::from(6),
        };
        let msg = err.to_string();
        assert!(msg.contains("0xaaaa"));
        assert!(msg.contains("short 6 wei"));
    }
}
