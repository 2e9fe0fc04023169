//! Agent identity management (ERC-8004).
//!
//! An agent is named by a human-chosen `(domain, salt)` pair. The pair is
//! turned into a secp256k1 signing key by a key derivation backend, and the
//! resulting Ethereum address is the agent's on-chain handle.
//!
//! # Architecture
//!
//! - [`AgentIdentity`]: immutable `(domain, salt)` value, cheap to clone and
//!   safe to share across tasks. Holds no key material.
//! - [`IdentityProvider`]: turns an identity into a signer and attestation
//!   quotes. [`provider::TeeIdentityProvider`] derives inside an enclave;
//!   [`provider::LocalIdentityProvider`] is the development backend and must
//!   be constructed explicitly.
//! - [`attestation`]: the fixed 64-byte binding of `{domain, address,
//!   agentId?}` placed in quotes.
//! - [`agent_card`]: the ERC-8004 registration file served to peers.
//!
//! Key material lives only inside a provider instance, is derived lazily on
//! first use and cached for the life of the process.

pub mod agent_card;
pub mod attestation;
pub mod provider;
pub mod wallet;

use std::sync::{Arc, LazyLock};

use alloy::primitives::{Address, B256, Signature, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::error::IdentityError;
use crate::tee::{AttestationQuote, ReportData};

pub use attestation::IdentityBinding;
pub use provider::{LocalIdentityProvider, TeeIdentityProvider};

/// Namespace prefix of every derivation path. Changing it changes every
/// derived address, so it is fixed for the deployment.
pub const DERIVATION_NAMESPACE: &str = "erc8004-agent";

/// Maximum DNS name length.
const MAX_DOMAIN_LEN: usize = 253;

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*(:[0-9]{1,5})?$")
        .expect("domain regex is valid")
});

/// A logical agent: a domain plus the secret salt its key is derived from.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    domain: String,
    salt: Arc<SecretString>,
}

impl AgentIdentity {
    /// Validate and build an identity.
    pub fn new(domain: impl Into<String>, salt: impl Into<String>) -> Result<Self, IdentityError> {
        let domain = domain.into();
        validate_domain(&domain)?;

        let salt = salt.into();
        if salt.is_empty() {
            return Err(IdentityError::InvalidIdentity(
                "salt must not be empty".to_string(),
            ));
        }

        Ok(Self {
            domain,
            salt: Arc::new(SecretString::from(salt)),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Path handed to the key derivation service.
    pub fn derivation_path(&self) -> String {
        format!("{}/{}", DERIVATION_NAMESPACE, self.domain)
    }

    /// Purpose handed to the key derivation service (the salt).
    pub(crate) fn derivation_purpose(&self) -> &str {
        self.salt.expose_secret()
    }
}

/// Check a domain is usable as a registry handle.
pub fn validate_domain(domain: &str) -> Result<(), IdentityError> {
    if domain.is_empty() {
        return Err(IdentityError::InvalidIdentity(
            "domain must not be empty".to_string(),
        ));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(IdentityError::InvalidIdentity(format!(
            "domain is {} bytes, max {}",
            domain.len(),
            MAX_DOMAIN_LEN
        )));
    }
    if !DOMAIN_RE.is_match(domain) {
        return Err(IdentityError::InvalidIdentity(format!(
            "'{domain}' is not a valid domain"
        )));
    }
    Ok(())
}

/// Where a provider's key comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyBackend {
    /// Derived inside a TEE.
    Tee,
    /// sha256 of the derivation inputs. Anyone who knows them has the key.
    LocalHash,
    /// Private key supplied by the operator.
    Supplied,
}

impl KeyBackend {
    pub fn is_hardware_backed(&self) -> bool {
        matches!(self, Self::Tee)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tee => "tee",
            Self::LocalHash => "local_hash",
            Self::Supplied => "supplied",
        }
    }
}

/// Produces the signing identity and attestations for one agent.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn identity(&self) -> &AgentIdentity;

    fn backend(&self) -> KeyBackend;

    /// The cached signer, deriving it on first use.
    async fn signer(&self) -> Result<&PrivateKeySigner, IdentityError>;

    /// Hardware quote over arbitrary report data.
    async fn quote(&self, report_data: &ReportData) -> Result<AttestationQuote, IdentityError>;

    async fn derive_address(&self) -> Result<Address, IdentityError> {
        Ok(self.signer().await?.address())
    }

    /// ECDSA over a caller-hashed 32-byte digest, no prefix.
    async fn sign_digest(&self, digest: B256) -> Result<Signature, IdentityError> {
        wallet::sign_digest(self.signer().await?, &digest)
    }

    /// EIP-191 `personal_sign` over `message`.
    async fn sign_personal_message(&self, message: &[u8]) -> Result<Signature, IdentityError> {
        wallet::sign_personal_message(self.signer().await?, message)
    }

    /// Quote binding this agent's domain, address and (when known) agent id.
    async fn attestation(&self, agent_id: Option<U256>) -> Result<AttestationQuote, IdentityError> {
        let address = self.derive_address().await?;
        let binding = IdentityBinding::new(self.identity().domain(), address, agent_id);
        self.quote(&binding.report_data()).await
    }
}
