//! TEE-derived agent identities and ERC-8004 registry registration.
//!
//! Layers, bottom up:
//!
//! - [`tee`]: client for the enclave key derivation and quote service.
//! - [`identity`]: `(domain, salt)` identities, signing providers and the
//!   64-byte attestation binding.
//! - [`registry`]: identity, validation and reputation registry client with
//!   idempotent registration.
//!
//! [`feedback`] keeps the off-chain feedback that the reputation registry
//! only authorizes. [`settings`] and [`config`] resolve deployment
//! configuration for the `genesis` binary.

pub mod config;
pub mod error;
pub mod feedback;
pub mod identity;
pub mod registry;
pub mod settings;
pub mod tee;

pub use config::Config;
pub use error::{Error, Result};
pub use identity::{AgentIdentity, IdentityProvider, KeyBackend, LocalIdentityProvider, TeeIdentityProvider};
pub use registry::{
    AgentSession, RegisteredAgent, RegistrationOutcome, RegistrationStatus, RegistryAddresses,
    RegistryClient, RegistryOptions,
};
pub use tee::{DstackClient, KeyDerivationService, TeeMode};
