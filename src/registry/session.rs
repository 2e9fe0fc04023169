//! Per-agent single writer.

use std::sync::Arc;

use alloy::primitives::{B256, U256};
use tokio::sync::Mutex;
use tracing::debug;

use super::{RegisteredAgent, RegistrationOutcome, RegistryClient};
use crate::error::RegistryError;
use crate::identity::IdentityProvider;

/// One agent's view of the registries.
///
/// Writes through a session are serialized, so nonce fetch, signing and
/// submission never interleave for the same identity. Sessions for
/// different identities share the client and run concurrently.
pub struct AgentSession {
    provider: Arc<dyn IdentityProvider>,
    client: Arc<RegistryClient>,
    /// Held for the duration of every write. Also caches the agent id.
    writer: Mutex<Option<U256>>,
}

impl AgentSession {
    pub fn new(provider: Arc<dyn IdentityProvider>, client: Arc<RegistryClient>) -> Self {
        Self {
            provider,
            client,
            writer: Mutex::new(None),
        }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    pub fn client(&self) -> &Arc<RegistryClient> {
        &self.client
    }

    pub async fn register(&self) -> Result<RegistrationOutcome, RegistryError> {
        let mut agent_id = self.writer.lock().await;
        let outcome = self.client.register_agent(self.provider.as_ref()).await?;
        *agent_id = Some(outcome.agent_id());
        Ok(outcome)
    }

    /// This agent's on-chain record, or `None` when unregistered.
    pub async fn lookup(&self) -> Result<Option<RegisteredAgent>, RegistryError> {
        let address = self.provider.derive_address().await?;
        let agent = self.client.resolve_by_address(address).await?;
        if let Some(agent) = &agent {
            *self.writer.lock().await = Some(agent.agent_id);
        }
        Ok(agent)
    }

    /// Cached agent id, resolved from the registry on first use.
    pub async fn agent_id(&self) -> Result<Option<U256>, RegistryError> {
        if let Some(id) = *self.writer.lock().await {
            return Ok(Some(id));
        }
        Ok(self.lookup().await?.map(|agent| agent.agent_id))
    }

    async fn require_agent_id(&self) -> Result<U256, RegistryError> {
        self.agent_id()
            .await?
            .ok_or_else(|| RegistryError::NotRegistered {
                domain: self.provider.identity().domain().to_string(),
            })
    }

    /// Request validation of this agent's work by `validator_id`.
    pub async fn request_validation(
        &self,
        validator_id: U256,
        data_hash: B256,
    ) -> Result<B256, RegistryError> {
        let own_id = self.require_agent_id().await?;
        let _guard = self.writer.lock().await;
        debug!(domain = %self.provider.identity().domain(), "Session write: validationRequest");
        self.client
            .request_validation(self.provider.as_ref(), validator_id, own_id, data_hash)
            .await
    }

    /// Respond to a validation request as a validator.
    pub async fn respond(&self, data_hash: B256, score: u8) -> Result<B256, RegistryError> {
        let _guard = self.writer.lock().await;
        debug!(domain = %self.provider.identity().domain(), "Session write: validationResponse");
        self.client
            .submit_validation_response(self.provider.as_ref(), data_hash, score)
            .await
    }

    /// Allow `client_id` to leave feedback about this agent.
    pub async fn authorize_feedback(&self, client_id: U256) -> Result<B256, RegistryError> {
        let own_id = self.require_agent_id().await?;
        let _guard = self.writer.lock().await;
        debug!(domain = %self.provider.identity().domain(), "Session write: acceptFeedback");
        self.client
            .authorize_feedback(self.provider.as_ref(), client_id, own_id)
            .await
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("domain", &self.provider.identity().domain())
            .field("backend", &self.provider.backend())
            .finish()
    }
}
