//! Reputation registry writes.
//!
//! `acceptFeedback` only records that a server agent allows a client agent
//! to leave feedback. The rating itself is not stored on chain; see
//! [`crate::feedback`].

use alloy::primitives::{B256, U256};
use alloy::sol_types::SolCall;
use tracing::info;

use super::RegistryClient;
use super::abi::IReputationRegistry;
use super::tx::ContractWrite;
use crate::error::RegistryError;
use crate::identity::IdentityProvider;

impl RegistryClient {
    /// Authorize `client_id` to give feedback about `server_id`. Signed by
    /// the server agent.
    pub async fn authorize_feedback(
        &self,
        provider: &dyn IdentityProvider,
        client_id: U256,
        server_id: U256,
    ) -> Result<B256, RegistryError> {
        let signer = provider.signer().await?;
        let data = IReputationRegistry::acceptFeedbackCall {
            agentClientId: client_id,
            agentServerId: server_id,
        }
        .abi_encode();

        let receipt = self
            .execute(
                signer,
                ContractWrite {
                    label: "acceptFeedback",
                    to: self.addresses.reputation,
                    data: data.into(),
                    value: U256::ZERO,
                },
            )
            .await?;
        info!(client_id = %client_id, server_id = %server_id, "Feedback authorized");
        Ok(receipt.transaction_hash)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy::primitives::Address;

    use super::*;
    use crate::identity::{AgentIdentity, LocalIdentityProvider};
    use crate::registry::mock::MockChain;

    #[tokio::test]
    async fn authorization_is_recorded_on_chain() {
        let chain = Arc::new(MockChain::new());
        let client_id = chain.seed_agent("client.test", Address::repeat_byte(1));
        let server = LocalIdentityProvider::hashed(AgentIdentity::new("server.test", "s").unwrap()).unwrap();
        let server_id = chain.seed_agent("server.test", server.derive_address().await.unwrap());

        chain
            .client()
            .authorize_feedback(&server, client_id, server_id)
            .await
            .unwrap();
        assert_eq!(chain.feedback_authorizations(), vec![(client_id, server_id)]);

        let sent = chain.sent();
        assert_eq!(sent[0].to, chain.addresses().reputation);
        assert_eq!(sent[0].value, U256::ZERO);
    }
}
