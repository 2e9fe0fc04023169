//! Identity registry: lookups and idempotent registration.

use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::sol_types::{SolCall, SolEvent};
use tracing::{debug, info, warn};

use super::abi::{IIdentityRegistry, classify_revert};
use super::tx::ContractWrite;
use super::{CallRequest, RegisteredAgent, RegistrationOutcome, RegistrationStatus, RegistryClient, TxReceipt};
use crate::error::{RegistrationConflict, RegistryError, RevertReason};
use crate::identity::IdentityProvider;

/// What the pre-flight lookups say about a requested binding.
enum Preflight {
    Unregistered,
    Registered(RegisteredAgent),
    Conflict(Box<RegistrationConflict>),
}

fn preflight(domain: &str, address: Address, status: RegistrationStatus) -> Preflight {
    let exact = |agent: &RegisteredAgent| agent.domain == domain && agent.address == address;

    match (&status.by_domain, &status.by_address) {
        (None, None) => Preflight::Unregistered,
        (Some(a), Some(b)) if a.agent_id == b.agent_id && exact(a) => Preflight::Registered(a.clone()),
        // One lookup lagging behind the other; the binding itself matches.
        (Some(a), None) | (None, Some(a)) if exact(a) => Preflight::Registered(a.clone()),
        _ => Preflight::Conflict(Box::new(RegistrationConflict {
            requested_domain: domain.to_string(),
            requested_address: address,
            by_domain: status.by_domain,
            by_address: status.by_address,
        })),
    }
}

impl RegistryClient {
    /// Read-only call that treats an `AgentNotFound` revert or a zero id
    /// as "not registered".
    async fn lookup(&self, data: Vec<u8>, decode: DecodeAgent) -> Result<Option<RegisteredAgent>, RegistryError> {
        let call = CallRequest::new(self.addresses.identity, data);
        let output = match self.rpc.call(&call).await {
            Ok(output) => output,
            Err(failure) => {
                let not_found = failure.is_execution_revert()
                    && failure
                        .revert_data
                        .as_ref()
                        .is_some_and(|d| classify_revert(d) == RevertReason::NotFound);
                if not_found {
                    return Ok(None);
                }
                return Err(failure.into());
            }
        };
        decode(&output)
    }

    pub async fn resolve_by_domain(&self, domain: &str) -> Result<Option<RegisteredAgent>, RegistryError> {
        let data = IIdentityRegistry::resolveByDomainCall {
            agentDomain: domain.to_string(),
        }
        .abi_encode();
        self.lookup(data, decode_agent_info).await
    }

    pub async fn resolve_by_address(&self, address: Address) -> Result<Option<RegisteredAgent>, RegistryError> {
        let data = IIdentityRegistry::resolveByAddressCall {
            agentAddress: address,
        }
        .abi_encode();
        self.lookup(data, decode_agent_info).await
    }

    pub async fn get_agent(&self, agent_id: U256) -> Result<Option<RegisteredAgent>, RegistryError> {
        if agent_id.is_zero() {
            return Ok(None);
        }
        let data = IIdentityRegistry::getAgentCall { agentId: agent_id }.abi_encode();
        self.lookup(data, decode_agent_record).await
    }

    /// Look the agent up by domain and/or address. No side effects.
    pub async fn check_registration(
        &self,
        domain: Option<&str>,
        address: Option<Address>,
    ) -> Result<RegistrationStatus, RegistryError> {
        let by_domain = async {
            match domain {
                Some(d) => self.resolve_by_domain(d).await,
                None => Ok(None),
            }
        };
        let by_address = async {
            match address {
                Some(a) => self.resolve_by_address(a).await,
                None => Ok(None),
            }
        };
        let (by_domain, by_address) = futures::try_join!(by_domain, by_address)?;
        Ok(RegistrationStatus {
            by_domain,
            by_address,
        })
    }

    /// Register the provider's `(domain, address)`.
    ///
    /// Returns the existing agent without sending anything when the binding
    /// is already registered, and fails with [`RegistryError::Conflict`]
    /// before touching the chain when either half is bound elsewhere.
    pub async fn register_agent(
        &self,
        provider: &dyn IdentityProvider,
    ) -> Result<RegistrationOutcome, RegistryError> {
        let domain = provider.identity().domain().to_string();
        let signer = provider.signer().await?;
        let address = signer.address();

        let status = self.check_registration(Some(&domain), Some(address)).await?;
        match preflight(&domain, address, status) {
            Preflight::Registered(agent) => {
                info!(domain = %domain, agent_id = %agent.agent_id, "Agent already registered");
                return Ok(RegistrationOutcome::AlreadyRegistered(agent));
            }
            Preflight::Conflict(conflict) => {
                warn!(%conflict, "Registration conflict, not submitting");
                return Err(RegistryError::Conflict(conflict));
            }
            Preflight::Unregistered => {}
        }

        let data = IIdentityRegistry::newAgentCall {
            agentDomain: domain.clone(),
            agentAddress: address,
        }
        .abi_encode();

        info!(domain = %domain, address = %address, fee = %self.options.registration_fee, "Registering agent");
        let receipt = self
            .execute(
                signer,
                ContractWrite {
                    label: "newAgent",
                    to: self.addresses.identity,
                    data: data.into(),
                    value: self.options.registration_fee,
                },
            )
            .await?;
        let tx_hash = receipt.transaction_hash;

        let agent_id = match self.agent_id_from_logs(&receipt, address) {
            Some(id) => id,
            None => self.agent_id_by_address(tx_hash, address).await?,
        };

        info!(domain = %domain, agent_id = %agent_id, tx_hash = %tx_hash, "Agent registered");
        Ok(RegistrationOutcome::NewlyRegistered {
            agent: RegisteredAgent {
                agent_id,
                domain,
                address,
            },
            tx_hash,
        })
    }

    fn agent_id_from_logs(&self, receipt: &TxReceipt, address: Address) -> Option<U256> {
        receipt
            .logs
            .iter()
            .filter(|log| log.address == self.addresses.identity)
            .filter(|log| log.data.topics().first() == Some(&IIdentityRegistry::AgentRegistered::SIGNATURE_HASH))
            .filter_map(|log| match IIdentityRegistry::AgentRegistered::decode_log_data(&log.data) {
                Ok(event) => Some(event),
                Err(e) => {
                    debug!(error = %e, "Undecodable AgentRegistered log");
                    None
                }
            })
            .find(|event| event.agentAddress == address && !event.agentId.is_zero())
            .map(|event| event.agentId)
    }

    /// Fallback when the receipt carries no usable event: poll the registry
    /// by address until the new state is visible.
    async fn agent_id_by_address(&self, tx_hash: B256, address: Address) -> Result<U256, RegistryError> {
        let attempts = self.options.id_resolution_attempts;
        for attempt in 1..=attempts {
            match self.resolve_by_address(address).await {
                Ok(Some(agent)) => return Ok(agent.agent_id),
                Ok(None) => {
                    warn!(attempt, attempts, address = %address, "Agent not visible yet");
                }
                Err(e) => {
                    warn!(attempt, attempts, address = %address, error = %e, "Agent lookup failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.options.id_resolution_delay).await;
            }
        }
        Err(RegistryError::AgentIdUnresolved {
            tx_hash,
            address,
            attempts,
        })
    }
}

type DecodeAgent = fn(&Bytes) -> Result<Option<RegisteredAgent>, RegistryError>;

// `resolveByDomain` and `resolveByAddress` share the `AgentInfo` return.
fn decode_agent_info(output: &Bytes) -> Result<Option<RegisteredAgent>, RegistryError> {
    let info = IIdentityRegistry::resolveByAddressCall::abi_decode_returns(output)
        .map_err(|e| RegistryError::Decode(e.to_string()))?;
    if info.agentId.is_zero() {
        return Ok(None);
    }
    Ok(Some(info.into()))
}

// `getAgent` returns `(agentId, address, domain, timestamp)`.
fn decode_agent_record(output: &Bytes) -> Result<Option<RegisteredAgent>, RegistryError> {
    let record = IIdentityRegistry::getAgentCall::abi_decode_returns(output)
        .map_err(|e| RegistryError::Decode(e.to_string()))?;
    if record.id.is_zero() {
        return Ok(None);
    }
    debug!(agent_id = %record.id, registered_at = %record.registeredAt, "Agent record");
    Ok(Some(RegisteredAgent {
        agent_id: record.id,
        domain: record.agentDomain,
        address: record.agentAddress,
    }))
}
