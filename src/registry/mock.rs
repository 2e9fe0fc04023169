//! In-memory chain for registry tests.
//!
//! Decodes real signed transactions, executes the registry calls it knows
//! about and can be scripted to misbehave the ways real nodes do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, B256, Bytes, Log, U256};
use alloy::sol_types::{SolCall, SolError, SolEvent};
use async_trait::async_trait;

use super::abi::{IIdentityRegistry, IReputationRegistry, IValidationRegistry};
use super::tx::SignedTransaction;
use super::{CallRequest, ChainRpc, RegistryAddresses, RegistryClient, RegistryOptions, TxReceipt};
use crate::error::RpcFailure;

pub(crate) const CHAIN_ID: u64 = 31337;

/// Failure modes a test can switch on.
#[derive(Debug, Default)]
pub(crate) struct Script {
    pub fail_estimate: bool,
    pub fail_calls: bool,
    /// `eth_call` fails at the transport once a transaction has been sent.
    pub fail_calls_after_send: bool,
    pub suppress_events: bool,
    /// Address lookups that miss a freshly registered agent.
    pub address_lookup_lag: u32,
    pub never_confirm: bool,
    pub force_fee_revert: bool,
    pub out_of_gas: bool,
    /// Node rejects sends as unaffordable regardless of balance.
    pub reject_send_funds: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct SentTx {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub nonce: u64,
    pub gas_limit: u64,
    pub input: Bytes,
}

#[derive(Debug, Clone)]
struct Agent {
    id: U256,
    domain: String,
    address: Address,
    /// Remaining address lookups that will not see this agent.
    hidden_for: u32,
}

#[derive(Debug, Default)]
struct State {
    script: Script,
    agents: Vec<Agent>,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    sent: Vec<SentTx>,
    receipts: HashMap<B256, TxReceipt>,
    lagged_lookups: u32,
    validation_requests: Vec<(U256, U256, B256)>,
    validation_responses: Vec<(B256, u8)>,
    feedback_authorizations: Vec<(U256, U256)>,
}

pub(crate) struct MockChain {
    addresses: RegistryAddresses,
    state: Mutex<State>,
}

fn revert<E: SolError>(err: E) -> RpcFailure {
    RpcFailure::reverted("execution reverted", err.abi_encode().into())
}

impl MockChain {
    pub const GAS_ESTIMATE: u64 = 150_000;
    pub const GAS_PRICE: u128 = 1_000_000_000;
    const DEFAULT_BALANCE: u128 = 10_000_000_000_000_000_000;

    pub fn new() -> Self {
        Self {
            addresses: RegistryAddresses {
                identity: Address::repeat_byte(0x10),
                reputation: Address::repeat_byte(0x20),
                validation: Address::repeat_byte(0x30),
            },
            state: Mutex::new(State::default()),
        }
    }

    /// Client with short timeouts and retry delays.
    pub fn client(self: &Arc<Self>) -> RegistryClient {
        RegistryClient::new(
            self.clone(),
            CHAIN_ID,
            self.addresses,
            RegistryOptions {
                receipt_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(5),
                id_resolution_attempts: 3,
                id_resolution_delay: Duration::from_millis(1),
                ..RegistryOptions::default()
            },
        )
    }

    pub fn addresses(&self) -> RegistryAddresses {
        self.addresses
    }

    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.state.lock().unwrap().script);
    }

    pub fn seed_agent(&self, domain: &str, address: Address) -> U256 {
        let mut state = self.state.lock().unwrap();
        let id = U256::from(state.agents.len() + 1);
        state.agents.push(Agent {
            id,
            domain: domain.to_string(),
            address,
            hidden_for: 0,
        });
        id
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().unwrap().balances.insert(address, balance);
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }

    pub fn lagged_lookups(&self) -> u32 {
        self.state.lock().unwrap().lagged_lookups
    }

    pub fn validation_requests(&self) -> Vec<(U256, U256, B256)> {
        self.state.lock().unwrap().validation_requests.clone()
    }

    pub fn validation_responses(&self) -> Vec<(B256, u8)> {
        self.state.lock().unwrap().validation_responses.clone()
    }

    pub fn feedback_authorizations(&self) -> Vec<(U256, U256)> {
        self.state.lock().unwrap().feedback_authorizations.clone()
    }
}

impl State {
    fn balance(&self, address: Address) -> U256 {
        self.balances
            .get(&address)
            .copied()
            .unwrap_or(U256::from(MockChain::DEFAULT_BALANCE))
    }

    fn agent_info(agent: Option<&Agent>) -> Result<Bytes, RpcFailure> {
        let agent = agent.ok_or_else(|| revert(IIdentityRegistry::AgentNotFound {}))?;
        let info = IIdentityRegistry::AgentInfo {
            agentId: agent.id,
            agentDomain: agent.domain.clone(),
            agentAddress: agent.address,
        };
        Ok(IIdentityRegistry::resolveByAddressCall::abi_encode_returns(&info).into())
    }

    fn agent_record(agent: Option<&Agent>) -> Result<Bytes, RpcFailure> {
        let agent = agent.ok_or_else(|| revert(IIdentityRegistry::AgentNotFound {}))?;
        let record = IIdentityRegistry::getAgentReturn {
            id: agent.id,
            agentAddress: agent.address,
            agentDomain: agent.domain.clone(),
            registeredAt: U256::from(1_700_000_000u64) + agent.id,
        };
        Ok(IIdentityRegistry::getAgentCall::abi_encode_returns(&record).into())
    }

    /// Check a `newAgent` call without applying it.
    fn check_new_agent(&self, value: U256, domain: &str, address: Address) -> Result<(), RpcFailure> {
        if self.script.force_fee_revert || value < U256::from(super::REGISTRATION_FEE_WEI) {
            return Err(revert(IIdentityRegistry::InsufficientFee {}));
        }
        if self.agents.iter().any(|a| a.domain == domain) {
            return Err(revert(IIdentityRegistry::DomainAlreadyRegistered {}));
        }
        if self.agents.iter().any(|a| a.address == address) {
            return Err(revert(IIdentityRegistry::AddressAlreadyRegistered {}));
        }
        Ok(())
    }

    fn agent_exists(&self, id: U256) -> bool {
        self.agents.iter().any(|a| a.id == id)
    }

    /// Execute a call; `Ok` carries return data and emitted logs.
    fn execute(
        &mut self,
        registries: RegistryAddresses,
        to: Address,
        value: U256,
        input: &[u8],
        commit: bool,
    ) -> Result<(Bytes, Vec<Log>), RpcFailure> {
        if to == registries.identity {
            if let Ok(call) = IIdentityRegistry::newAgentCall::abi_decode(input) {
                self.check_new_agent(value, &call.agentDomain, call.agentAddress)?;
                let id = U256::from(self.agents.len() + 1);
                let output = IIdentityRegistry::newAgentCall::abi_encode_returns(&id).into();
                if !commit {
                    return Ok((output, vec![]));
                }
                self.agents.push(Agent {
                    id,
                    domain: call.agentDomain.clone(),
                    address: call.agentAddress,
                    hidden_for: self.script.address_lookup_lag,
                });
                let mut logs = Vec::new();
                if !self.script.suppress_events {
                    let event = IIdentityRegistry::AgentRegistered {
                        agentId: id,
                        agentDomain: call.agentDomain,
                        agentAddress: call.agentAddress,
                    };
                    logs.push(Log {
                        address: registries.identity,
                        data: event.encode_log_data(),
                    });
                }
                return Ok((output, logs));
            }
            if let Ok(call) = IIdentityRegistry::resolveByDomainCall::abi_decode(input) {
                let agent = self.agents.iter().find(|a| a.domain == call.agentDomain);
                return Self::agent_info(agent).map(|out| (out, vec![]));
            }
            if let Ok(call) = IIdentityRegistry::resolveByAddressCall::abi_decode(input) {
                let lagged = match self.agents.iter_mut().find(|a| a.address == call.agentAddress) {
                    Some(agent) if agent.hidden_for > 0 => {
                        agent.hidden_for -= 1;
                        true
                    }
                    _ => false,
                };
                if lagged {
                    self.lagged_lookups += 1;
                    return Self::agent_info(None).map(|out| (out, vec![]));
                }
                let agent = self.agents.iter().find(|a| a.address == call.agentAddress);
                return Self::agent_info(agent).map(|out| (out, vec![]));
            }
            if let Ok(call) = IIdentityRegistry::getAgentCall::abi_decode(input) {
                let agent = self.agents.iter().find(|a| a.id == call.agentId);
                return Self::agent_record(agent).map(|out| (out, vec![]));
            }
        }

        if to == registries.validation {
            if let Ok(call) = IValidationRegistry::validationRequestCall::abi_decode(input) {
                if !self.agent_exists(call.agentValidatorId) || !self.agent_exists(call.agentServerId) {
                    return Err(revert(IValidationRegistry::AgentNotFound {}));
                }
                if commit {
                    self.validation_requests
                        .push((call.agentValidatorId, call.agentServerId, call.dataHash));
                }
                return Ok((Bytes::new(), vec![]));
            }
            if let Ok(call) = IValidationRegistry::validationResponseCall::abi_decode(input) {
                if call.response > 100 {
                    return Err(revert(IValidationRegistry::InvalidResponse {}));
                }
                if commit {
                    self.validation_responses.push((call.dataHash, call.response));
                }
                return Ok((Bytes::new(), vec![]));
            }
        }

        if to == registries.reputation
            && let Ok(call) = IReputationRegistry::acceptFeedbackCall::abi_decode(input)
        {
            if !self.agent_exists(call.agentClientId) || !self.agent_exists(call.agentServerId) {
                return Err(revert(IReputationRegistry::AgentNotFound {}));
            }
            if commit {
                self.feedback_authorizations
                    .push((call.agentClientId, call.agentServerId));
            }
            return Ok((Bytes::new(), vec![]));
        }

        Err(RpcFailure::reverted("execution reverted", Bytes::new()))
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn chain_id(&self) -> Result<u64, RpcFailure> {
        Ok(CHAIN_ID)
    }

    async fn gas_price(&self) -> Result<u128, RpcFailure> {
        Ok(Self::GAS_PRICE)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, RpcFailure> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .nonces
            .get(&address)
            .copied()
            .unwrap_or(0))
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcFailure> {
        Ok(self.state.lock().unwrap().balance(address))
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> Result<u64, RpcFailure> {
        if self.state.lock().unwrap().script.fail_estimate {
            return Err(RpcFailure::new("eth_estimateGas not supported"));
        }
        Ok(Self::GAS_ESTIMATE)
    }

    async fn call(&self, call: &CallRequest) -> Result<Bytes, RpcFailure> {
        let mut state = self.state.lock().unwrap();
        if state.script.fail_calls || (state.script.fail_calls_after_send && !state.sent.is_empty()) {
            return Err(RpcFailure::new("connection refused"));
        }
        state
            .execute(self.addresses, call.to, call.value, &call.data, false)
            .map(|(out, _)| out)
    }

    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> Result<B256, RpcFailure> {
        let mut raw = tx.raw();
        let envelope = TxEnvelope::decode_2718(&mut raw)
            .map_err(|e| RpcFailure::new(format!("invalid transaction: {e}")))?;
        let TxEnvelope::Legacy(signed) = envelope else {
            return Err(RpcFailure::new("mock chain only accepts legacy transactions"));
        };
        let from = signed
            .signature()
            .recover_address_from_prehash(&signed.signature_hash())
            .map_err(|e| RpcFailure::new(format!("invalid signature: {e}")))?;
        let body = signed.tx();
        let to = body
            .to
            .to()
            .copied()
            .ok_or_else(|| RpcFailure::new("contract creation not supported"))?;

        let mut state = self.state.lock().unwrap();
        if body.chain_id != Some(CHAIN_ID) {
            return Err(RpcFailure::new("invalid chain id"));
        }
        let expected = state.nonces.get(&from).copied().unwrap_or(0);
        if body.nonce != expected {
            return Err(RpcFailure::new(format!(
                "nonce too low: next nonce {expected}, tx nonce {}",
                body.nonce
            )));
        }
        let max_cost = body.value + U256::from(body.gas_limit) * U256::from(body.gas_price);
        if state.script.reject_send_funds || state.balance(from) < max_cost {
            return Err(RpcFailure::new(
                "insufficient funds for gas * price + value",
            ));
        }

        let hash = *signed.hash();
        state.nonces.insert(from, expected + 1);
        state.sent.push(SentTx {
            from,
            to,
            value: body.value,
            nonce: body.nonce,
            gas_limit: body.gas_limit,
            input: body.input.clone(),
        });

        let (success, gas_used, logs) = if state.script.out_of_gas {
            (false, body.gas_limit, vec![])
        } else {
            match state.execute(self.addresses, to, body.value, &body.input, true) {
                Ok((_, logs)) => (true, Self::GAS_ESTIMATE - 10_000, logs),
                Err(_) => (false, 30_000, vec![]),
            }
        };

        if !state.script.never_confirm {
            state.receipts.insert(
                hash,
                TxReceipt {
                    transaction_hash: hash,
                    success,
                    gas_used,
                    block_number: Some(state.sent.len() as u64),
                    logs,
                },
            );
        }
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, RpcFailure> {
        Ok(self.state.lock().unwrap().receipts.get(&hash).cloned())
    }
}
