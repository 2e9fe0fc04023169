//! Blockchain node access.
//!
//! [`ChainRpc`] is the narrow slice of Ethereum JSON-RPC the registry
//! client needs. [`HttpChainRpc`] implements it over an alloy HTTP
//! provider; tests substitute an in-memory chain.

use alloy::network::{Ethereum, TransactionBuilder};
use alloy::primitives::{Address, B256, Bytes, Log, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::TransactionRequest;
use alloy::transports::TransportError;
use async_trait::async_trait;
use tracing::debug;

use super::tx::SignedTransaction;
use crate::error::RpcFailure;

/// Read-only call or gas estimation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl CallRequest {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from: None,
            to,
            data: data.into(),
            value: U256::ZERO,
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    fn into_request(self) -> TransactionRequest {
        let mut tx = TransactionRequest::default()
            .with_to(self.to)
            .with_input(self.data)
            .with_value(self.value);
        if let Some(from) = self.from {
            tx = tx.with_from(from);
        }
        tx
    }
}

/// The parts of a transaction receipt the registry client inspects.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub success: bool,
    pub gas_used: u64,
    pub block_number: Option<u64>,
    pub logs: Vec<Log>,
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcFailure>;

    async fn gas_price(&self) -> Result<u128, RpcFailure>;

    /// Pending-inclusive nonce for `address`.
    async fn transaction_count(&self, address: Address) -> Result<u64, RpcFailure>;

    async fn balance(&self, address: Address) -> Result<U256, RpcFailure>;

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, RpcFailure>;

    /// `eth_call`. A revert comes back as an [`RpcFailure`] carrying the
    /// revert payload.
    async fn call(&self, call: &CallRequest) -> Result<Bytes, RpcFailure>;

    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> Result<B256, RpcFailure>;

    /// `None` while the transaction is pending or unknown.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, RpcFailure>;
}

/// JSON-RPC over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChainRpc {
    provider: RootProvider<Ethereum>,
}

impl HttpChainRpc {
    pub fn new(rpc_url: url::Url) -> Self {
        debug!(rpc_url = %rpc_url, "Connecting to chain RPC");
        Self {
            provider: RootProvider::new_http(rpc_url),
        }
    }
}

fn rpc_failure(err: TransportError) -> RpcFailure {
    match err.as_error_resp() {
        Some(payload) => RpcFailure {
            code: Some(payload.code),
            message: payload.message.to_string(),
            revert_data: payload.as_revert_data(),
        },
        None => RpcFailure::new(err.to_string()),
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn chain_id(&self) -> Result<u64, RpcFailure> {
        self.provider.get_chain_id().await.map_err(rpc_failure)
    }

    async fn gas_price(&self) -> Result<u128, RpcFailure> {
        self.provider.get_gas_price().await.map_err(rpc_failure)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, RpcFailure> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(rpc_failure)
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcFailure> {
        self.provider.get_balance(address).await.map_err(rpc_failure)
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, RpcFailure> {
        self.provider
            .estimate_gas(call.clone().into_request())
            .await
            .map_err(rpc_failure)
    }

    async fn call(&self, call: &CallRequest) -> Result<Bytes, RpcFailure> {
        self.provider
            .call(call.clone().into_request())
            .await
            .map_err(rpc_failure)
    }

    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> Result<B256, RpcFailure> {
        let pending = self
            .provider
            .send_raw_transaction(tx.raw())
            .await
            .map_err(rpc_failure)?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, RpcFailure> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(rpc_failure)?;

        Ok(receipt.map(|r| TxReceipt {
            transaction_hash: r.transaction_hash,
            success: r.status(),
            gas_used: r.gas_used,
            block_number: r.block_number,
            logs: r.inner.logs().iter().map(|log| log.inner.clone()).collect(),
        }))
    }
}
