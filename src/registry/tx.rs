//! Build, sign, send and confirm registry transactions.

use std::time::Instant;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use tracing::{debug, info, warn};

use super::abi::classify_revert;
use super::{CallRequest, RegistryClient, TxReceipt};
use crate::error::{RegistryError, RevertReason, RpcFailure};

/// A signed, EIP-2718 encoded transaction ready for `eth_sendRawTransaction`.
///
/// Only produced by [`sign_transaction`], so the hash always matches the
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    hash: B256,
    raw: Bytes,
}

impl SignedTransaction {
    pub fn hash(&self) -> B256 {
        self.hash
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Fully specified legacy (EIP-155) transaction.
#[derive(Debug, Clone)]
pub struct UnsignedTx {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub chain_id: u64,
}

/// The single conversion from an unsigned transaction to signed bytes.
pub async fn sign_transaction(
    signer: &PrivateKeySigner,
    tx: UnsignedTx,
) -> Result<SignedTransaction, RegistryError> {
    let request = TransactionRequest::default()
        .with_from(signer.address())
        .with_to(tx.to)
        .with_input(tx.data)
        .with_value(tx.value)
        .with_nonce(tx.nonce)
        .with_gas_limit(tx.gas_limit)
        .with_gas_price(tx.gas_price)
        .with_chain_id(tx.chain_id);

    let wallet = EthereumWallet::from(signer.clone());
    let envelope = request
        .build(&wallet)
        .await
        .map_err(|e| RegistryError::Transaction(e.to_string()))?;

    Ok(SignedTransaction {
        hash: *envelope.tx_hash(),
        raw: envelope.encoded_2718().into(),
    })
}

/// A contract write before gas, nonce and signature are known.
#[derive(Debug, Clone)]
pub(crate) struct ContractWrite {
    pub label: &'static str,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// `true` when a node rejected a transaction because the sender cannot pay.
///
/// Nodes report this only as message text, so this is the one place the
/// client inspects error strings.
fn is_insufficient_funds(err: &RpcFailure) -> bool {
    let msg = err.message.to_lowercase();
    msg.contains("insufficient funds") || msg.contains("insufficient balance")
}

impl RegistryClient {
    /// Estimate plus buffer, or the default limit when the node cannot
    /// estimate.
    pub(crate) async fn gas_limit_for(&self, call: &CallRequest, label: &str) -> u64 {
        match self.rpc.estimate_gas(call).await {
            Ok(estimate) => {
                let buffered = estimate.saturating_mul(100 + self.options.gas_buffer_percent) / 100;
                debug!(label, estimate, gas_limit = buffered, "Gas estimated");
                buffered
            }
            Err(e) => {
                warn!(
                    label,
                    error = %e,
                    gas_limit = self.options.default_gas_limit,
                    "Gas estimation failed, using default limit"
                );
                self.options.default_gas_limit
            }
        }
    }

    async fn ensure_funds(&self, address: Address, required: U256) -> Result<(), RegistryError> {
        let available = self.rpc.balance(address).await?;
        if available < required {
            return Err(RegistryError::InsufficientFunds {
                address,
                required,
                available,
                shortfall: required - available,
            });
        }
        Ok(())
    }

    /// Run `write` through the full pipeline and return its successful
    /// receipt.
    pub(crate) async fn execute(
        &self,
        signer: &PrivateKeySigner,
        write: ContractWrite,
    ) -> Result<TxReceipt, RegistryError> {
        let from = signer.address();
        let call = CallRequest::new(write.to, write.data.clone())
            .from(from)
            .value(write.value);

        let gas_limit = self.gas_limit_for(&call, write.label).await;
        let gas_price = self.rpc.gas_price().await?;
        let required = write.value + U256::from(gas_limit) * U256::from(gas_price);
        self.ensure_funds(from, required).await?;

        let nonce = self.rpc.transaction_count(from).await?;
        let signed = sign_transaction(
            signer,
            UnsignedTx {
                to: write.to,
                data: write.data,
                value: write.value,
                nonce,
                gas_limit,
                gas_price,
                chain_id: self.chain_id,
            },
        )
        .await?;

        let tx_hash = match self.rpc.send_raw_transaction(&signed).await {
            Ok(hash) => hash,
            Err(e) if is_insufficient_funds(&e) => {
                let available = self.rpc.balance(from).await?;
                return Err(RegistryError::InsufficientFunds {
                    address: from,
                    required,
                    available,
                    shortfall: required.saturating_sub(available),
                });
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            label = write.label,
            tx_hash = %tx_hash,
            from = %from,
            nonce,
            gas_limit,
            "Transaction submitted"
        );

        let receipt = self.wait_for_receipt(tx_hash).await?;
        if !receipt.success {
            return Err(self.diagnose_revert(&call, &receipt, gas_limit).await);
        }

        info!(
            label = write.label,
            tx_hash = %tx_hash,
            block = ?receipt.block_number,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );
        Ok(receipt)
    }

    /// Poll for a receipt until the configured timeout.
    ///
    /// Read errors while polling are logged and polling continues; the
    /// transaction is already in flight.
    pub(crate) async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, RegistryError> {
        let started = Instant::now();
        let poll = async {
            loop {
                match self.rpc.transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => debug!(tx_hash = %tx_hash, error = %e, "Receipt poll failed"),
                }
                tokio::time::sleep(self.options.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.options.receipt_timeout, poll).await {
            Ok(receipt) => Ok(receipt),
            Err(_) => {
                warn!(
                    tx_hash = %tx_hash,
                    waited = ?started.elapsed(),
                    "No receipt before timeout; transaction may still confirm"
                );
                Err(RegistryError::ConfirmationTimeout {
                    tx_hash,
                    waited: started.elapsed(),
                })
            }
        }
    }

    /// Work out why a mined transaction failed.
    async fn diagnose_revert(
        &self,
        call: &CallRequest,
        receipt: &TxReceipt,
        gas_limit: u64,
    ) -> RegistryError {
        let tx_hash = Some(receipt.transaction_hash);

        if receipt.gas_used >= gas_limit {
            return RegistryError::Reverted {
                tx_hash,
                reason: RevertReason::OutOfGas,
                detail: format!("used {} of {} gas", receipt.gas_used, gas_limit),
            };
        }

        // Replay against current state to recover the revert payload.
        match self.rpc.call(call).await {
            Err(failure) if !failure.is_execution_revert() => RegistryError::Reverted {
                tx_hash,
                reason: RevertReason::Unknown,
                detail: format!("replay failed: {}", failure.message),
            },
            Err(failure) => {
                let reason = failure
                    .revert_data
                    .as_ref()
                    .map(classify_revert)
                    .unwrap_or(RevertReason::Unknown);
                let detail = match &failure.revert_data {
                    Some(data) => format!("{}; data {}", failure.message, data),
                    None => failure.message.clone(),
                };
                RegistryError::Reverted {
                    tx_hash,
                    reason,
                    detail,
                }
            }
            Ok(_) => RegistryError::Reverted {
                tx_hash,
                reason: RevertReason::Unknown,
                detail: "replay succeeded against current state".to_string(),
            },
        }
    }
}
