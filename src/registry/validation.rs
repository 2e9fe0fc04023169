//! Validation registry writes.

use alloy::primitives::{B256, U256};
use alloy::sol_types::SolCall;
use tracing::info;

use super::abi::IValidationRegistry;
use super::tx::ContractWrite;
use super::{MAX_VALIDATION_SCORE, RegistryClient};
use crate::error::RegistryError;
use crate::identity::IdentityProvider;

impl RegistryClient {
    /// Ask `validator_id` to validate work identified by `data_hash`.
    pub async fn request_validation(
        &self,
        provider: &dyn IdentityProvider,
        validator_id: U256,
        requester_id: U256,
        data_hash: B256,
    ) -> Result<B256, RegistryError> {
        let signer = provider.signer().await?;
        let data = IValidationRegistry::validationRequestCall {
            agentValidatorId: validator_id,
            agentServerId: requester_id,
            dataHash: data_hash,
        }
        .abi_encode();

        let receipt = self
            .execute(
                signer,
                ContractWrite {
                    label: "validationRequest",
                    to: self.addresses.validation,
                    data: data.into(),
                    value: U256::ZERO,
                },
            )
            .await?;
        info!(
            validator_id = %validator_id,
            requester_id = %requester_id,
            data_hash = %data_hash,
            "Validation requested"
        );
        Ok(receipt.transaction_hash)
    }

    /// Answer a validation request. Scores above 100 are rejected before
    /// anything is signed.
    pub async fn submit_validation_response(
        &self,
        provider: &dyn IdentityProvider,
        data_hash: B256,
        score: u8,
    ) -> Result<B256, RegistryError> {
        if score > MAX_VALIDATION_SCORE {
            return Err(RegistryError::InvalidScore(score));
        }

        let signer = provider.signer().await?;
        let data = IValidationRegistry::validationResponseCall {
            dataHash: data_hash,
            response: score,
        }
        .abi_encode();

        let receipt = self
            .execute(
                signer,
                ContractWrite {
                    label: "validationResponse",
                    to: self.addresses.validation,
                    data: data.into(),
                    value: U256::ZERO,
                },
            )
            .await?;
        info!(data_hash = %data_hash, score, "Validation response submitted");
        Ok(receipt.transaction_hash)
    }
}
