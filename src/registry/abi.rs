//! ERC-8004 registry ABIs (v0.3 surface).

use alloy::primitives::Bytes;
use alloy::sol;
use alloy::sol_types::SolInterface;

use crate::error::RevertReason;

sol! {
    interface IIdentityRegistry {
        struct AgentInfo {
            uint256 agentId;
            string agentDomain;
            address agentAddress;
        }

        event AgentRegistered(uint256 indexed agentId, string agentDomain, address agentAddress);

        error InsufficientFee();
        error DomainAlreadyRegistered();
        error AddressAlreadyRegistered();
        error AgentNotFound();
        error UnauthorizedUpdate();
        error InvalidDomain();
        error InvalidAddress();

        function newAgent(string agentDomain, address agentAddress) external payable returns (uint256 agentId);
        function getAgent(uint256 agentId) external view returns (uint256 id, address agentAddress, string agentDomain, uint256 registeredAt);
        function resolveByDomain(string agentDomain) external view returns (AgentInfo agentInfo);
        function resolveByAddress(address agentAddress) external view returns (AgentInfo agentInfo);
    }

    interface IReputationRegistry {
        error UnauthorizedFeedback();
        error AgentNotFound();

        function acceptFeedback(uint256 agentClientId, uint256 agentServerId) external;
    }

    interface IValidationRegistry {
        error AgentNotFound();
        error ValidationRequestNotFound();
        error InvalidResponse();
        error UnauthorizedValidator();
        error RequestExpired();

        function validationRequest(uint256 agentValidatorId, uint256 agentServerId, bytes32 dataHash) external;
        function validationResponse(bytes32 dataHash, uint8 response) external;
    }
}

/// Map revert data from any of the three registries to a typed reason.
pub fn classify_revert(data: &Bytes) -> RevertReason {
    use IIdentityRegistry::IIdentityRegistryErrors as Identity;
    use IReputationRegistry::IReputationRegistryErrors as Reputation;
    use IValidationRegistry::IValidationRegistryErrors as Validation;

    if let Ok(err) = Identity::abi_decode(data) {
        return match err {
            Identity::InsufficientFee(_) => RevertReason::InsufficientFee,
            Identity::DomainAlreadyRegistered(_) => RevertReason::DomainTaken,
            Identity::AddressAlreadyRegistered(_) => RevertReason::AddressTaken,
            Identity::AgentNotFound(_) => RevertReason::NotFound,
            Identity::UnauthorizedUpdate(_) => RevertReason::Unauthorized,
            Identity::InvalidDomain(_) | Identity::InvalidAddress(_) => RevertReason::InvalidInput,
        };
    }
    if let Ok(err) = Reputation::abi_decode(data) {
        return match err {
            Reputation::UnauthorizedFeedback(_) => RevertReason::Unauthorized,
            Reputation::AgentNotFound(_) => RevertReason::NotFound,
        };
    }
    if let Ok(err) = Validation::abi_decode(data) {
        return match err {
            Validation::AgentNotFound(_) | Validation::ValidationRequestNotFound(_) => {
                RevertReason::NotFound
            }
            Validation::UnauthorizedValidator(_) => RevertReason::Unauthorized,
            Validation::InvalidResponse(_) | Validation::RequestExpired(_) => {
                RevertReason::InvalidInput
            }
        };
    }
    RevertReason::Unknown
}
