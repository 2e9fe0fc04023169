//! ERC-8004 agent card (registration file).
//!
//! The card is what peers fetch from `https://{domain}/.well-known/agent-card.json`
//! to learn how to reach an agent and which trust models it supports.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use super::KeyBackend;

/// Schema type of ERC-8004 v1 registration files.
pub const REGISTRATION_V1_TYPE: &str = "https://eips.ethereum.org/EIPS/eip-8004#registration-v1";

pub const TRUST_REPUTATION: &str = "reputation";
pub const TRUST_VALIDATION: &str = "validation";
pub const TRUST_TEE_ATTESTATION: &str = "tee-attestation";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub endpoints: Vec<CardEndpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registrations: Vec<CardRegistration>,
    pub supported_trust: Vec<String>,
}

/// A reachable endpoint (A2A, MCP, web, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardEndpoint {
    pub name: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// On-chain registration reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CardRegistration {
    /// Decimal string; agent ids are uint256.
    pub agent_id: String,
    /// `eip155:{chainId}:{identityRegistry}`.
    pub agent_registry: String,
    pub agent_address: Address,
}

/// Everything the card is built from.
#[derive(Debug, Clone)]
pub struct AgentCardInput {
    pub name: String,
    pub domain: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub endpoints: Vec<CardEndpoint>,
    pub address: Address,
    pub backend: KeyBackend,
    /// Set once the agent is registered.
    pub registration: Option<RegistrationRef>,
}

#[derive(Debug, Clone, Copy)]
pub struct RegistrationRef {
    pub agent_id: U256,
    pub chain_id: u64,
    pub identity_registry: Address,
}

pub fn build_agent_card(input: &AgentCardInput) -> AgentCard {
    let endpoints = if input.endpoints.is_empty() {
        vec![CardEndpoint {
            name: "A2A".to_string(),
            endpoint: format!("https://{}/.well-known/agent-card.json", input.domain),
            version: None,
        }]
    } else {
        input.endpoints.clone()
    };

    let registrations = input
        .registration
        .filter(|r| !r.agent_id.is_zero())
        .map(|r| CardRegistration {
            agent_id: r.agent_id.to_string(),
            agent_registry: format!("eip155:{}:{:#x}", r.chain_id, r.identity_registry),
            agent_address: input.address,
        })
        .into_iter()
        .collect();

    let mut supported_trust = vec![TRUST_REPUTATION.to_string(), TRUST_VALIDATION.to_string()];
    if input.backend.is_hardware_backed() {
        supported_trust.push(TRUST_TEE_ATTESTATION.to_string());
    }

    AgentCard {
        schema_type: REGISTRATION_V1_TYPE.to_string(),
        name: input.name.clone(),
        description: input
            .description
            .clone()
            .unwrap_or_else(|| format!("Genesis Studio agent at {}", input.domain)),
        image: input.image.clone(),
        endpoints,
        registrations,
        supported_trust,
    }
}

pub fn agent_card_json(input: &AgentCardInput) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&build_agent_card(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn input(backend: KeyBackend) -> AgentCardInput {
        AgentCardInput {
            name: "Alice".to_string(),
            domain: "alice.test".to_string(),
            description: None,
            image: None,
            endpoints: vec![],
            address: Address::repeat_byte(0x11),
            backend,
            registration: None,
        }
    }

    #[test]
    fn unregistered_card_has_default_endpoint() {
        let card = build_agent_card(&input(KeyBackend::LocalHash));
        assert_eq!(card.schema_type, REGISTRATION_V1_TYPE);
        assert!(card.registrations.is_empty());
        assert_eq!(card.endpoints.len(), 1);
        assert_eq!(
            card.endpoints[0].endpoint,
            "https://alice.test/.well-known/agent-card.json"
        );
        assert_eq!(card.description, "Genesis Studio agent at alice.test");
    }

    #[test]
    fn tee_attestation_only_when_hardware_backed() {
        let dev = build_agent_card(&input(KeyBackend::LocalHash));
        assert!(!dev.supported_trust.iter().any(|t| t == TRUST_TEE_ATTESTATION));

        let tee = build_agent_card(&input(KeyBackend::Tee));
        assert_eq!(
            tee.supported_trust,
            vec!["reputation", "validation", "tee-attestation"]
        );
    }

    #[test]
    fn registered_card_references_registry() {
        let mut i = input(KeyBackend::Tee);
        i.registration = Some(RegistrationRef {
            agent_id: U256::from(42),
            chain_id: 84532,
            identity_registry: Address::repeat_byte(0x22),
        });

        let json = agent_card_json(&i).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["registrations"][0]["agentId"], "42");
        assert_eq!(
            parsed["registrations"][0]["agentRegistry"],
            format!("eip155:84532:0x{}", "22".repeat(20))
        );
        assert_eq!(parsed["supportedTrust"][2], "tee-attestation");
        assert_eq!(parsed["type"], REGISTRATION_V1_TYPE);
    }

    #[test]
    fn zero_agent_id_is_not_a_registration() {
        let mut i = input(KeyBackend::Tee);
        i.registration = Some(RegistrationRef {
            agent_id: U256::ZERO,
            chain_id: 1,
            identity_registry: Address::ZERO,
        });
        assert!(build_agent_card(&i).registrations.is_empty());
    }
}
