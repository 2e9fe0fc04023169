//! Fixed 64-byte identity binding placed in attestation report data.
//!
//! ```text
//! [0]       version (1)
//! [1]       flags: bit0 agent id present, bit1 agent id hashed, bit2 domain hashed
//! [2..22]   agent address
//! [22..30]  agent id, big-endian u64, or keccak256(id as 32 bytes)[..8]
//! [30..64]  domain, zero padded, or keccak256(domain) || 0x0000 when > 34 bytes
//! ```
//!
//! The layout is always exactly 64 bytes. Verifiers recompute the binding
//! from the claimed `{domain, address, agentId}` and compare with
//! [`IdentityBinding::matches`]; hashed fields cannot be reversed by
//! [`DecodedBinding`] but still compare exactly.

use alloy::primitives::{Address, U256, keccak256};
use serde::Serialize;

use crate::tee::{REPORT_DATA_MAX, ReportData};

pub const BINDING_VERSION: u8 = 1;

const FLAG_AGENT_ID: u8 = 0b001;
const FLAG_AGENT_ID_HASHED: u8 = 0b010;
const FLAG_DOMAIN_HASHED: u8 = 0b100;

const ADDRESS_RANGE: std::ops::Range<usize> = 2..22;
const AGENT_ID_RANGE: std::ops::Range<usize> = 22..30;
const DOMAIN_OFFSET: usize = 30;
const DOMAIN_INLINE_MAX: usize = REPORT_DATA_MAX - DOMAIN_OFFSET;

/// `{domain, address, agentId?}` as attested by an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityBinding {
    pub domain: String,
    pub address: Address,
    pub agent_id: Option<U256>,
}

impl IdentityBinding {
    pub fn new(domain: impl Into<String>, address: Address, agent_id: Option<U256>) -> Self {
        Self {
            domain: domain.into(),
            address,
            agent_id,
        }
    }

    pub fn encode(&self) -> [u8; REPORT_DATA_MAX] {
        let mut out = [0u8; REPORT_DATA_MAX];
        let mut flags = 0u8;

        out[0] = BINDING_VERSION;
        out[ADDRESS_RANGE].copy_from_slice(self.address.as_slice());

        // A zero id means "unregistered" on chain, so it is encoded as absent.
        if let Some(id) = self.agent_id.filter(|id| !id.is_zero()) {
            flags |= FLAG_AGENT_ID;
            match u64::try_from(id) {
                Ok(small) => out[AGENT_ID_RANGE].copy_from_slice(&small.to_be_bytes()),
                Err(_) => {
                    flags |= FLAG_AGENT_ID_HASHED;
                    let digest = keccak256(id.to_be_bytes::<32>());
                    out[AGENT_ID_RANGE].copy_from_slice(&digest[..8]);
                }
            }
        }

        let domain = self.domain.as_bytes();
        if domain.len() <= DOMAIN_INLINE_MAX {
            out[DOMAIN_OFFSET..DOMAIN_OFFSET + domain.len()].copy_from_slice(domain);
        } else {
            flags |= FLAG_DOMAIN_HASHED;
            out[DOMAIN_OFFSET..DOMAIN_OFFSET + 32].copy_from_slice(keccak256(domain).as_slice());
        }

        out[1] = flags;
        out
    }

    pub fn report_data(&self) -> ReportData {
        ReportData::exact(self.encode())
    }

    /// Whether `report_data` is exactly this binding.
    pub fn matches(&self, report_data: &[u8]) -> bool {
        report_data == self.encode().as_slice()
    }
}

/// Domain field as recovered from report data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DomainField {
    Inline(String),
    Hashed(alloy::primitives::B256),
}

/// Agent id field as recovered from report data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AgentIdField {
    Absent,
    Exact(u64),
    Hashed([u8; 8]),
}

/// A binding decoded from 64 bytes of report data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedBinding {
    pub version: u8,
    pub address: Address,
    pub agent_id: AgentIdField,
    pub domain: DomainField,
}

impl DecodedBinding {
    /// Parse report data, returning `None` for anything that is not a
    /// version-1 binding.
    pub fn decode(report_data: &[u8]) -> Option<Self> {
        if report_data.len() != REPORT_DATA_MAX || report_data[0] != BINDING_VERSION {
            return None;
        }
        let flags = report_data[1];
        if flags & !(FLAG_AGENT_ID | FLAG_AGENT_ID_HASHED | FLAG_DOMAIN_HASHED) != 0 {
            return None;
        }

        let address = Address::from_slice(&report_data[ADDRESS_RANGE]);

        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&report_data[AGENT_ID_RANGE]);
        let agent_id = if flags & FLAG_AGENT_ID == 0 {
            AgentIdField::Absent
        } else if flags & FLAG_AGENT_ID_HASHED != 0 {
            AgentIdField::Hashed(id_bytes)
        } else {
            AgentIdField::Exact(u64::from_be_bytes(id_bytes))
        };

        let tail = &report_data[DOMAIN_OFFSET..];
        let domain = if flags & FLAG_DOMAIN_HASHED != 0 {
            DomainField::Hashed(alloy::primitives::B256::from_slice(&tail[..32]))
        } else {
            let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
            DomainField::Inline(String::from_utf8(tail[..end].to_vec()).ok()?)
        };

        Some(Self {
            version: report_data[0],
            address,
            agent_id,
            domain,
        })
    }
}
