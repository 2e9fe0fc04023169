//! Key derivation and attestation backend.
//!
//! The enclave service is the only place the agent's secret originates.
//! Given a stable `(path, purpose)` pair it must return byte-identical key
//! material on every call; everything above this layer (addresses, on-chain
//! registrations, attestation bindings) depends on that.
//!
//! # Wire contract
//!
//! ```text
//! derive:  (path, purpose)        -> { key: hex }
//! quote:   report_data[<=64 bytes] -> { quote: hex, event_log: string? }
//! ```
//!
//! Transport is deployment configuration; [`client::DstackClient`] speaks
//! the HTTP flavour exposed by the dstack simulator and tappd proxy.

pub mod client;

use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};

use crate::error::TeeError;

pub use client::DstackClient;

/// Hard ceiling imposed by the attestation hardware on bound application data.
pub const REPORT_DATA_MAX: usize = 64;

/// Raw key material returned by the derivation service.
///
/// Zeroized on drop and never printed.
pub struct DerivedKeyMaterial(SecretBox<Vec<u8>>);

impl DerivedKeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(SecretBox::new(Box::new(bytes)))
    }

    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.expose().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl fmt::Debug for DerivedKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKeyMaterial([REDACTED; {}])", self.len())
    }
}

/// Application data bound into an attestation quote.
///
/// Never longer than [`REPORT_DATA_MAX`]. Oversized input is truncated and
/// the truncation is recorded so verifiers know the quote binds the prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportData {
    bytes: Vec<u8>,
    truncated_from: Option<usize>,
}

impl ReportData {
    /// Wrap `data`, truncating to 64 bytes if needed.
    pub fn truncating(data: &[u8]) -> Self {
        if data.len() > REPORT_DATA_MAX {
            tracing::debug!(
                original_len = data.len(),
                "Truncating attestation report data to {} bytes",
                REPORT_DATA_MAX
            );
            Self {
                bytes: data[..REPORT_DATA_MAX].to_vec(),
                truncated_from: Some(data.len()),
            }
        } else {
            Self {
                bytes: data.to_vec(),
                truncated_from: None,
            }
        }
    }

    /// A fixed-size binding that always fits.
    pub fn exact(data: [u8; REPORT_DATA_MAX]) -> Self {
        Self {
            bytes: data.to_vec(),
            truncated_from: None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Original length when the input was truncated.
    pub fn truncated_from(&self) -> Option<usize> {
        self.truncated_from
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated_from.is_some()
    }
}

/// Hardware-signed quote binding [`ReportData`] to the executing enclave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationQuote {
    pub report_data: ReportData,
    /// Opaque quote blob.
    pub quote: Vec<u8>,
    pub event_log: Option<Vec<u8>>,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

impl AttestationQuote {
    pub fn quote_hex(&self) -> String {
        alloy::hex::encode_prefixed(&self.quote)
    }
}

/// How the TEE backend is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeeMode {
    /// Simulator on the local host.
    #[default]
    Local,
    /// Simulator reached from inside a container.
    Docker,
    /// Real enclave; the endpoint must be configured explicitly.
    Production,
    /// No TEE. Only an explicitly constructed development provider works.
    Off,
}

impl TeeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Docker => "docker",
            Self::Production => "production",
            Self::Off => "off",
        }
    }

    /// Default simulator endpoint for this mode.
    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            Self::Local => Some("http://localhost:8090"),
            Self::Docker => Some("http://host.docker.internal:8090"),
            Self::Production | Self::Off => None,
        }
    }
}

impl std::str::FromStr for TeeMode {
    type Err = TeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "docker" => Ok(Self::Docker),
            "production" | "prod" => Ok(Self::Production),
            "off" | "disabled" | "none" => Ok(Self::Off),
            _ => Err(TeeError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for TeeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote key derivation and attestation oracle.
#[async_trait]
pub trait KeyDerivationService: Send + Sync {
    /// Deterministic key material for `(path, purpose)`.
    async fn get_key(&self, path: &str, purpose: &str) -> Result<DerivedKeyMaterial, TeeError>;

    /// Hardware quote over `report_data`.
    async fn get_quote(&self, report_data: &ReportData) -> Result<AttestationQuote, TeeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_data_truncates_long_input() {
        let data = vec![7u8; 100];
        let rd = ReportData::truncating(&data);
        assert_eq!(rd.as_bytes().len(), REPORT_DATA_MAX);
        assert_eq!(rd.truncated_from(), Some(100));
        assert!(rd.is_truncated());
    }

    #[test]
    fn report_data_keeps_short_input() {
        let rd = ReportData::truncating(b"alice.example.com");
        assert_eq!(rd.as_bytes(), b"alice.example.com");
        assert!(!rd.is_truncated());
    }

    #[test]
    fn tee_mode_parse() {
        assert_eq!("LOCAL".parse::<TeeMode>().unwrap(), TeeMode::Local);
        assert_eq!("docker".parse::<TeeMode>().unwrap(), TeeMode::Docker);
        assert_eq!("Production".parse::<TeeMode>().unwrap(), TeeMode::Production);
        assert_eq!("off".parse::<TeeMode>().unwrap(), TeeMode::Off);
        assert!("enclave".parse::<TeeMode>().is_err());
    }

    #[test]
    fn tee_mode_endpoints() {
        assert_eq!(
            TeeMode::Local.default_endpoint(),
            Some("http://localhost:8090")
        );
        assert_eq!(
            TeeMode::Docker.default_endpoint(),
            Some("http://host.docker.internal:8090")
        );
        assert_eq!(TeeMode::Production.default_endpoint(), None);
        assert_eq!(TeeMode::Off.default_endpoint(), None);
    }

    #[test]
    fn key_material_debug_is_redacted() {
        let km = DerivedKeyMaterial::new(vec![0xde, 0xad, 0xbe, 0xef]);
        let shown = format!("{km:?}");
        assert!(!shown.contains("dead"));
        assert!(!shown.contains("222"));
        assert!(shown.contains("REDACTED"));
    }
}
