//! User settings persistence.
//!
//! Stores preferences in ~/.genesis/settings.json.
//! Settings are resolved with env var > settings.json > default priority
//! (see [`crate::config`]). Secrets (agent salt, development keys) are never
//! written here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::tee::TeeMode;

/// User settings persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub tee: TeeSettings,

    #[serde(default)]
    pub chain: ChainSettings,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub tx: TxSettings,

    #[serde(default)]
    pub agent: AgentSettings,
}

/// Key derivation backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TeeSettings {
    #[serde(default)]
    pub mode: TeeMode,

    /// Overrides the mode's default endpoint. Required in production.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainSettings {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

fn default_rpc_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_chain_id() -> u64 {
    31337
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
        }
    }
}

/// Registry contract addresses (0x-prefixed hex).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RegistrySettings {
    #[serde(default)]
    pub identity: Option<String>,

    #[serde(default)]
    pub reputation: Option<String>,

    #[serde(default)]
    pub validation: Option<String>,
}

/// Transaction tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxSettings {
    #[serde(default = "default_gas_buffer_percent")]
    pub gas_buffer_percent: u64,

    #[serde(default = "default_gas_limit")]
    pub default_gas_limit: u64,

    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_id_resolution_attempts")]
    pub id_resolution_attempts: u32,

    #[serde(default = "default_id_resolution_delay_ms")]
    pub id_resolution_delay_ms: u64,

    /// Registration fee in wei, as a decimal string. None = protocol default.
    #[serde(default)]
    pub registration_fee_wei: Option<String>,
}

fn default_gas_buffer_percent() -> u64 {
    crate::registry::GAS_BUFFER_PERCENT
}

fn default_gas_limit() -> u64 {
    crate::registry::DEFAULT_GAS_LIMIT
}

fn default_receipt_timeout_secs() -> u64 {
    crate::registry::RECEIPT_TIMEOUT.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    crate::registry::RECEIPT_POLL_INTERVAL.as_millis() as u64
}

fn default_id_resolution_attempts() -> u32 {
    crate::registry::ID_RESOLUTION_ATTEMPTS
}

fn default_id_resolution_delay_ms() -> u64 {
    crate::registry::ID_RESOLUTION_DELAY.as_millis() as u64
}

impl Default for TxSettings {
    fn default() -> Self {
        Self {
            gas_buffer_percent: default_gas_buffer_percent(),
            default_gas_limit: default_gas_limit(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            id_resolution_attempts: default_id_resolution_attempts(),
            id_resolution_delay_ms: default_id_resolution_delay_ms(),
            registration_fee_wei: None,
        }
    }
}

/// Agent metadata for the agent card and the local feedback ledger.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgentSettings {
    /// Registration domain, e.g. "alice.example.com".
    #[serde(default)]
    pub domain: Option<String>,

    /// Display name in the agent card. Falls back to the domain.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default)]
    pub endpoints: Vec<EndpointSettings>,

    /// JSONL feedback ledger. None = ~/.genesis/feedback.jsonl.
    #[serde(default)]
    pub feedback_path: Option<String>,
}

/// A service endpoint advertised in the agent card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointSettings {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl Settings {
    /// ~/.genesis
    pub fn base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".genesis")
    }

    /// ~/.genesis/settings.json
    pub fn default_path() -> PathBuf {
        Self::base_dir().join("settings.json")
    }

    /// Load settings from disk, returning defaults if missing or corrupt.
    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable settings at {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Get a setting value by dotted path (e.g., "tx.default_gas_limit").
    pub fn get(&self, path: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;

        for part in path.split('.') {
            current = current.get(part)?;
        }

        match current {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            serde_json::Value::Null => Some("null".to_string()),
            other => serde_json::to_string(other).ok(),
        }
    }

    /// Set a setting value by dotted path.
    ///
    /// The value is parsed according to the type of the existing value.
    pub fn set(&mut self, path: &str, value: &str) -> Result<(), String> {
        let mut json = serde_json::to_value(&self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        let (parents, final_key) = match path.rsplit_once('.') {
            Some((parents, key)) => (Some(parents), key),
            None => (None, path),
        };
        if final_key.is_empty() {
            return Err("Empty path".to_string());
        }

        let mut current = &mut json;
        for part in parents.into_iter().flat_map(|p| p.split('.')) {
            current = current
                .get_mut(part)
                .ok_or_else(|| format!("Path not found: {}", path))?;
        }

        let obj = current
            .as_object_mut()
            .ok_or_else(|| format!("Parent is not an object: {}", path))?;
        let existing = obj
            .get(final_key)
            .ok_or_else(|| format!("Path not found: {}", path))?;

        let new_value = match existing {
            serde_json::Value::Bool(_) => {
                let b = value
                    .parse::<bool>()
                    .map_err(|_| format!("Expected boolean for {}, got '{}'", path, value))?;
                serde_json::Value::Bool(b)
            }
            serde_json::Value::Number(_) => {
                let n = value
                    .parse::<u64>()
                    .map_err(|_| format!("Expected integer for {}, got '{}'", path, value))?;
                serde_json::Value::Number(n.into())
            }
            // Option<T> currently unset: a JSON object or array if it parses as
            // one, otherwise a string (all scalar optionals are strings).
            serde_json::Value::Null => match serde_json::from_str(value) {
                Ok(v @ (serde_json::Value::Array(_) | serde_json::Value::Object(_))) => v,
                _ => serde_json::Value::String(value.to_string()),
            },
            serde_json::Value::Array(_) => serde_json::from_str(value)
                .map_err(|e| format!("Invalid JSON array for {}: {}", path, e))?,
            serde_json::Value::Object(_) => serde_json::from_str(value)
                .map_err(|e| format!("Invalid JSON object for {}: {}", path, e))?,
            serde_json::Value::String(_) => serde_json::Value::String(value.to_string()),
        };

        obj.insert(final_key.to_string(), new_value);

        *self =
            serde_json::from_value(json).map_err(|e| format!("Failed to apply setting: {}", e))?;

        Ok(())
    }

    /// Reset a setting to its default value.
    ///
    /// The default is copied as JSON, so unset optional fields go back to
    /// `None` rather than the text "null".
    pub fn reset(&mut self, path: &str) -> Result<(), String> {
        let defaults = serde_json::to_value(Self::default())
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        let mut default_value = &defaults;
        for part in path.split('.') {
            default_value = default_value
                .get(part)
                .ok_or_else(|| format!("Unknown setting: {}", path))?;
        }

        let mut json = serde_json::to_value(&self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        let mut current = &mut json;
        for part in path.split('.') {
            current = current
                .get_mut(part)
                .ok_or_else(|| format!("Path not found: {}", path))?;
        }
        *current = default_value.clone();

        *self =
            serde_json::from_value(json).map_err(|e| format!("Failed to apply setting: {}", e))?;
        Ok(())
    }

    /// List all settings as (path, value) pairs, sorted by path.
    pub fn list(&self) -> Vec<(String, String)> {
        let json = match serde_json::to_value(self) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };

        let mut results = Vec::new();
        collect_settings(&json, String::new(), &mut results);
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

fn collect_settings(value: &serde_json::Value, prefix: String, results: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                collect_settings(val, path, results);
            }
        }
        serde_json::Value::String(s) => results.push((prefix, s.clone())),
        serde_json::Value::Number(n) => results.push((prefix, n.to_string())),
        serde_json::Value::Bool(b) => results.push((prefix, b.to_string())),
        serde_json::Value::Null => results.push((prefix, "null".to_string())),
        serde_json::Value::Array(arr) => {
            results.push((prefix, serde_json::to_string(arr).unwrap_or_default()))
        }
    }
}
