//! HTTP client for a dstack-compatible key derivation / quote service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{AttestationQuote, DerivedKeyMaterial, KeyDerivationService, ReportData, TeeMode};
use crate::error::TeeError;

const DERIVE_KEY_PATH: &str = "prpc/Tappd.DeriveKey";
const TDX_QUOTE_PATH: &str = "prpc/Tappd.TdxQuote";

/// Minimum accepted key material length in bytes.
const MIN_KEY_MATERIAL: usize = 32;

#[derive(Debug, Serialize)]
struct DeriveKeyRequest<'a> {
    path: &'a str,
    subject: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeriveKeyResponse {
    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug, Serialize)]
struct TdxQuoteRequest {
    report_data: String,
    hash_algorithm: &'static str,
}

#[derive(Debug, Deserialize)]
struct TdxQuoteResponse {
    #[serde(default)]
    quote: Option<String>,
    #[serde(default)]
    event_log: Option<String>,
}

/// Client for the enclave's derivation and quote RPC.
#[derive(Debug, Clone)]
pub struct DstackClient {
    client: Client,
    endpoint: String,
}

impl DstackClient {
    /// Connect to an explicit endpoint (e.g. `http://localhost:8090`).
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TeeError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, endpoint })
    }

    /// Resolve the endpoint from a mode, preferring an explicit override.
    pub fn from_mode(mode: TeeMode, endpoint: Option<&str>) -> Result<Self, TeeError> {
        if mode == TeeMode::Off {
            return Err(TeeError::Disabled);
        }
        let endpoint = match endpoint.or(mode.default_endpoint()) {
            Some(ep) => ep,
            None => return Err(TeeError::NoEndpoint(mode.to_string())),
        };
        info!(mode = %mode, endpoint, "TEE: connecting to key derivation service");
        Self::new(endpoint)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, TeeError> {
        let response = self
            .client
            .post(format!("{}/{}", self.endpoint, path))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TeeError::Service { status, body });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| TeeError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl KeyDerivationService for DstackClient {
    async fn get_key(&self, path: &str, purpose: &str) -> Result<DerivedKeyMaterial, TeeError> {
        if path.is_empty() || purpose.is_empty() {
            return Err(TeeError::InvalidRequest(
                "path and purpose are required for key derivation".to_string(),
            ));
        }

        debug!(path, "Deriving key in TEE");
        let response: DeriveKeyResponse = self
            .post(DERIVE_KEY_PATH, &DeriveKeyRequest { path, subject: purpose })
            .await?;

        let key_hex = response
            .key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| TeeError::MalformedResponse("missing 'key' field".to_string()))?;

        let bytes = alloy::hex::decode(key_hex.trim())
            .map_err(|e| TeeError::MalformedResponse(format!("key is not hex: {e}")))?;
        if bytes.len() < MIN_KEY_MATERIAL {
            return Err(TeeError::MalformedResponse(format!(
                "key material too short: {} bytes",
                bytes.len()
            )));
        }

        Ok(DerivedKeyMaterial::new(bytes))
    }

    async fn get_quote(&self, report_data: &ReportData) -> Result<AttestationQuote, TeeError> {
        let request = TdxQuoteRequest {
            report_data: alloy::hex::encode(report_data.as_bytes()),
            hash_algorithm: "raw",
        };
        let response: TdxQuoteResponse = self.post(TDX_QUOTE_PATH, &request).await?;

        let quote_hex = response
            .quote
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| TeeError::MalformedResponse("missing 'quote' field".to_string()))?;
        let quote = alloy::hex::decode(quote_hex.trim())
            .map_err(|e| TeeError::MalformedResponse(format!("quote is not hex: {e}")))?;

        info!(quote_len = quote.len(), "Attestation quote generated");

        Ok(AttestationQuote {
            report_data: report_data.clone(),
            quote,
            event_log: response.event_log.map(String::into_bytes),
            generated_at: chrono::Utc::now(),
        })
    }
}
