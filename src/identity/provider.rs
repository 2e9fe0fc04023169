//! Identity providers: TEE-backed and development.

use std::sync::Arc;

use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::{AgentIdentity, IdentityProvider, KeyBackend, wallet};
use crate::error::{IdentityError, TeeError};
use crate::tee::{AttestationQuote, KeyDerivationService, ReportData};

/// Derives the agent key inside a TEE.
///
/// The key is requested once, on first use, and cached for the life of the
/// provider. Concurrent first calls share a single derivation request.
pub struct TeeIdentityProvider {
    identity: AgentIdentity,
    service: Arc<dyn KeyDerivationService>,
    signer: OnceCell<PrivateKeySigner>,
}

impl TeeIdentityProvider {
    pub fn new(identity: AgentIdentity, service: Arc<dyn KeyDerivationService>) -> Self {
        Self {
            identity,
            service,
            signer: OnceCell::new(),
        }
    }

    async fn derive(&self) -> Result<PrivateKeySigner, IdentityError> {
        let path = self.identity.derivation_path();
        let material = self
            .service
            .get_key(&path, self.identity.derivation_purpose())
            .await
            .map_err(IdentityError::Derivation)?;
        let signer = wallet::signer_from_material(material.expose())?;
        info!(
            domain = %self.identity.domain(),
            address = %signer.address(),
            "Derived agent identity in TEE"
        );
        Ok(signer)
    }
}

impl std::fmt::Debug for TeeIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeeIdentityProvider")
            .field("identity", &self.identity)
            .field("derived", &self.signer.initialized())
            .finish()
    }
}

#[async_trait]
impl IdentityProvider for TeeIdentityProvider {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    fn backend(&self) -> KeyBackend {
        KeyBackend::Tee
    }

    async fn signer(&self) -> Result<&PrivateKeySigner, IdentityError> {
        self.signer.get_or_try_init(|| self.derive()).await
    }

    async fn quote(&self, report_data: &ReportData) -> Result<AttestationQuote, IdentityError> {
        self.service.get_quote(report_data).await.map_err(|e| {
            warn!(domain = %self.identity.domain(), error = %e, "Attestation quote failed");
            IdentityError::AttestationUnavailable(e.to_string())
        })
    }
}

/// Development identity with no enclave behind it.
///
/// Anyone who knows the derivation inputs (or holds the supplied key) can
/// sign as this agent. It produces no attestation quotes. It is never
/// chosen implicitly: callers construct it by name.
pub struct LocalIdentityProvider {
    identity: AgentIdentity,
    backend: KeyBackend,
    signer: PrivateKeySigner,
}

impl LocalIdentityProvider {
    /// Key = sha256("{path}:{purpose}").
    pub fn hashed(identity: AgentIdentity) -> Result<Self, IdentityError> {
        let key = wallet::local_hash_key(&identity.derivation_path(), identity.derivation_purpose());
        let signer = wallet::signer_from_bytes(&key)?;
        warn!(
            domain = %identity.domain(),
            address = %signer.address(),
            backend = KeyBackend::LocalHash.as_str(),
            "Using development key backend; this key is not hardware-protected"
        );
        Ok(Self {
            identity,
            backend: KeyBackend::LocalHash,
            signer,
        })
    }

    /// Use an operator-supplied private key.
    pub fn from_private_key(
        identity: AgentIdentity,
        private_key: &SecretString,
    ) -> Result<Self, IdentityError> {
        let signer = wallet::signer_from_hex(private_key.expose_secret())?;
        warn!(
            domain = %identity.domain(),
            address = %signer.address(),
            backend = KeyBackend::Supplied.as_str(),
            "Using supplied private key; this key is not hardware-protected"
        );
        Ok(Self {
            identity,
            backend: KeyBackend::Supplied,
            signer,
        })
    }
}

impl std::fmt::Debug for LocalIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentityProvider")
            .field("identity", &self.identity)
            .field("backend", &self.backend)
            .field("address", &self.signer.address())
            .finish()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    fn backend(&self) -> KeyBackend {
        self.backend
    }

    async fn signer(&self) -> Result<&PrivateKeySigner, IdentityError> {
        Ok(&self.signer)
    }

    async fn quote(&self, _report_data: &ReportData) -> Result<AttestationQuote, IdentityError> {
        Err(IdentityError::AttestationUnavailable(format!(
            "{} backend has no enclave",
            self.backend.as_str()
        )))
    }
}

/// Build the provider for a TEE service, mapping a disabled backend to a
/// typed error instead of silently degrading.
pub fn tee_provider(
    identity: AgentIdentity,
    service: Result<Arc<dyn KeyDerivationService>, TeeError>,
) -> Result<TeeIdentityProvider, IdentityError> {
    let service = service.map_err(IdentityError::Derivation)?;
    Ok(TeeIdentityProvider::new(identity, service))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use alloy::primitives::{U256, keccak256};

    use super::*;
    use crate::identity::attestation::DecodedBinding;
    use crate::tee::DerivedKeyMaterial;

    /// Deterministic in-memory stand-in for the enclave.
    #[derive(Default)]
    pub(crate) struct FakeEnclave {
        pub key_calls: AtomicUsize,
        pub fail_keys: bool,
        pub fail_quotes: bool,
    }

    #[async_trait]
    impl KeyDerivationService for FakeEnclave {
        async fn get_key(&self, path: &str, purpose: &str) -> Result<DerivedKeyMaterial, TeeError> {
            self.key_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_keys {
                return Err(TeeError::MalformedResponse("missing 'key' field".to_string()));
            }
            let seed = keccak256(format!("enclave-secret|{path}|{purpose}"));
            Ok(DerivedKeyMaterial::new(seed.to_vec()))
        }

        async fn get_quote(&self, report_data: &ReportData) -> Result<AttestationQuote, TeeError> {
            if self.fail_quotes {
                return Err(TeeError::Service {
                    status: 503,
                    body: "enclave unavailable".to_string(),
                });
            }
            Ok(AttestationQuote {
                report_data: report_data.clone(),
                quote: vec![0x04, 0x00, 0x02, 0x00],
                event_log: None,
                generated_at: chrono::Utc::now(),
            })
        }
    }

    fn identity(domain: &str, salt: &str) -> AgentIdentity {
        AgentIdentity::new(domain, salt).unwrap()
    }

    #[tokio::test]
    async fn derivation_is_deterministic_across_instances() {
        let enclave: Arc<dyn KeyDerivationService> = Arc::new(FakeEnclave::default());
        let a = TeeIdentityProvider::new(identity("alice.test", "salt-a"), enclave.clone());
        let b = TeeIdentityProvider::new(identity("alice.test", "salt-a"), enclave.clone());

        let first = a.derive_address().await.unwrap();
        for _ in 0..5 {
            assert_eq!(a.derive_address().await.unwrap(), first);
        }
        assert_eq!(b.derive_address().await.unwrap(), first);
    }

    #[tokio::test]
    async fn derivation_hits_the_service_once() {
        let enclave = Arc::new(FakeEnclave::default());
        let provider = TeeIdentityProvider::new(identity("alice.test", "salt-a"), enclave.clone());

        for _ in 0..10 {
            provider.derive_address().await.unwrap();
        }
        assert_eq!(enclave.key_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_salts_never_collide() {
        let enclave: Arc<dyn KeyDerivationService> = Arc::new(FakeEnclave::default());
        let mut seen = HashSet::new();
        for _ in 0..2000 {
            let salt = format!("{:032x}", rand::random::<u128>());
            let provider = TeeIdentityProvider::new(identity("agent.test", &salt), enclave.clone());
            assert!(seen.insert(provider.derive_address().await.unwrap()));
        }
    }

    #[tokio::test]
    async fn distinct_domains_same_salt_differ() {
        let enclave: Arc<dyn KeyDerivationService> = Arc::new(FakeEnclave::default());
        let a = TeeIdentityProvider::new(identity("alice.test", "shared"), enclave.clone());
        let b = TeeIdentityProvider::new(identity("bob.test", "shared"), enclave);
        assert_ne!(
            a.derive_address().await.unwrap(),
            b.derive_address().await.unwrap()
        );
    }

    #[tokio::test]
    async fn derivation_failure_is_typed_and_not_cached() {
        let enclave = Arc::new(FakeEnclave {
            fail_keys: true,
            ..Default::default()
        });
        let provider = TeeIdentityProvider::new(identity("alice.test", "salt"), enclave.clone());

        let err = provider.derive_address().await.unwrap_err();
        assert!(matches!(err, IdentityError::Derivation(_)));
        let _ = provider.derive_address().await;
        assert_eq!(enclave.key_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn attestation_binds_identity() {
        let enclave: Arc<dyn KeyDerivationService> = Arc::new(FakeEnclave::default());
        let provider = TeeIdentityProvider::new(identity("alice.test", "salt"), enclave);
        let address = provider.derive_address().await.unwrap();

        let quote = provider.attestation(Some(U256::from(7))).await.unwrap();
        assert_eq!(quote.report_data.as_bytes().len(), 64);
        let decoded = DecodedBinding::decode(quote.report_data.as_bytes()).unwrap();
        assert_eq!(decoded.address, address);
    }

    #[tokio::test]
    async fn quote_failure_is_attestation_unavailable() {
        let enclave: Arc<dyn KeyDerivationService> = Arc::new(FakeEnclave {
            fail_quotes: true,
            ..Default::default()
        });
        let provider = TeeIdentityProvider::new(identity("alice.test", "salt"), enclave);

        let err = provider.attestation(None).await.unwrap_err();
        assert!(matches!(err, IdentityError::AttestationUnavailable(_)));
        // Signing still works without attestation.
        assert!(provider.sign_personal_message(b"still usable").await.is_ok());
    }

    #[tokio::test]
    async fn local_hashed_provider_is_deterministic_and_unattested() {
        let a = LocalIdentityProvider::hashed(identity("alice.test", "salt")).unwrap();
        let b = LocalIdentityProvider::hashed(identity("alice.test", "salt")).unwrap();
        assert_eq!(a.backend(), KeyBackend::LocalHash);
        assert!(!a.backend().is_hardware_backed());
        assert_eq!(a.derive_address().await.unwrap(), b.derive_address().await.unwrap());
        assert!(matches!(
            a.attestation(None).await,
            Err(IdentityError::AttestationUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn local_and_tee_backends_disagree() {
        let enclave: Arc<dyn KeyDerivationService> = Arc::new(FakeEnclave::default());
        let tee = TeeIdentityProvider::new(identity("alice.test", "salt"), enclave);
        let local = LocalIdentityProvider::hashed(identity("alice.test", "salt")).unwrap();
        assert_ne!(
            tee.derive_address().await.unwrap(),
            local.derive_address().await.unwrap()
        );
    }

    #[tokio::test]
    async fn supplied_key_provider_uses_that_key() {
        let key = SecretString::from(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318".to_string(),
        );
        let provider =
            LocalIdentityProvider::from_private_key(identity("alice.test", "salt"), &key).unwrap();
        let expected = wallet::signer_from_hex(key.expose_secret()).unwrap().address();
        assert_eq!(provider.derive_address().await.unwrap(), expected);
        assert_eq!(provider.backend(), KeyBackend::Supplied);
    }

    #[test]
    fn disabled_tee_is_a_derivation_error() {
        let err = tee_provider(identity("alice.test", "salt"), Err(TeeError::Disabled)).unwrap_err();
        assert!(matches!(err, IdentityError::Derivation(TeeError::Disabled)));
    }
}
