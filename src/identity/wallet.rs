//! secp256k1 key handling and signing for agent identities.
//!
//! Two signature encodings are exposed and must not be mixed up:
//!
//! - **raw digest**: ECDSA directly over a caller-supplied 32-byte hash.
//!   Used for custom bindings where the verifier recomputes the digest.
//! - **personal message**: EIP-191 (`"\x19Ethereum Signed Message:\n" || len || msg`),
//!   the encoding wallets and `ecrecover`-based tooling expect.

use alloy::primitives::{Address, B256, Signature, U256, keccak256};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::IdentityError;

/// Build a signer from a 32-byte scalar.
pub fn signer_from_bytes(key: &B256) -> Result<PrivateKeySigner, IdentityError> {
    PrivateKeySigner::from_bytes(key).map_err(|e| IdentityError::InvalidKey(e.to_string()))
}

/// Build a signer from a hex private key, with or without `0x`.
pub fn signer_from_hex(private_key_hex: &str) -> Result<PrivateKeySigner, IdentityError> {
    let key_hex = private_key_hex.trim();
    let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);
    let bytes = alloy::hex::decode(key_hex)
        .map_err(|_| IdentityError::InvalidKey("not valid hex".to_string()))?;
    if bytes.len() != 32 {
        return Err(IdentityError::InvalidKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    signer_from_bytes(&B256::from_slice(&bytes))
}

/// Reduce TEE key material to a signer: the scalar is keccak256(material).
pub fn signer_from_material(material: &[u8]) -> Result<PrivateKeySigner, IdentityError> {
    if material.is_empty() {
        return Err(IdentityError::InvalidKey("empty key material".to_string()));
    }
    signer_from_bytes(&keccak256(material))
}

/// Development-only key: sha256("{path}:{purpose}").
pub fn local_hash_key(path: &str, purpose: &str) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b":");
    hasher.update(purpose.as_bytes());
    B256::from_slice(&hasher.finalize())
}

/// ECDSA over a pre-hashed digest.
pub fn sign_digest(signer: &PrivateKeySigner, digest: &B256) -> Result<Signature, IdentityError> {
    signer
        .sign_hash_sync(digest)
        .map_err(|e| IdentityError::Signing(e.to_string()))
}

/// EIP-191 personal_sign.
pub fn sign_personal_message(
    signer: &PrivateKeySigner,
    message: &[u8],
) -> Result<Signature, IdentityError> {
    signer
        .sign_message_sync(message)
        .map_err(|e| IdentityError::Signing(e.to_string()))
}

/// Recover the signer of a raw-digest signature.
pub fn recover_digest_signer(signature: &Signature, digest: &B256) -> Result<Address, IdentityError> {
    signature
        .recover_address_from_prehash(digest)
        .map_err(|e| IdentityError::Signing(e.to_string()))
}

/// Recover the signer of an EIP-191 personal-message signature.
pub fn recover_message_signer(signature: &Signature, message: &[u8]) -> Result<Address, IdentityError> {
    signature
        .recover_address_from_msg(message)
        .map_err(|e| IdentityError::Signing(e.to_string()))
}

/// `(r, s, v)` with `v` in the legacy 27/28 form.
pub fn signature_parts(signature: &Signature) -> (U256, U256, u8) {
    let v = if signature.v() { 28 } else { 27 };
    (signature.r(), signature.s(), v)
}

/// 65-byte `r || s || v` hex, 0x-prefixed.
pub fn signature_hex(signature: &Signature) -> String {
    alloy::hex::encode_prefixed(signature.as_bytes())
}

/// A signature in every form a verifier might ask for, with the address
/// it recovers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureReport {
    pub signature: String,
    pub r: U256,
    pub s: U256,
    pub v: u8,
    pub signer: Address,
}

impl SignatureReport {
    pub fn new(signature: &Signature, signer: Address) -> Self {
        let (r, s, v) = signature_parts(signature);
        Self {
            signature: signature_hex(signature),
            r,
            s,
            v,
            signer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn signer_from_hex_accepts_both_prefixes() {
        let a = signer_from_hex(KEY).unwrap();
        let b = signer_from_hex(KEY.trim_start_matches("0x")).unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn signer_from_hex_rejects_garbage() {
        assert!(signer_from_hex("0xzz").is_err());
        assert!(signer_from_hex("0x1234").is_err());
        assert!(signer_from_hex(&format!("0x{}", "00".repeat(32))).is_err());
    }

    #[test]
    fn material_reduction_is_deterministic() {
        let material = [0x11u8; 48];
        let a = signer_from_material(&material).unwrap();
        let b = signer_from_material(&material).unwrap();
        assert_eq!(a.address(), b.address());
        assert!(signer_from_material(&[]).is_err());
    }

    #[test]
    fn local_hash_key_depends_on_both_inputs() {
        let base = local_hash_key("erc8004-agent/alice.test", "salt-1");
        assert_eq!(base, local_hash_key("erc8004-agent/alice.test", "salt-1"));
        assert_ne!(base, local_hash_key("erc8004-agent/alice.test", "salt-2"));
        assert_ne!(base, local_hash_key("erc8004-agent/bob.test", "salt-1"));
    }

    #[test]
    fn raw_and_personal_signatures_differ_and_recover() {
        let signer = signer_from_hex(KEY).unwrap();
        let digest = keccak256(b"binding");

        let raw = sign_digest(&signer, &digest).unwrap();
        let personal = sign_personal_message(&signer, digest.as_slice()).unwrap();
        assert_ne!(raw, personal);

        assert_eq!(recover_digest_signer(&raw, &digest).unwrap(), signer.address());
        assert_eq!(
            recover_message_signer(&personal, digest.as_slice()).unwrap(),
            signer.address()
        );
        // Decoding a raw signature as a personal one yields someone else.
        assert_ne!(
            recover_message_signer(&raw, digest.as_slice()).unwrap(),
            signer.address()
        );
    }

    #[test]
    fn signature_encodings() {
        let signer = signer_from_hex(KEY).unwrap();
        let sig = sign_personal_message(&signer, b"hello genesis").unwrap();
        let (_, _, v) = signature_parts(&sig);
        assert!(v == 27 || v == 28);

        let hex = signature_hex(&sig);
        assert!(hex.starts_with("0x"));
        assert_eq!(hex.len(), 2 + 130);
    }

    #[test]
    fn signature_report_matches_encoded_bytes() {
        let signer = signer_from_hex(KEY).unwrap();
        let sig = sign_digest(&signer, &keccak256(b"report")).unwrap();
        let signer_address = recover_digest_signer(&sig, &keccak256(b"report")).unwrap();
        let report = SignatureReport::new(&sig, signer_address);

        let bytes = sig.as_bytes();
        assert_eq!(report.r, U256::from_be_slice(&bytes[..32]));
        assert_eq!(report.s, U256::from_be_slice(&bytes[32..64]));
        assert_eq!(report.v, bytes[64]);
        assert_eq!(report.signature, alloy::hex::encode_prefixed(bytes));
        assert_eq!(report.signer, signer.address());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["v"], report.v);
        assert!(json["r"].is_string());
    }
}
