// src/keystore.rs

//! OpenPGP key lookup and signature verification, as an opaque
//! collaborator.
//!
//! Parsing and verifying OpenPGP key material itself is explicitly out
//! of scope for this crate (§1); `KeyStore` is the boundary the trove
//! and changeset signing paths call through. A concrete key-server
//! client or local keyring wires its own crypto behind this trait.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Public key material plus the fingerprint it was registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub fingerprint: String,
    pub key_data: Vec<u8>,
}

/// Looks up public keys by full fingerprint or fingerprint suffix, and
/// verifies digests against signatures made with keys it holds.
pub trait KeyStore: Send + Sync {
    /// Resolve a key id — a full fingerprint or a trailing suffix of
    /// one, per `keytable.py`'s `LIKE '%keyId%'` lookup — to its
    /// public key. `NotFound` if zero or more than one key matches.
    fn get_public_key(&self, key_id: &str) -> Result<PublicKey>;

    /// Register a new key under `owner_role`, identified by its own
    /// ASCII-armored representation (opaque to this crate).
    fn add_ascii_key(&self, owner_role: &str, ascii: &str) -> Result<()>;

    /// Verify that `signature` is a valid signature over `digest` made
    /// by the key identified by `key_id`. `NotFound` if the key is
    /// unknown; `Ok(false)` if the key is known but the signature does
    /// not verify.
    fn verify(&self, key_id: &str, digest: &[u8], signature: &[u8]) -> Result<bool>;
}

/// In-memory `KeyStore` used in tests and as a reference implementation.
///
/// Verification here is a placeholder equality check against a
/// previously recorded `(digest, signature)` pair registered via
/// [`InMemoryKeyStore::record_signature`] — real OpenPGP signature
/// verification is performed by whatever concrete `KeyStore` a
/// deployment wires in.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, (String, PublicKey)>>,
    signatures: RwLock<HashMap<(String, Vec<u8>), Vec<u8>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key directly (bypassing ASCII-armor parsing), keyed by
    /// its full fingerprint.
    pub fn insert(&self, owner_role: impl Into<String>, key: PublicKey) {
        self.keys
            .write()
            .unwrap()
            .insert(key.fingerprint.clone(), (owner_role.into(), key));
    }

    /// Record that `signature` is the valid signature over `digest`
    /// made by `key_id`, for later verification.
    pub fn record_signature(&self, key_id: impl Into<String>, digest: &[u8], signature: &[u8]) {
        self.signatures
            .write()
            .unwrap()
            .insert((key_id.into(), digest.to_vec()), signature.to_vec());
    }
}

impl KeyStore for InMemoryKeyStore {
    fn get_public_key(&self, key_id: &str) -> Result<PublicKey> {
        let keys = self.keys.read().unwrap();
        let matches: Vec<&PublicKey> = keys
            .values()
            .filter(|(_, key)| key.fingerprint.ends_with(key_id))
            .map(|(_, key)| key)
            .collect();
        match matches.len() {
            1 => Ok(matches[0].clone()),
            0 => Err(Error::not_found(format!("no key matching '{key_id}'"))),
            _ => Err(Error::conflict(format!("key id '{key_id}' matches more than one fingerprint"))),
        }
    }

    fn add_ascii_key(&self, owner_role: &str, ascii: &str) -> Result<()> {
        if ascii.trim().is_empty() {
            return Err(Error::parse("empty ASCII-armored key"));
        }
        let fingerprint = crate::hash::sha1(ascii.as_bytes());
        self.insert(
            owner_role,
            PublicKey { fingerprint, key_data: ascii.as_bytes().to_vec() },
        );
        Ok(())
    }

    fn verify(&self, key_id: &str, digest: &[u8], signature: &[u8]) -> Result<bool> {
        self.get_public_key(key_id)?;
        let signatures = self.signatures.read().unwrap();
        Ok(signatures
            .get(&(key_id.to_string(), digest.to_vec()))
            .map(|recorded| recorded.as_slice() == signature)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_suffix_lookup() {
        let store = InMemoryKeyStore::new();
        store.insert(
            "admin",
            PublicKey { fingerprint: "AAAA1111BBBB2222CCCC3333DDDD4444EEEE5555".into(), key_data: vec![] },
        );
        let found = store.get_public_key("EEEE5555").unwrap();
        assert_eq!(found.fingerprint, "AAAA1111BBBB2222CCCC3333DDDD4444EEEE5555");
    }

    #[test]
    fn test_ambiguous_suffix_is_conflict() {
        let store = InMemoryKeyStore::new();
        store.insert("admin", PublicKey { fingerprint: "AAAA0000".into(), key_data: vec![] });
        store.insert("admin", PublicKey { fingerprint: "BBBB0000".into(), key_data: vec![] });
        assert!(store.get_public_key("0000").is_err());
    }

    #[test]
    fn test_verify_roundtrip() {
        let store = InMemoryKeyStore::new();
        store.insert("admin", PublicKey { fingerprint: "FINGERPRINT1".into(), key_data: vec![] });
        store.record_signature("FINGERPRINT1", b"digest-bytes", b"sig-bytes");
        assert!(store.verify("FINGERPRINT1", b"digest-bytes", b"sig-bytes").unwrap());
        assert!(!store.verify("FINGERPRINT1", b"digest-bytes", b"wrong-sig").unwrap());
    }

    #[test]
    fn test_verify_unknown_key() {
        let store = InMemoryKeyStore::new();
        assert!(store.verify("nope", b"d", b"s").is_err());
    }
}
