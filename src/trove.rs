// src/trove.rs

//! The trove object: a named, versioned, flavor-qualified package —
//! its file manifest, sub-trove references, dependency sets, metadata,
//! and digest/signature block.

use crate::deps::DependencySet;
use crate::error::{Error, Result};
use crate::flavor::Flavor;
use crate::hash::{hash_bytes, Hash, HashAlgorithm};
use crate::keystore::KeyStore;
use crate::version::Version;
use std::collections::BTreeMap;

/// Whether a trove is an ordinary package, a redirect to another name,
/// or a soft-removed tombstone. Mirrors the `troveType` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TroveType {
    Normal,
    Redirect,
    Removed,
}

/// A single path inside a trove's file manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TroveFile {
    pub path_id: String,
    pub path: String,
    pub file_id: Hash,
    pub version: Version,
}

/// A reference from a parent trove (a package or group) to a child
/// trove it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubTroveRef {
    pub name: String,
    pub version: Version,
    pub flavor: Flavor,
    pub by_default: bool,
    pub strong_ref: bool,
}

/// One entry of a redirect trove's target list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectSpec {
    pub name: String,
    pub branch: Option<String>,
    pub flavor: Option<Flavor>,
}

/// An OpenPGP signature attached to a trove, keyed by the signing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub key_id: String,
    pub digest_algorithm: HashAlgorithm,
    pub signature: Vec<u8>,
}

/// In-memory representation of a package: `(name, version, flavor)`
/// plus everything needed to verify and persist it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trove {
    pub name: String,
    pub version: Version,
    pub flavor: Flavor,
    pub trove_type: TroveType,
    files: BTreeMap<String, TroveFile>,
    sub_troves: Vec<SubTroveRef>,
    pub provides: DependencySet,
    pub requires: DependencySet,
    pub build_requires: Vec<SubTroveRef>,
    pub metadata: BTreeMap<String, String>,
    pub cloned_from: Option<Version>,
    pub redirects: Vec<RedirectSpec>,
    signatures: Vec<Signature>,
}

impl Trove {
    pub fn new(name: impl Into<String>, version: Version, flavor: Flavor) -> Self {
        Self {
            name: name.into(),
            version,
            flavor,
            trove_type: TroveType::Normal,
            files: BTreeMap::new(),
            sub_troves: Vec::new(),
            provides: DependencySet::new(),
            requires: DependencySet::new(),
            build_requires: Vec::new(),
            metadata: BTreeMap::new(),
            cloned_from: None,
            redirects: Vec::new(),
            signatures: Vec::new(),
        }
    }

    /// Add a file to the manifest. Fails with `Conflict` if the path
    /// is already occupied by a different `pathId` — paths must be
    /// unique within a trove.
    pub fn add_file(&mut self, path_id: impl Into<String>, path: impl Into<String>, file_id: Hash, version: Version) -> Result<()> {
        let path_id = path_id.into();
        let path = path.into();
        if let Some(existing) = self.files.values().find(|f| f.path == path && f.path_id != path_id) {
            return Err(Error::conflict(format!(
                "path '{}' already occupied by pathId {}",
                path, existing.path_id
            )));
        }
        self.files.insert(path_id.clone(), TroveFile { path_id, path, file_id, version });
        Ok(())
    }

    /// Update an existing manifest entry by `pathId`; `path`/`file_id`
    /// are applied if given, otherwise the existing value is kept.
    pub fn update_file(
        &mut self,
        path_id: &str,
        path: Option<String>,
        file_id: Option<Hash>,
        version: Version,
    ) -> Result<()> {
        let entry = self
            .files
            .get_mut(path_id)
            .ok_or_else(|| Error::not_found(format!("no file with pathId {path_id}")))?;
        if let Some(path) = path {
            entry.path = path;
        }
        if let Some(file_id) = file_id {
            entry.file_id = file_id;
        }
        entry.version = version;
        Ok(())
    }

    pub fn remove_file(&mut self, path_id: &str) -> Result<TroveFile> {
        self.files
            .remove(path_id)
            .ok_or_else(|| Error::not_found(format!("no file with pathId {path_id}")))
    }

    /// Manifest entries in path-sorted order.
    pub fn file_list(&self) -> Vec<&TroveFile> {
        let mut list: Vec<&TroveFile> = self.files.values().collect();
        list.sort_by(|a, b| a.path.cmp(&b.path));
        list
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn add_sub_trove(&mut self, sub: SubTroveRef) {
        self.sub_troves.push(sub);
    }

    pub fn sub_troves(&self) -> &[SubTroveRef] {
        &self.sub_troves
    }

    pub fn sign(&mut self, key_id: impl Into<String>, digest_algorithm: HashAlgorithm, signature: Vec<u8>) {
        self.signatures.push(Signature { key_id: key_id.into(), digest_algorithm, signature });
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Canonicalize the signable fields in a fixed order: name,
    /// version, flavor, sorted file manifest by pathId, sorted
    /// sub-trove refs, frozen provides, frozen requires, frozen
    /// build-reqs, canonical metadata.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        out.extend_from_slice(self.version.freeze().as_bytes());
        out.push(0);
        out.extend_from_slice(&self.flavor.freeze());
        out.push(0);

        // File manifest, sorted by pathId (not by path — pathId is
        // the stable identity a diff keys on).
        let mut files: Vec<&TroveFile> = self.files.values().collect();
        files.sort_by(|a, b| a.path_id.cmp(&b.path_id));
        for file in files {
            out.extend_from_slice(file.path_id.as_bytes());
            out.push(b' ');
            out.extend_from_slice(file.path.as_bytes());
            out.push(b' ');
            out.extend_from_slice(file.file_id.as_str().as_bytes());
            out.push(b' ');
            out.extend_from_slice(file.version.freeze().as_bytes());
            out.push(b'\n');
        }
        out.push(0);

        let mut subs: Vec<&SubTroveRef> = self.sub_troves.iter().collect();
        subs.sort_by(|a, b| (&a.name, a.version.freeze()).cmp(&(&b.name, b.version.freeze())));
        for sub in subs {
            out.extend_from_slice(sub.name.as_bytes());
            out.push(b' ');
            out.extend_from_slice(sub.version.freeze().as_bytes());
            out.push(b' ');
            out.extend_from_slice(&sub.flavor.freeze());
            out.push(b'\n');
        }
        out.push(0);

        out.extend_from_slice(self.provides.freeze().as_bytes());
        out.push(0);
        out.extend_from_slice(self.requires.freeze().as_bytes());
        out.push(0);
        for req in &self.build_requires {
            out.extend_from_slice(req.name.as_bytes());
            out.push(b' ');
            out.extend_from_slice(req.version.freeze().as_bytes());
            out.push(b'\n');
        }
        out.push(0);

        for (k, v) in &self.metadata {
            out.extend_from_slice(k.as_bytes());
            out.push(b'=');
            out.extend_from_slice(v.as_bytes());
            out.push(b'\n');
        }
        out
    }

    pub fn digest_sha1(&self) -> Hash {
        hash_bytes(HashAlgorithm::Sha1, &self.canonical_bytes())
    }

    pub fn digest_sha256(&self) -> Hash {
        hash_bytes(HashAlgorithm::Sha256, &self.canonical_bytes())
    }

    /// Recompute digests and check every attached signature against a
    /// known key. `strict`: unknown-key signatures are fatal instead
    /// of merely reported.
    pub fn verify_digests(&self, keystore: &dyn KeyStore, strict: bool) -> Result<()> {
        let recomputed = self.digest_sha256();
        for sig in &self.signatures {
            let digest = match sig.digest_algorithm {
                HashAlgorithm::Sha256 => recomputed.clone(),
                HashAlgorithm::Sha1 => self.digest_sha1(),
            };
            match keystore.get_public_key(&sig.key_id) {
                Ok(_) => {
                    let ok = keystore
                        .verify(&sig.key_id, digest.as_bytes().as_slice(), &sig.signature)
                        .map_err(|e| Error::IntegrityError(e.to_string()))?;
                    if !ok {
                        return Err(Error::IntegrityError(format!(
                            "signature by key '{}' failed to verify",
                            sig.key_id
                        )));
                    }
                }
                Err(_) if strict => {
                    return Err(Error::IntegrityError(format!(
                        "signature by unknown key '{}' (strict mode)",
                        sig.key_id
                    )));
                }
                Err(_) => {
                    // Unknown-key signatures are reported, not fatal, unless strict.
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::InMemoryKeyStore;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn sample_trove() -> Trove {
        let mut t = Trove::new("foo:runtime", v("/example.com@ns:1/1.0-1-1"), Flavor::empty());
        t.add_file(
            "P1",
            "/bin/foo",
            hash_bytes(HashAlgorithm::Sha1, b"ST1"),
            v("/example.com@ns:1/1.0-1-1"),
        )
        .unwrap();
        t.add_file(
            "P2",
            "/etc/foo.conf",
            hash_bytes(HashAlgorithm::Sha1, b"ST2"),
            v("/example.com@ns:1/1.0-1-1"),
        )
        .unwrap();
        t
    }

    #[test]
    fn test_file_list_is_path_sorted() {
        let t = sample_trove();
        let list = t.file_list();
        assert_eq!(list[0].path, "/bin/foo");
        assert_eq!(list[1].path, "/etc/foo.conf");
    }

    #[test]
    fn test_duplicate_path_is_conflict() {
        let mut t = sample_trove();
        let err = t.add_file("P3", "/bin/foo", hash_bytes(HashAlgorithm::Sha1, b"ST3"), v("/example.com@ns:1/1.0-1-1"));
        assert!(err.is_err());
    }

    #[test]
    fn test_digest_changes_with_manifest() {
        let a = sample_trove();
        let mut b = sample_trove();
        b.remove_file("P2").unwrap();
        assert_ne!(a.digest_sha256(), b.digest_sha256());
    }

    #[test]
    fn test_verify_digests_no_signatures_passes() {
        let t = sample_trove();
        let keystore = InMemoryKeyStore::new();
        assert!(t.verify_digests(&keystore, false).is_ok());
    }

    #[test]
    fn test_verify_digests_unknown_key_lenient_vs_strict() {
        let mut t = sample_trove();
        t.sign("deadbeef", HashAlgorithm::Sha256, vec![1, 2, 3]);
        let keystore = InMemoryKeyStore::new();
        assert!(t.verify_digests(&keystore, false).is_ok());
        assert!(t.verify_digests(&keystore, true).is_err());
    }

    #[test]
    fn test_verify_digests_known_key_checks_signature() {
        let mut t = sample_trove();
        let keystore = InMemoryKeyStore::new();
        keystore.insert(
            "admin",
            crate::keystore::PublicKey { fingerprint: "KEY1".into(), key_data: vec![] },
        );
        let digest = t.digest_sha256();
        keystore.record_signature("KEY1", digest.as_bytes().as_slice(), b"good-sig");
        t.sign("KEY1", HashAlgorithm::Sha256, b"good-sig".to_vec());
        assert!(t.verify_digests(&keystore, true).is_ok());

        let mut bad = sample_trove();
        bad.sign("KEY1", HashAlgorithm::Sha256, b"wrong-sig".to_vec());
        assert!(bad.verify_digests(&keystore, true).is_err());
    }
}
