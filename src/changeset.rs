// src/changeset.rs

//! Changeset: the diff/snapshot unit that is both the wire format and
//! the commit unit. A changeset is either **absolute** (full contents
//! of each new trove) or **relative** (diffs against declared old
//! versions).

use crate::deps::Dependency;
use crate::error::{Error, Result};
use crate::flavor::Flavor;
use crate::hash::{hash_bytes, Hash, HashAlgorithm};
use crate::trove::{RedirectSpec, SubTroveRef, Trove, TroveFile, TroveType};
use crate::version::Version;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Either the whole new content of a file, or a byte-level diff
/// against the declared old content, carried in both directions so
/// `Changeset::invert` never needs to re-fetch the old content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffContent {
    Absolute(Vec<u8>),
    Diff { forward: String, reverse: String },
}

/// `(oldFileId, newFileId, diff|absolute stream)` for one changed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path_id: String,
    pub old_file_id: Option<Hash>,
    pub new_file_id: Hash,
    pub content: DiffContent,
}

/// Compute the diff between two frozen file-stream byte strings.
/// Streams are hex-encoded before diffing so the result is valid UTF-8
/// text regardless of the underlying binary content.
pub fn diff_streams(old: &[u8], new: &[u8]) -> DiffContent {
    let old_hex = hex::encode(old);
    let new_hex = hex::encode(new);
    let forward = diffy::create_patch(&old_hex, &new_hex).to_string();
    let reverse = diffy::create_patch(&new_hex, &old_hex).to_string();
    DiffContent::Diff { forward, reverse }
}

/// Apply a previously computed diff to `base` (the old frozen stream)
/// to recover the new frozen stream.
pub fn apply_diff(base: &[u8], content: &DiffContent) -> Result<Vec<u8>> {
    match content {
        DiffContent::Absolute(bytes) => Ok(bytes.clone()),
        DiffContent::Diff { forward, .. } => {
            let base_hex = hex::encode(base);
            let patch = diffy::Patch::from_str(forward)
                .map_err(|e| Error::patch(format!("malformed file diff: {e}")))?;
            let applied_hex = diffy::apply(&base_hex, &patch)
                .map_err(|e| Error::patch(format!("file diff does not apply: {e}")))?;
            hex::decode(&applied_hex).map_err(|e| Error::patch(format!("diff result is not valid hex: {e}")))
        }
    }
}

/// Edits to a single dependency set: members added and removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepSetEdit {
    pub added: Vec<Dependency>,
    pub removed: Vec<Dependency>,
}

/// One trove's worth of changes within a changeset: `(name, oldVersion
/// | None, newVersion, oldFlavor | None, newFlavor)` plus manifest,
/// sub-trove, dependency, and redirect-list edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTroveCs {
    pub name: String,
    pub old_version: Option<Version>,
    pub new_version: Version,
    pub old_flavor: Option<Flavor>,
    pub new_flavor: Flavor,
    pub new_trove_type: TroveType,

    pub added_files: Vec<TroveFile>,
    pub changed_files: Vec<(String, Option<String>, Option<Hash>, Version)>,
    pub removed_files: Vec<String>,
    pub file_diffs: Vec<FileChange>,

    pub added_sub_troves: Vec<SubTroveRef>,
    pub removed_sub_troves: Vec<SubTroveRef>,

    pub provides: DepSetEdit,
    pub requires: DepSetEdit,

    pub added_redirects: Vec<RedirectSpec>,
    pub removed_redirects: Vec<RedirectSpec>,
}

impl NewTroveCs {
    pub fn new_absolute(name: impl Into<String>, new_version: Version, new_flavor: Flavor) -> Self {
        Self {
            name: name.into(),
            old_version: None,
            new_version,
            old_flavor: None,
            new_flavor,
            new_trove_type: TroveType::Normal,
            added_files: Vec::new(),
            changed_files: Vec::new(),
            removed_files: Vec::new(),
            file_diffs: Vec::new(),
            added_sub_troves: Vec::new(),
            removed_sub_troves: Vec::new(),
            provides: DepSetEdit::default(),
            requires: DepSetEdit::default(),
            added_redirects: Vec::new(),
            removed_redirects: Vec::new(),
        }
    }

    fn is_absolute(&self) -> bool {
        self.old_version.is_none()
    }

    /// A `(name, newVersion, newFlavor)` destination key, used to
    /// detect overlap when merging two changesets.
    fn destination_key(&self) -> (String, String, Vec<u8>) {
        (self.name.clone(), self.new_version.freeze(), self.new_flavor.freeze())
    }

    /// Produce the reverse edit: swap old/new throughout so applying
    /// this to the *new* trove recovers the old one.
    fn invert(&self) -> Result<NewTroveCs> {
        if self.is_absolute() {
            return Err(Error::patch("cannot invert an absolute trove changeset"));
        }
        let inverted_diffs = self
            .file_diffs
            .iter()
            .map(|fc| FileChange {
                path_id: fc.path_id.clone(),
                old_file_id: Some(fc.new_file_id.clone()),
                new_file_id: fc.old_file_id.clone().expect("relative FileChange always has an old fileId"),
                content: match &fc.content {
                    DiffContent::Absolute(bytes) => DiffContent::Absolute(bytes.clone()),
                    DiffContent::Diff { forward, reverse } => {
                        DiffContent::Diff { forward: reverse.clone(), reverse: forward.clone() }
                    }
                },
            })
            .collect();

        Ok(NewTroveCs {
            name: self.name.clone(),
            old_version: Some(self.new_version.clone()),
            new_version: self.old_version.clone().expect("relative changeset always has an old version"),
            old_flavor: Some(self.new_flavor.clone()),
            new_flavor: self.old_flavor.clone().expect("relative changeset always has an old flavor"),
            new_trove_type: self.new_trove_type,
            added_files: Vec::new(),
            changed_files: self
                .changed_files
                .iter()
                .map(|(path_id, _, _, old_version)| (path_id.clone(), None, None, old_version.clone()))
                .collect(),
            removed_files: self.added_files.iter().map(|f| f.path_id.clone()).collect(),
            file_diffs: inverted_diffs,
            added_sub_troves: self.removed_sub_troves.clone(),
            removed_sub_troves: self.added_sub_troves.clone(),
            provides: DepSetEdit { added: self.provides.removed.clone(), removed: self.provides.added.clone() },
            requires: DepSetEdit { added: self.requires.removed.clone(), removed: self.requires.added.clone() },
            added_redirects: self.removed_redirects.clone(),
            removed_redirects: self.added_redirects.clone(),
        })
    }
}

/// Content-addressed blob store keyed by `(pathId, fileId)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentArchive {
    blobs: BTreeMap<(String, String), Vec<u8>>,
}

impl ContentArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path_id: impl Into<String>, file_id: &Hash, blob: Vec<u8>) {
        self.blobs.insert((path_id.into(), file_id.as_str().to_string()), blob);
    }

    pub fn get(&self, path_id: &str, file_id: &Hash) -> Option<&[u8]> {
        self.blobs.get(&(path_id.to_string(), file_id.as_str().to_string())).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

/// A full changeset: one or more `NewTroveCs` edits, the file-content
/// diffs/absolute streams they reference, and an optional absolute
/// signature over the whole manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    pub troves: Vec<NewTroveCs>,
    pub content_archive: ContentArchive,
    pub signature: Option<Vec<u8>>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_absolute(&self) -> bool {
        self.troves.iter().all(|t| t.is_absolute())
    }

    pub fn add_trove(&mut self, trove_cs: NewTroveCs) {
        self.troves.push(trove_cs);
    }

    /// Validate `old_trove` against `trove_cs.old_version`/`old_flavor`,
    /// then apply manifest/sub-trove/dependency diffs to produce the
    /// new trove. `PatchError` if the basis does not match or a file
    /// diff does not apply.
    pub fn apply(&self, old_trove: Option<&Trove>, trove_cs: &NewTroveCs) -> Result<Trove> {
        match (old_trove, &trove_cs.old_version) {
            (Some(old), Some(old_version)) => {
                if old.version != *old_version {
                    return Err(Error::patch(format!(
                        "basis version mismatch: trove is at {} but changeset expects {}",
                        old.version, old_version
                    )));
                }
                if let Some(old_flavor) = &trove_cs.old_flavor {
                    if old.flavor != *old_flavor {
                        return Err(Error::patch("basis flavor mismatch"));
                    }
                }
            }
            (None, None) => {}
            (Some(_), None) => {
                return Err(Error::patch("changeset is absolute but an old trove was supplied"));
            }
            (None, Some(v)) => {
                return Err(Error::patch(format!("changeset is relative to {v} but no old trove was supplied")));
            }
        }

        let mut trove = match old_trove {
            Some(old) => old.clone(),
            None => Trove::new(trove_cs.name.clone(), trove_cs.new_version.clone(), trove_cs.new_flavor.clone()),
        };
        trove.version = trove_cs.new_version.clone();
        trove.flavor = trove_cs.new_flavor.clone();
        trove.trove_type = trove_cs.new_trove_type;

        for file in &trove_cs.added_files {
            trove.add_file(file.path_id.clone(), file.path.clone(), file.file_id.clone(), file.version.clone())?;
        }
        for (path_id, path, file_id, version) in &trove_cs.changed_files {
            trove.update_file(path_id, path.clone(), file_id.clone(), version.clone())?;
        }
        for path_id in &trove_cs.removed_files {
            trove.remove_file(path_id)?;
        }

        for sub in &trove_cs.added_sub_troves {
            trove.add_sub_trove(sub.clone());
        }
        // `removed_sub_troves` names references dropped on this side;
        // matched by (name, version, flavor) identity.
        for removed in &trove_cs.removed_sub_troves {
            if let Some(pos) = trove
                .sub_troves()
                .iter()
                .position(|s| s.name == removed.name && s.version == removed.version && s.flavor == removed.flavor)
            {
                // `sub_troves()` is a read view; mutate through a fresh vec.
                let mut kept: Vec<_> = trove.sub_troves().to_vec();
                kept.remove(pos);
                trove = rebuild_with_sub_troves(trove, kept);
            }
        }

        for dep in &trove_cs.provides.added {
            trove.provides.insert(dep.clone());
        }
        for dep in &trove_cs.requires.added {
            trove.requires.insert(dep.clone());
        }
        trove.provides = trove.provides.difference(&crate::deps::DependencySet::from_deps(trove_cs.provides.removed.clone()));
        trove.requires = trove.requires.difference(&crate::deps::DependencySet::from_deps(trove_cs.requires.removed.clone()));

        trove.redirects.extend(trove_cs.added_redirects.clone());
        trove.redirects.retain(|r| !trove_cs.removed_redirects.contains(r));

        Ok(trove)
    }

    /// Produce a reverse relative changeset usable to roll back this
    /// one. All constituent `NewTroveCs` entries must be relative.
    pub fn invert(&self) -> Result<Changeset> {
        let troves = self.troves.iter().map(|t| t.invert()).collect::<Result<Vec<_>>>()?;
        Ok(Changeset { troves, content_archive: self.content_archive.clone(), signature: None })
    }

    /// Combine two changesets whose new-trove destinations do not
    /// overlap.
    pub fn merge(a: &Changeset, b: &Changeset) -> Result<Changeset> {
        let a_keys: std::collections::HashSet<_> = a.troves.iter().map(|t| t.destination_key()).collect();
        for t in &b.troves {
            if a_keys.contains(&t.destination_key()) {
                return Err(Error::conflict(format!(
                    "changesets both produce trove '{}' at version {}",
                    t.name, t.new_version
                )));
            }
        }
        let mut troves = a.troves.clone();
        troves.extend(b.troves.clone());
        let mut content_archive = a.content_archive.clone();
        for (key, blob) in &b.content_archive.blobs {
            content_archive.blobs.insert(key.clone(), blob.clone());
        }
        Ok(Changeset { troves, content_archive, signature: None })
    }

    /// Attach an absolute-scope signature over the whole manifest.
    /// `signature` is produced externally (private-key signing is out
    /// of scope); this only records it.
    pub fn sign(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }

    /// SHA-256 digest of the whole manifest, used as the thing a
    /// caller's signature is computed over.
    pub fn manifest_digest(&self) -> Hash {
        let mut bytes = Vec::new();
        for t in &self.troves {
            bytes.extend_from_slice(t.name.as_bytes());
            bytes.extend_from_slice(t.new_version.freeze().as_bytes());
            bytes.extend_from_slice(&t.new_flavor.freeze());
        }
        hash_bytes(HashAlgorithm::Sha256, &bytes)
    }

    /// Frame each constituent trove edit per §6's wire format:
    /// `SRS PKG {ABSTRACT,CHANGESET,NEW} <name> <oldVersion?> <newVersion> <mainLines> <diffLines>`
    /// followed by the main edit lines and any file diff lines.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for t in &self.troves {
            let mut main_lines = Vec::new();
            for f in &t.added_files {
                main_lines.push(format!("+{} {} {}", f.path_id, f.path, f.file_id));
            }
            for (path_id, path, file_id, _) in &t.changed_files {
                main_lines.push(format!(
                    "~{} {} {}",
                    path_id,
                    path.as_deref().unwrap_or("-"),
                    file_id.as_ref().map(|h| h.to_string()).unwrap_or_else(|| "-".to_string())
                ));
            }
            for path_id in &t.removed_files {
                main_lines.push(format!("-{path_id}"));
            }
            for sub in &t.added_sub_troves {
                main_lines.push(format!("p+{} {}", sub.name, sub.version));
            }
            for sub in &t.removed_sub_troves {
                main_lines.push(format!("p-{} {}", sub.name, sub.version));
            }

            let diff_lines: Vec<&str> = t
                .file_diffs
                .iter()
                .filter_map(|fc| match &fc.content {
                    DiffContent::Diff { forward, .. } => Some(forward.as_str()),
                    DiffContent::Absolute(_) => None,
                })
                .collect();

            let header = if t.is_absolute() {
                format!(
                    "SRS PKG ABSTRACT  {} {} {} {}",
                    t.name,
                    t.new_version.freeze(),
                    main_lines.len(),
                    diff_lines.len()
                )
            } else {
                format!(
                    "SRS PKG CHANGESET {} {} {} {} {}",
                    t.name,
                    t.old_version.as_ref().unwrap().freeze(),
                    t.new_version.freeze(),
                    main_lines.len(),
                    diff_lines.len()
                )
            };
            out.push_str(&header);
            out.push('\n');
            for line in &main_lines {
                out.push_str(line);
                out.push('\n');
            }
            for line in &diff_lines {
                out.push_str(line);
            }
        }
        out
    }
}

fn rebuild_with_sub_troves(mut trove: Trove, kept: Vec<SubTroveRef>) -> Trove {
    for sub in kept {
        if !trove.sub_troves().iter().any(|s| s.name == sub.name && s.version == sub.version && s.flavor == sub.flavor) {
            trove.add_sub_trove(sub);
        }
    }
    trove
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flavor::Flavor;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_apply_absolute_builds_trove() {
        let mut cs = NewTroveCs::new_absolute("foo:runtime", v("/example.com@ns:1/1.0-1-1"), Flavor::empty());
        cs.added_files.push(TroveFile {
            path_id: "P1".into(),
            path: "/bin/foo".into(),
            file_id: hash_bytes(HashAlgorithm::Sha1, b"ST1"),
            version: v("/example.com@ns:1/1.0-1-1"),
        });
        let changeset = Changeset { troves: vec![cs.clone()], ..Default::default() };
        let trove = changeset.apply(None, &cs).unwrap();
        assert_eq!(trove.file_count(), 1);
        assert_eq!(trove.name, "foo:runtime");
    }

    #[test]
    fn test_apply_rejects_wrong_basis() {
        let old = Trove::new("foo:runtime", v("/example.com@ns:1/1.0-1-1"), Flavor::empty());
        let mut cs = NewTroveCs::new_absolute("foo:runtime", v("/example.com@ns:1/1.0-1-2"), Flavor::empty());
        cs.old_version = Some(v("/example.com@ns:1/9.9-9-9"));
        let changeset = Changeset { troves: vec![cs.clone()], ..Default::default() };
        assert!(changeset.apply(Some(&old), &cs).is_err());
    }

    #[test]
    fn test_invert_round_trips_added_file() {
        let mut cs = NewTroveCs::new_absolute("foo:runtime", v("/example.com@ns:1/1.0-1-2"), Flavor::empty());
        cs.old_version = Some(v("/example.com@ns:1/1.0-1-1"));
        cs.old_flavor = Some(Flavor::empty());
        cs.added_files.push(TroveFile {
            path_id: "P1".into(),
            path: "/bin/foo".into(),
            file_id: hash_bytes(HashAlgorithm::Sha1, b"ST1"),
            version: v("/example.com@ns:1/1.0-1-2"),
        });
        let inverted = cs.invert().unwrap();
        assert_eq!(inverted.removed_files, vec!["P1".to_string()]);
        assert_eq!(inverted.new_version, v("/example.com@ns:1/1.0-1-1"));
    }

    #[test]
    fn test_merge_rejects_overlapping_destination() {
        let cs_a = NewTroveCs::new_absolute("foo:runtime", v("/example.com@ns:1/1.0-1-1"), Flavor::empty());
        let cs_b = NewTroveCs::new_absolute("foo:runtime", v("/example.com@ns:1/1.0-1-1"), Flavor::empty());
        let a = Changeset { troves: vec![cs_a], ..Default::default() };
        let b = Changeset { troves: vec![cs_b], ..Default::default() };
        assert!(Changeset::merge(&a, &b).is_err());
    }

    #[test]
    fn test_merge_combines_disjoint_changesets() {
        let cs_a = NewTroveCs::new_absolute("foo:runtime", v("/example.com@ns:1/1.0-1-1"), Flavor::empty());
        let cs_b = NewTroveCs::new_absolute("bar:runtime", v("/example.com@ns:1/1.0-1-1"), Flavor::empty());
        let a = Changeset { troves: vec![cs_a], ..Default::default() };
        let b = Changeset { troves: vec![cs_b], ..Default::default() };
        let merged = Changeset::merge(&a, &b).unwrap();
        assert_eq!(merged.troves.len(), 2);
    }

    #[test]
    fn test_diff_streams_roundtrip() {
        let old = b"old file content here";
        let new = b"new file content there";
        let content = diff_streams(old, new);
        let applied = apply_diff(old, &content).unwrap();
        assert_eq!(applied, new);
    }

    #[test]
    fn test_to_wire_contains_header() {
        let cs = NewTroveCs::new_absolute("foo:runtime", v("/example.com@ns:1/1.0-1-1"), Flavor::empty());
        let changeset = Changeset { troves: vec![cs], ..Default::default() };
        let wire = changeset.to_wire();
        assert!(wire.starts_with("SRS PKG ABSTRACT"));
    }
}
