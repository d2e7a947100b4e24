// src/clone.rs

//! Clone a trove onto a new branch: same revision and file manifest,
//! re-rooted to a different label chain, with `cloned_from` recording
//! where it came from. Grounded on `clone.py`'s `CloneTrove` flow
//! (findTroves → createCloneChangeSet → commit), minus the remote
//! transport and interactive confirmation the CLI wraps around it.

use crate::db::store::get_trove;
use crate::error::{Error, Result};
use crate::label::Branch;
use crate::trove::Trove;
use crate::version::Version;
use rusqlite::Connection;
use std::collections::HashMap;

/// `{updateBuildInfo, cloneSources, fullRecurse, infoOnly}` from §4.10.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneFlags {
    /// Rewrite `build_requires` entries to point at their cloned
    /// counterparts when the referenced source is itself being cloned
    /// in the same batch.
    pub update_build_info: bool,
    /// Recurse into `:source` components alongside their binaries.
    pub clone_sources: bool,
    /// Recurse through the full sub-trove graph, not just direct refs.
    pub full_recurse: bool,
    /// Report conflicts without committing.
    pub info_only: bool,
}

/// One requested clone: a source trove plus the branch to land it on.
#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub source: Trove,
    pub target_branch: Branch,
    pub final_timestamp: f64,
    pub flags: CloneFlags,
}

/// A label conflict: the target coordinates are already occupied by a
/// trove that did not come from this clone.
#[derive(Debug, Clone)]
pub struct LabelConflict {
    pub name: String,
    pub version: Version,
}

/// Reject names that are components other than `:source` — §4.10
/// clones whole packages/groups (and, when requested, their source
/// components), never individual binary components.
fn reject_component(name: &str) -> Result<()> {
    if let Some((_, tag)) = name.split_once(':') {
        if tag != "source" {
            return Err(Error::parse(format!(
                "clone rejects component '{name}': only packages, groups, and ':source' components may be cloned"
            )));
        }
    }
    Ok(())
}

/// Re-root `req.source` onto `req.target_branch`, keeping its revision
/// and file manifest, and stamping `cloned_from` with the original
/// version. Does not touch the store — callers persist the result
/// with `store::commit_trove` once satisfied there is no conflict.
pub fn clone_trove(req: &CloneRequest) -> Trove {
    let new_version = Version::new(
        req.target_branch.clone(),
        req.source.version.trailing_revision().clone(),
        req.final_timestamp,
    );
    let mut cloned = req.source.clone();
    cloned.version = new_version;
    cloned.cloned_from = Some(req.source.version.clone());
    cloned
}

/// Rewrite `trove.build_requires` entries that reference a source
/// being cloned in the same batch to point at its cloned version
/// instead, per `updateBuildInfo`. `rewritten` maps a source's
/// `(name, old_version)` to the version it was cloned to.
fn rewrite_build_info(trove: &mut Trove, rewritten: &HashMap<(String, Version), Version>) {
    for build_req in &mut trove.build_requires {
        if let Some(new_version) = rewritten.get(&(build_req.name.clone(), build_req.version.clone())) {
            build_req.version = new_version.clone();
        }
    }
}

/// Check every request against the store for a pre-existing instance
/// at the clone's target coordinates that was *not* itself cloned
/// from the same source — conary's label-conflict check, done before
/// any clone is committed rather than rolled back after.
pub fn check_label_conflicts(conn: &Connection, requests: &[CloneRequest]) -> Result<Vec<LabelConflict>> {
    let mut conflicts = Vec::new();
    for req in requests {
        reject_component(&req.source.name)?;
        let cloned = clone_trove(req);
        if let Some(existing) = get_trove(conn, &cloned.name, &cloned.version, &cloned.flavor)? {
            if existing.cloned_from.as_ref() != Some(&req.source.version) {
                conflicts.push(LabelConflict { name: cloned.name, version: cloned.version });
            }
        }
    }
    Ok(conflicts)
}

/// Clone every request, failing the whole batch if any target
/// coordinate conflicts with a trove not descended from the same
/// source. `info_only` requests never reach here with intent to
/// commit — callers check `check_label_conflicts` directly for a
/// dry run; this always clones and returns the results.
pub fn clone_batch(conn: &Connection, requests: &[CloneRequest]) -> Result<Vec<Trove>> {
    for req in requests {
        reject_component(&req.source.name)?;
    }

    let conflicts = check_label_conflicts(conn, requests)?;
    if !conflicts.is_empty() {
        return Err(Error::conflict(format!(
            "clone would create {} label conflict(s), starting with '{}'={}",
            conflicts.len(),
            conflicts[0].name,
            conflicts[0].version
        )));
    }

    let mut cloned: Vec<Trove> = requests.iter().map(clone_trove).collect();

    let rewritten: HashMap<(String, Version), Version> = requests
        .iter()
        .zip(cloned.iter())
        .map(|(req, c)| ((req.source.name.clone(), req.source.version.clone()), c.version.clone()))
        .collect();
    for (req, trove) in requests.iter().zip(cloned.iter_mut()) {
        if req.flags.update_build_info {
            rewrite_build_info(trove, &rewritten);
        }
    }

    Ok(cloned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::SqliteDialect;
    use crate::db::schema;
    use crate::db::store::commit_trove;
    use crate::flavor::Flavor;
    use crate::label::Label;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_schema(&conn, &SqliteDialect).unwrap();
        conn
    }

    fn source_trove() -> Trove {
        Trove::new("foo", Version::parse("/example.com@ns:1/1.0-1-1").unwrap(), Flavor::empty())
    }

    fn req(source: Trove, target_branch: Branch) -> CloneRequest {
        CloneRequest { source, target_branch, final_timestamp: 5.0, flags: CloneFlags::default() }
    }

    #[test]
    fn test_clone_trove_preserves_revision_and_sets_cloned_from() {
        let source = source_trove();
        let target_branch = Branch::parse("/example.com@ns:2").unwrap();
        let req = req(source.clone(), target_branch);
        let cloned = clone_trove(&req);
        assert_eq!(cloned.version.trailing_revision(), source.version.trailing_revision());
        assert_eq!(cloned.version.trailing_label(), &Label::parse("example.com@ns:2").unwrap());
        assert_eq!(cloned.cloned_from, Some(source.version));
    }

    #[test]
    fn test_clone_batch_detects_conflict_with_unrelated_trove() {
        let conn = conn();
        let source = source_trove();
        let target_branch = Branch::parse("/example.com@ns:2").unwrap();
        let req = req(source.clone(), target_branch);

        // Pre-existing, unrelated trove already occupying the target coordinates.
        let mut unrelated = clone_trove(&req);
        unrelated.cloned_from = None;
        commit_trove(&conn, &unrelated).unwrap();

        let err = clone_batch(&conn, &[req]);
        assert!(err.is_err());
    }

    #[test]
    fn test_clone_batch_allows_reclone_from_same_source() {
        let conn = conn();
        let source = source_trove();
        let target_branch = Branch::parse("/example.com@ns:2").unwrap();
        let req = req(source.clone(), target_branch);
        let already_cloned = clone_trove(&req);
        commit_trove(&conn, &already_cloned).unwrap();

        assert!(clone_batch(&conn, &[req]).is_ok());
    }

    #[test]
    fn test_clone_rejects_non_source_component() {
        let conn = conn();
        let source =
            Trove::new("foo:runtime", Version::parse("/example.com@ns:1/1.0-1-1").unwrap(), Flavor::empty());
        let target_branch = Branch::parse("/example.com@ns:2").unwrap();
        let req = req(source, target_branch);
        assert!(clone_batch(&conn, &[req.clone()]).is_err());
        assert!(check_label_conflicts(&conn, &[req]).is_err());
    }

    #[test]
    fn test_clone_allows_source_component() {
        let conn = conn();
        let source =
            Trove::new("foo:source", Version::parse("/example.com@ns:1/1.0-1-1").unwrap(), Flavor::empty());
        let target_branch = Branch::parse("/example.com@ns:2").unwrap();
        let req = req(source, target_branch);
        assert!(clone_batch(&conn, &[req]).is_ok());
    }

    #[test]
    fn test_clone_batch_rewrites_build_info_when_requested() {
        let conn = conn();
        let target_branch = Branch::parse("/example.com@ns:2").unwrap();

        let build_source = source_trove();
        let mut build_req = req(build_source.clone(), target_branch.clone());
        build_req.flags.update_build_info = true;

        let mut package = Trove::new("bar", Version::parse("/example.com@ns:1/2.0-1-1").unwrap(), Flavor::empty());
        package.build_requires.push(crate::trove::SubTroveRef {
            name: build_source.name.clone(),
            version: build_source.version.clone(),
            flavor: Flavor::empty(),
            by_default: true,
            strong_ref: false,
        });
        let mut package_req = req(package, target_branch);
        package_req.flags.update_build_info = true;

        let cloned = clone_batch(&conn, &[build_req.clone(), package_req]).unwrap();
        let cloned_package = cloned.iter().find(|t| t.name == "bar").unwrap();
        let rewritten_ref = &cloned_package.build_requires[0];
        assert_eq!(rewritten_ref.version, clone_trove(&build_req).version);
    }
}
