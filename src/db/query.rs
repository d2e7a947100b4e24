// src/db/query.rs

//! `findTroves`: resolve `(name, versionSpec, flavorSpec)` requests
//! against the instance graph, honoring version and flavor filter
//! policies and an optional affinity flavor for best-match scoring.

use crate::error::{Error, Result};
use crate::flavor::Flavor;
use crate::version::Version;
use rusqlite::Connection;

/// How broadly to search the version axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionFilter {
    /// Every matching instance, regardless of branch position.
    All,
    /// The branch maximum: instances at the highest version seen on
    /// each branch, across all flavors. Distinct from `Leaves`, which
    /// keeps a maximum per `(branch, flavor)` instead.
    Latest,
    /// The latest instance per `(branch, flavor)`.
    Leaves,
}

/// How to narrow the flavor axis once candidates are gathered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlavorFilter {
    /// Every flavor present.
    All,
    /// Only flavors the request's flavor spec is satisfied by.
    Avail,
    /// The single best-scoring flavor (ties broken by version-descending order).
    Best,
    /// Only an exact string match against the request's flavor spec.
    Exact,
}

#[derive(Debug, Clone)]
pub struct FindTrovesOptions {
    pub version_filter: VersionFilter,
    pub flavor_filter: FlavorFilter,
    /// Affinity flavor: when set, `Best` scores against this flavor
    /// instead of the bare request flavor, biasing towards whatever
    /// is already installed.
    pub affinity: Option<Flavor>,
}

impl Default for FindTrovesOptions {
    fn default() -> Self {
        Self {
            version_filter: VersionFilter::Latest,
            flavor_filter: FlavorFilter::Best,
            affinity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TroveSpec {
    pub name: String,
    pub version: Version,
    pub flavor: Flavor,
}

/// Resolve `name` with optional `version_spec`/`flavor_spec` filters
/// against every present instance, per `options`.
pub fn find_troves(
    conn: &Connection,
    name: &str,
    version_spec: Option<&Version>,
    flavor_spec: Option<&Flavor>,
    options: &FindTrovesOptions,
) -> Result<Vec<TroveSpec>> {
    let mut stmt = conn.prepare(
        "SELECT v.version, f.flavor, n.branchId, v.finalTimestamp FROM Instances i \
         JOIN Items it ON it.itemId = i.itemId \
         JOIN Versions v ON v.versionId = i.versionId \
         JOIN Flavors f ON f.flavorId = i.flavorId \
         JOIN Nodes n ON n.itemId = i.itemId AND n.versionId = i.versionId \
         WHERE it.item = ?1 AND i.isPresent = 1",
    )?;
    let rows = stmt.query_map([name], |row| {
        let version_str: String = row.get(0)?;
        let flavor_str: String = row.get(1)?;
        let branch_id: i64 = row.get(2)?;
        let ts: f64 = row.get(3)?;
        Ok((version_str, flavor_str, branch_id, ts))
    })?;

    let mut candidates = Vec::new();
    for row in rows {
        let (version_str, flavor_str, branch_id, ts) = row?;
        let version = Version::thaw(&version_str)?;
        let flavor = Flavor::parse(&flavor_str)?;
        if let Some(vs) = version_spec {
            if !version.on_same_branch(vs) {
                continue;
            }
        }
        candidates.push((version, flavor, branch_id, ts));
    }

    if candidates.is_empty() {
        return Err(Error::not_found(format!("no instances of '{name}'")));
    }

    let candidates = apply_version_filter(candidates, options.version_filter);
    let specs = apply_flavor_filter(candidates, flavor_spec, options)?;

    if specs.is_empty() {
        return Err(Error::not_found(format!(
            "'{name}' has instances but none match the requested flavor"
        )));
    }
    Ok(specs.into_iter().map(|(version, flavor)| TroveSpec { name: name.to_string(), version, flavor }).collect())
}

type Candidate = (Version, Flavor, i64, f64);

fn apply_version_filter(mut candidates: Vec<Candidate>, filter: VersionFilter) -> Vec<Candidate> {
    match filter {
        VersionFilter::All => candidates,
        VersionFilter::Leaves => {
            // Group by (branchId, flavor) and keep only the highest
            // finalTimestamp in each group: the newest instance per
            // flavor on each branch.
            candidates.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal));
            let mut seen = std::collections::HashSet::new();
            candidates
                .into_iter()
                .filter(|(_, flavor, branch_id, _)| seen.insert((*branch_id, flavor.to_string())))
                .collect()
        }
        VersionFilter::Latest => {
            // The branch maximum across all flavors: keep only rows
            // whose timestamp equals the highest timestamp seen for
            // that branch, not the per-flavor highest.
            let mut branch_max: std::collections::HashMap<i64, f64> = std::collections::HashMap::new();
            for (_, _, branch_id, ts) in &candidates {
                let entry = branch_max.entry(*branch_id).or_insert(*ts);
                if *ts > *entry {
                    *entry = *ts;
                }
            }
            candidates.into_iter().filter(|(_, _, branch_id, ts)| *ts == branch_max[branch_id]).collect()
        }
    }
}

fn apply_flavor_filter(
    candidates: Vec<Candidate>,
    flavor_spec: Option<&Flavor>,
    options: &FindTrovesOptions,
) -> Result<Vec<(Version, Flavor)>> {
    match options.flavor_filter {
        FlavorFilter::All => Ok(candidates.into_iter().map(|(v, f, _, _)| (v, f)).collect()),
        FlavorFilter::Exact => {
            let spec = flavor_spec.cloned().unwrap_or_else(Flavor::empty);
            Ok(candidates
                .into_iter()
                .filter(|(_, f, _, _)| f.to_string() == spec.to_string())
                .map(|(v, f, _, _)| (v, f))
                .collect())
        }
        FlavorFilter::Avail => {
            let spec = flavor_spec.cloned().unwrap_or_else(Flavor::empty);
            Ok(candidates
                .into_iter()
                .filter(|(_, f, _, _)| spec.satisfies(f))
                .map(|(v, f, _, _)| (v, f))
                .collect())
        }
        FlavorFilter::Best => {
            let spec = options.affinity.clone().or_else(|| flavor_spec.cloned()).unwrap_or_else(Flavor::empty);
            best_flavor_match(candidates, &spec)
        }
    }
}

/// Score every candidate against `spec`, keep the top score, and
/// break ties by the first one encountered in version-descending
/// iteration order — the order candidates already arrive in from
/// `apply_version_filter`'s timestamp sort.
fn best_flavor_match(candidates: Vec<Candidate>, spec: &Flavor) -> Result<Vec<(Version, Flavor)>> {
    let mut best: Option<(i32, Version, Flavor)> = None;
    for (version, flavor, _, _) in candidates {
        let score = spec.score(&flavor);
        if score < 0 {
            continue;
        }
        let take = match &best {
            None => true,
            Some((best_score, _, _)) => score > *best_score,
        };
        if take {
            best = Some((score, version, flavor));
        }
    }
    Ok(best.into_iter().map(|(_, v, f)| (v, f)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::SqliteDialect;
    use crate::db::schema;
    use crate::db::store::{commit_trove, put_file_stream};
    use crate::hash::{hash_bytes, HashAlgorithm};
    use crate::trove::Trove;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_schema(&conn, &SqliteDialect).unwrap();
        conn
    }

    fn commit(conn: &Connection, version_str: &str, flavor_str: &str) {
        let version = Version::parse(version_str).unwrap();
        let flavor = Flavor::parse(flavor_str).unwrap();
        let trove = Trove::new("foo:runtime", version, flavor);
        commit_trove(conn, &trove).unwrap();
    }

    #[test]
    fn test_find_troves_latest_picks_newest_timestamp() {
        let conn = conn();
        commit(&conn, "/example.com@ns:1/1.0-1-1@1", "");
        commit(&conn, "/example.com@ns:1/2.0-1-1@2", "");
        let options = FindTrovesOptions::default();
        let found = find_troves(&conn, "foo:runtime", None, None, &options).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version.trailing_revision().to_string(), "2.0-1-1");
    }

    #[test]
    fn test_find_troves_all_returns_every_instance() {
        let conn = conn();
        commit(&conn, "/example.com@ns:1/1.0-1-1@1", "");
        commit(&conn, "/example.com@ns:1/2.0-1-1@2", "");
        let options = FindTrovesOptions { version_filter: VersionFilter::All, flavor_filter: FlavorFilter::All, affinity: None };
        let found = find_troves(&conn, "foo:runtime", None, None, &options).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_find_troves_missing_item_is_not_found() {
        let conn = conn();
        let options = FindTrovesOptions::default();
        assert!(find_troves(&conn, "nope:runtime", None, None, &options).is_err());
    }

    #[test]
    fn test_latest_is_branch_max_across_flavors_leaves_is_per_flavor() {
        let conn = conn();
        commit(&conn, "/example.com@ns:1/1.0-1-1@1", "ssl");
        commit(&conn, "/example.com@ns:1/2.0-1-1@2", "");

        let latest_opts = FindTrovesOptions { version_filter: VersionFilter::Latest, flavor_filter: FlavorFilter::All, affinity: None };
        let latest = find_troves(&conn, "foo:runtime", None, None, &latest_opts).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version.trailing_revision().to_string(), "2.0-1-1");

        let leaves_opts = FindTrovesOptions { version_filter: VersionFilter::Leaves, flavor_filter: FlavorFilter::All, affinity: None };
        let mut leaves = find_troves(&conn, "foo:runtime", None, None, &leaves_opts).unwrap();
        leaves.sort_by(|a, b| a.flavor.to_string().cmp(&b.flavor.to_string()));
        assert_eq!(leaves.len(), 2);
    }

    #[test]
    fn test_best_flavor_prefers_higher_score() {
        let conn = conn();
        commit(&conn, "/example.com@ns:1/1.0-1-1@1", "ssl");
        commit(&conn, "/example.com@ns:1/1.0-1-2@1", "ssl,static");
        let spec = Flavor::parse("ssl,static").unwrap();
        let options = FindTrovesOptions { version_filter: VersionFilter::All, flavor_filter: FlavorFilter::Best, affinity: None };
        let found = find_troves(&conn, "foo:runtime", None, Some(&spec), &options).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].flavor.to_string(), "[ssl, static]");
    }
}
