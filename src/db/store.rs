// src/db/store.rs

//! Transactional CRUD: commit a changeset, fetch a trove, walk the
//! instance graph, fetch file contents, and the soft-delete/hide
//! operations a repository exposes over the archive.

use crate::changeset::{Changeset, NewTroveCs};
use crate::deps::{DepClass, Dependency, DependencySet};
use crate::error::{Error, Result};
use crate::flavor::Flavor;
use crate::hash::Hash;
use crate::label::Branch;
use crate::trove::{Trove, TroveFile, TroveType};
use crate::version::Version;
use rusqlite::{params, Connection, OptionalExtension};

fn trove_type_code(t: TroveType) -> i64 {
    match t {
        TroveType::Normal => 0,
        TroveType::Redirect => 1,
        TroveType::Removed => 2,
    }
}

fn trove_type_from_code(code: i64) -> TroveType {
    match code {
        1 => TroveType::Redirect,
        2 => TroveType::Removed,
        _ => TroveType::Normal,
    }
}

fn get_or_create_item(conn: &Connection, name: &str) -> Result<i64> {
    if let Some(id) = conn
        .query_row("SELECT itemId FROM Items WHERE item = ?1", [name], |r| r.get(0))
        .optional()?
    {
        return Ok(id);
    }
    conn.execute("INSERT INTO Items (item) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

fn get_or_create_branch(conn: &Connection, branch: &Branch) -> Result<i64> {
    let frozen = branch.to_string();
    if let Some(id) = conn
        .query_row("SELECT branchId FROM Branches WHERE branch = ?1", [&frozen], |r| r.get(0))
        .optional()?
    {
        return Ok(id);
    }
    conn.execute("INSERT INTO Branches (branch) VALUES (?1)", [&frozen])?;
    Ok(conn.last_insert_rowid())
}

fn get_or_create_version(conn: &Connection, version: &Version) -> Result<i64> {
    let frozen = version.freeze();
    if let Some(id) = conn
        .query_row("SELECT versionId FROM Versions WHERE version = ?1", [&frozen], |r| r.get(0))
        .optional()?
    {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO Versions (version, finalTimestamp) VALUES (?1, ?2)",
        params![frozen, version.final_timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn get_or_create_flavor(conn: &Connection, flavor: &Flavor) -> Result<i64> {
    let frozen = flavor.to_string();
    if let Some(id) = conn
        .query_row("SELECT flavorId FROM Flavors WHERE flavor = ?1", [&frozen], |r| r.get(0))
        .optional()?
    {
        return Ok(id);
    }
    conn.execute("INSERT INTO Flavors (flavor) VALUES (?1)", [&frozen])?;
    Ok(conn.last_insert_rowid())
}

fn get_or_create_node(conn: &Connection, item_id: i64, branch_id: i64, version_id: i64, ts: f64) -> Result<i64> {
    if let Some(id) = conn
        .query_row(
            "SELECT nodeId FROM Nodes WHERE itemId = ?1 AND versionId = ?2",
            params![item_id, version_id],
            |r| r.get(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO Nodes (itemId, branchId, versionId, finalTimestamp) VALUES (?1, ?2, ?3, ?4)",
        params![item_id, branch_id, version_id, ts],
    )?;
    Ok(conn.last_insert_rowid())
}

fn get_or_create_dependency(conn: &Connection, dep: &Dependency) -> Result<i64> {
    let flags: Vec<&str> = dep.flags.iter().map(|s| s.as_str()).collect();
    let flags_joined = flags.join(",");
    let class = dep.class.prefix();
    if let Some(id) = conn
        .query_row(
            "SELECT depId FROM Dependencies WHERE class = ?1 AND name = ?2 AND flags = ?3",
            params![class, dep.name, flags_joined],
            |r| r.get(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO Dependencies (class, name, flags) VALUES (?1, ?2, ?3)",
        params![class, dep.name, flags_joined],
    )?;
    Ok(conn.last_insert_rowid())
}

fn load_dependency(conn: &Connection, dep_id: i64) -> Result<Dependency> {
    let (class_str, name, flags_joined): (String, String, String) = conn.query_row(
        "SELECT class, name, flags FROM Dependencies WHERE depId = ?1",
        [dep_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    let class = DepClass::from_prefix(&class_str)?;
    let flags: Vec<String> = if flags_joined.is_empty() {
        Vec::new()
    } else {
        flags_joined.split(',').map(|s| s.to_string()).collect()
    };
    Ok(Dependency::new(class, name, flags))
}

/// Insert or look up an instance row identified by `(item, version,
/// flavor)`. Does not touch files, dependencies, or the node graph —
/// callers build those up separately as part of a changeset commit.
fn get_or_create_instance(
    conn: &Connection,
    item_id: i64,
    version_id: i64,
    flavor_id: i64,
    trove_type: TroveType,
    cloned_from_id: Option<i64>,
) -> Result<i64> {
    if let Some(id) = conn
        .query_row(
            "SELECT instanceId FROM Instances WHERE itemId = ?1 AND versionId = ?2 AND flavorId = ?3",
            params![item_id, version_id, flavor_id],
            |r| r.get(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO Instances (itemId, versionId, flavorId, isPresent, troveType, clonedFromId) \
         VALUES (?1, ?2, ?3, 1, ?4, ?5)",
        params![item_id, version_id, flavor_id, trove_type_code(trove_type), cloned_from_id],
    )?;
    Ok(conn.last_insert_rowid())
}

fn get_or_create_file_path(conn: &Connection, path_id: &str, path: &str) -> Result<i64> {
    if let Some(id) = conn
        .query_row(
            "SELECT filePathId FROM FilePaths WHERE pathId = ?1 AND path = ?2",
            params![path_id, path],
            |r| r.get(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    conn.execute("INSERT INTO FilePaths (pathId, path) VALUES (?1, ?2)", params![path_id, path])?;
    Ok(conn.last_insert_rowid())
}

/// Store (or find) a file-stream row keyed by `fileId`. The stream
/// bytes themselves are the caller's responsibility — the store only
/// persists whatever blob it is handed, typically the frozen
/// `FileStream`.
pub fn put_file_stream(conn: &Connection, file_id: &Hash, stream: &[u8]) -> Result<i64> {
    if let Some(id) = conn
        .query_row(
            "SELECT streamId FROM FileStreams WHERE fileId = ?1",
            [file_id.as_bytes()],
            |r| r.get(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    let sha1 = crate::hash::hash_bytes(crate::hash::HashAlgorithm::Sha1, stream);
    conn.execute(
        "INSERT INTO FileStreams (fileId, stream, sha1) VALUES (?1, ?2, ?3)",
        params![file_id.as_bytes(), stream, sha1.as_bytes()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_file_contents(conn: &Connection, file_id: &Hash) -> Result<Vec<u8>> {
    conn.query_row(
        "SELECT stream FROM FileStreams WHERE fileId = ?1",
        [file_id.as_bytes()],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("no file stream for fileId {file_id}")))
}

/// Commit one `NewTroveCs` against an optional basis trove, persisting
/// the resulting trove's full state (manifest, deps, sub-troves).
/// Runs inside the caller's transaction — `commit_changeset` below is
/// the entry point that opens one.
fn commit_trove_cs(conn: &Connection, basis: Option<&Trove>, trove_cs: &NewTroveCs) -> Result<i64> {
    let resulting = Changeset::default().apply(basis, trove_cs)?;
    commit_trove(conn, &resulting)
}

/// Persist a fully-materialized `Trove` as a new instance, including
/// its file manifest and dependency sets. Idempotent on `(item,
/// version, flavor)` — recommitting the same coordinates updates the
/// manifest in place rather than erroring, since troves frequently
/// get recommitted with more signatures attached.
pub fn commit_trove(conn: &Connection, trove: &Trove) -> Result<i64> {
    let item_id = get_or_create_item(conn, &trove.name)?;
    let branch_id = get_or_create_branch(conn, trove.version.branch())?;
    let version_id = get_or_create_version(conn, &trove.version)?;
    let flavor_id = get_or_create_flavor(conn, &trove.flavor)?;
    let cloned_from_id = trove
        .cloned_from
        .as_ref()
        .map(|v| get_or_create_version(conn, v))
        .transpose()?;

    get_or_create_node(conn, item_id, branch_id, version_id, trove.version.final_timestamp())?;
    let instance_id =
        get_or_create_instance(conn, item_id, version_id, flavor_id, trove.trove_type, cloned_from_id)?;

    conn.execute("DELETE FROM TroveFiles WHERE instanceId = ?1", [instance_id])?;
    for file in trove.file_list() {
        let file_path_id = get_or_create_file_path(conn, &file.path_id, &file.path)?;
        let file_version_id = get_or_create_version(conn, &file.version)?;
        let stream_id: Option<i64> = conn
            .query_row(
                "SELECT streamId FROM FileStreams WHERE fileId = ?1",
                [file.file_id.as_bytes()],
                |r| r.get(0),
            )
            .optional()?;
        let stream_id = stream_id.ok_or_else(|| {
            Error::not_found(format!("fileId {} has no stored stream; call put_file_stream first", file.file_id))
        })?;
        conn.execute(
            "INSERT INTO TroveFiles (instanceId, streamId, versionId, filePathId) VALUES (?1, ?2, ?3, ?4)",
            params![instance_id, stream_id, file_version_id, file_path_id],
        )?;
    }

    replace_dep_set(conn, instance_id, "Provides", &trove.provides)?;
    replace_dep_set(conn, instance_id, "Requires", &trove.requires)?;

    Ok(instance_id)
}

fn replace_dep_set(conn: &Connection, instance_id: i64, table: &str, deps: &DependencySet) -> Result<()> {
    conn.execute(&format!("DELETE FROM {table} WHERE instanceId = ?1"), [instance_id])?;
    for dep in deps.iter() {
        let dep_id = get_or_create_dependency(conn, dep)?;
        conn.execute(
            &format!("INSERT OR IGNORE INTO {table} (instanceId, depId) VALUES (?1, ?2)"),
            params![instance_id, dep_id],
        )?;
    }
    Ok(())
}

/// Commit an entire changeset inside one transaction: every
/// constituent trove is applied and persisted, or none are.
pub fn commit_changeset(conn: &Connection, cs: &Changeset, basis_lookup: impl Fn(&NewTroveCs) -> Result<Option<Trove>>) -> Result<Vec<i64>> {
    conn.execute_batch("BEGIN")?;
    let mut ids = Vec::new();
    for trove_cs in &cs.troves {
        let basis = match basis_lookup(trove_cs) {
            Ok(b) => b,
            Err(e) => {
                conn.execute_batch("ROLLBACK").ok();
                return Err(e);
            }
        };
        match commit_trove_cs(conn, basis.as_ref(), trove_cs) {
            Ok(id) => ids.push(id),
            Err(e) => {
                conn.execute_batch("ROLLBACK").ok();
                return Err(e);
            }
        }
    }
    conn.execute_batch("COMMIT")?;
    Ok(ids)
}

/// Fetch a trove by exact `(name, version, flavor)` coordinates.
pub fn get_trove(conn: &Connection, name: &str, version: &Version, flavor: &Flavor) -> Result<Option<Trove>> {
    let item_id: Option<i64> = conn
        .query_row("SELECT itemId FROM Items WHERE item = ?1", [name], |r| r.get(0))
        .optional()?;
    let Some(item_id) = item_id else { return Ok(None) };
    let version_frozen = version.freeze();
    let version_id: Option<i64> = conn
        .query_row("SELECT versionId FROM Versions WHERE version = ?1", [&version_frozen], |r| r.get(0))
        .optional()?;
    let Some(version_id) = version_id else { return Ok(None) };
    let flavor_str = flavor.to_string();
    let flavor_id: Option<i64> = conn
        .query_row("SELECT flavorId FROM Flavors WHERE flavor = ?1", [&flavor_str], |r| r.get(0))
        .optional()?;
    let Some(flavor_id) = flavor_id else { return Ok(None) };

    let row: Option<(i64, i64, Option<i64>)> = conn
        .query_row(
            "SELECT instanceId, troveType, clonedFromId FROM Instances WHERE itemId = ?1 AND versionId = ?2 AND flavorId = ?3",
            params![item_id, version_id, flavor_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((instance_id, type_code, cloned_from_id)) = row else { return Ok(None) };

    let mut trove = Trove::new(name, Version::thaw(&version_frozen)?, Flavor::parse(&flavor_str)?);
    trove.trove_type = trove_type_from_code(type_code);
    if let Some(cf_id) = cloned_from_id {
        let frozen: String = conn.query_row("SELECT version FROM Versions WHERE versionId = ?1", [cf_id], |r| r.get(0))?;
        trove.cloned_from = Some(Version::thaw(&frozen)?);
    }

    let mut files_stmt = conn.prepare(
        "SELECT fp.pathId, fp.path, fs.fileId, v.version \
         FROM TroveFiles tf \
         JOIN FilePaths fp ON fp.filePathId = tf.filePathId \
         JOIN FileStreams fs ON fs.streamId = tf.streamId \
         JOIN Versions v ON v.versionId = tf.versionId \
         WHERE tf.instanceId = ?1",
    )?;
    let files = files_stmt.query_map([instance_id], |row| {
        let path_id: String = row.get(0)?;
        let path: String = row.get(1)?;
        let file_id_bytes: Vec<u8> = row.get(2)?;
        let version_str: String = row.get(3)?;
        Ok((path_id, path, file_id_bytes, version_str))
    })?;
    for file in files {
        let (path_id, path, file_id_bytes, version_str) = file?;
        let file_id = Hash::new(crate::hash::HashAlgorithm::Sha1, hex::encode(&file_id_bytes))
            .map_err(|e| Error::IntegrityError(e.to_string()))?;
        let file_version = Version::thaw(&version_str)?;
        trove.add_file(path_id, path, file_id, file_version)?;
    }

    for dep_id in load_dep_ids(conn, "Provides", instance_id)? {
        trove.provides.insert(load_dependency(conn, dep_id)?);
    }
    for dep_id in load_dep_ids(conn, "Requires", instance_id)? {
        trove.requires.insert(load_dependency(conn, dep_id)?);
    }

    Ok(Some(trove))
}

fn load_dep_ids(conn: &Connection, table: &str, instance_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(&format!("SELECT depId FROM {table} WHERE instanceId = ?1"))?;
    let ids = stmt.query_map([instance_id], |r| r.get(0))?.collect::<rusqlite::Result<_>>()?;
    Ok(ids)
}

/// All instances under one item (package name), newest-first.
pub fn iter_troves(conn: &Connection, name: &str) -> Result<Vec<(Version, Flavor)>> {
    let mut stmt = conn.prepare(
        "SELECT v.version, f.flavor FROM Instances i \
         JOIN Items it ON it.itemId = i.itemId \
         JOIN Versions v ON v.versionId = i.versionId \
         JOIN Flavors f ON f.flavorId = i.flavorId \
         WHERE it.item = ?1 AND i.isPresent = 1 \
         ORDER BY v.finalTimestamp DESC",
    )?;
    let rows = stmt.query_map([name], |row| {
        let version_str: String = row.get(0)?;
        let flavor_str: String = row.get(1)?;
        Ok((version_str, flavor_str))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (version_str, flavor_str) = row?;
        out.push((Version::thaw(&version_str)?, Flavor::parse(&flavor_str)?));
    }
    Ok(out)
}

/// Soft-delete: flip `isPresent` off. Still resolvable by exact
/// instance lookup, excluded from `findTroves` and the latest cache.
pub fn mark_removed(conn: &Connection, name: &str, version: &Version, flavor: &Flavor) -> Result<()> {
    set_present(conn, name, version, flavor, false)
}

pub fn hide_trove(conn: &Connection, name: &str, version: &Version, flavor: &Flavor) -> Result<()> {
    set_present(conn, name, version, flavor, false)
}

pub fn unhide_trove(conn: &Connection, name: &str, version: &Version, flavor: &Flavor) -> Result<()> {
    set_present(conn, name, version, flavor, true)
}

fn set_present(conn: &Connection, name: &str, version: &Version, flavor: &Flavor, present: bool) -> Result<()> {
    let version_frozen = version.freeze();
    let flavor_str = flavor.to_string();
    let changed = conn.execute(
        "UPDATE Instances SET isPresent = ?1 \
         WHERE itemId = (SELECT itemId FROM Items WHERE item = ?2) \
           AND versionId = (SELECT versionId FROM Versions WHERE version = ?3) \
           AND flavorId = (SELECT flavorId FROM Flavors WHERE flavor = ?4)",
        params![present as i64, name, version_frozen, flavor_str],
    )?;
    if changed == 0 {
        return Err(Error::not_found(format!("no instance {name}={version}[{flavor}]")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::SqliteDialect;
    use crate::db::schema;
    use crate::hash::{hash_bytes, HashAlgorithm};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_schema(&conn, &SqliteDialect).unwrap();
        conn
    }

    fn v() -> Version {
        Version::parse("/example.com@ns:1/1.0-1-1").unwrap()
    }

    #[test]
    fn test_commit_and_get_trove_roundtrip() {
        let conn = conn();
        let file_id = hash_bytes(HashAlgorithm::Sha1, b"stream-bytes");
        put_file_stream(&conn, &file_id, b"stream-bytes").unwrap();

        let mut trove = Trove::new("foo:runtime", v(), Flavor::empty());
        trove.add_file("P1", "/bin/foo", file_id.clone(), v()).unwrap();
        commit_trove(&conn, &trove).unwrap();

        let fetched = get_trove(&conn, "foo:runtime", &v(), &Flavor::empty()).unwrap().unwrap();
        assert_eq!(fetched.file_count(), 1);
        assert_eq!(fetched.file_list()[0].path, "/bin/foo");
    }

    #[test]
    fn test_get_trove_missing_returns_none() {
        let conn = conn();
        assert!(get_trove(&conn, "nope", &v(), &Flavor::empty()).unwrap().is_none());
    }

    #[test]
    fn test_mark_removed_hides_from_present_instances() {
        let conn = conn();
        let file_id = hash_bytes(HashAlgorithm::Sha1, b"x");
        put_file_stream(&conn, &file_id, b"x").unwrap();
        let trove = Trove::new("foo:runtime", v(), Flavor::empty());
        commit_trove(&conn, &trove).unwrap();

        mark_removed(&conn, "foo:runtime", &v(), &Flavor::empty()).unwrap();
        let present = conn
            .query_row("SELECT isPresent FROM Instances", [], |r| r.get::<_, i64>(0))
            .unwrap();
        assert_eq!(present, 0);
    }

    #[test]
    fn test_get_file_contents_roundtrip() {
        let conn = conn();
        let file_id = hash_bytes(HashAlgorithm::Sha1, b"hello");
        put_file_stream(&conn, &file_id, b"hello").unwrap();
        assert_eq!(get_file_contents(&conn, &file_id).unwrap(), b"hello");
    }
}
