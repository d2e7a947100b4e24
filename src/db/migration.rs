// src/db/migration.rs

//! Ordered major-version migration engine.
//!
//! Each step moves the database from `major` to `major + 1`; minor
//! bumps within a major are reserved for index-only changes that never
//! need a migration step. Grounded on the original server's
//! `SchemaMigration` class: numbered `MigrateTo_N` steps run in order,
//! each wrapped in one transaction, each reporting batch progress
//! through a sink instead of printing directly.

use crate::db::dialect::DialectProfile;
use crate::db::schema::{self, SchemaVersion, CURRENT_MAJOR, MIN_SUPPORTED_MAJOR};
use crate::error::{Error, Result};
use crate::hash::{hash_bytes, HashAlgorithm};
use crate::progress::ProgressSink;
use rusqlite::Connection;
use tracing::info;

type Step = fn(&Connection, &dyn ProgressSink) -> Result<()>;

/// Steps in ascending order; `STEPS[i]` migrates from major `13 + i`
/// to `13 + i + 1`.
const STEPS: &[Step] = &[migrate_to_14, migrate_to_15, migrate_to_16];

/// Bring the database forward to [`CURRENT_MAJOR`]. Returns the number
/// of steps actually applied. A never-versioned (freshly created)
/// database is stamped at the current version without running any
/// step, since `schema::create_schema` already built the current
/// layout directly.
pub fn migrate(conn: &Connection, dialect: &dyn DialectProfile, progress: &dyn ProgressSink) -> Result<usize> {
    let version = schema::get_version(conn, dialect)?;

    if version.major == 0 {
        schema::set_version(conn, dialect, SchemaVersion::CURRENT)?;
        return Ok(0);
    }
    if version.major < MIN_SUPPORTED_MAJOR {
        return Err(Error::SchemaVersionError(format!(
            "database major {} predates the oldest supported major {MIN_SUPPORTED_MAJOR}",
            version.major
        )));
    }
    if version.major > CURRENT_MAJOR {
        return Err(Error::SchemaVersionError(format!(
            "database major {} is newer than this build supports ({CURRENT_MAJOR})",
            version.major
        )));
    }

    let mut applied = 0;
    let mut major = version.major;
    while major < CURRENT_MAJOR {
        let step_idx = (major - MIN_SUPPORTED_MAJOR) as usize;
        let step = STEPS.get(step_idx).ok_or_else(|| {
            Error::MigrationError(format!("no migration step registered to move past major {major}"))
        })?;
        info!(from = major, to = major + 1, "running migration step");
        conn.execute_batch("BEGIN")?;
        match step(conn, progress).and_then(|_| {
            schema::set_version(conn, dialect, SchemaVersion::new(major + 1, 0))
        }) {
            Ok(()) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                conn.execute_batch("ROLLBACK").ok();
                return Err(Error::MigrationError(format!(
                    "migration to major {} failed, database left at major {major}: {e}",
                    major + 1
                )));
            }
        }
        major += 1;
        applied += 1;
    }
    rebuild_latest_cache(conn)?;
    Ok(applied)
}

/// Backfill `FileStreams.sha1` for any row it is missing, computed
/// from the stored frozen stream.
fn migrate_to_14(conn: &Connection, progress: &dyn ProgressSink) -> Result<()> {
    let mut stmt = conn.prepare("SELECT streamId, stream FROM FileStreams WHERE sha1 IS NULL")?;
    let rows: Vec<(i64, Vec<u8>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;
    progress.start(rows.len() as u64);
    let mut update = conn.prepare("UPDATE FileStreams SET sha1 = ?1 WHERE streamId = ?2")?;
    for (i, (stream_id, stream)) in rows.iter().enumerate() {
        let digest = hash_bytes(HashAlgorithm::Sha1, stream);
        update.execute(rusqlite::params![digest.as_bytes(), stream_id])?;
        progress.advance(1, &format!("backfilling sha1 ({}/{})", i + 1, rows.len()));
    }
    progress.finish("sha1 backfill complete");
    Ok(())
}

/// Deduplicate `TroveFiles` rows that share `(instance, path)` —
/// distinct `filePathId`s can still name the same `path` under
/// different `pathId`s — keeping the lexicographically smallest
/// `(streamId, versionId, pathId)`. `TroveFiles` carries no SQL-level
/// uniqueness on that pair — the store maintains it by always
/// delete-then-reinserting a trove's manifest on commit — so this step
/// repairs whatever pre-existing duplicates a legacy database still
/// carries from before that discipline was in place.
fn migrate_to_15(conn: &Connection, progress: &dyn ProgressSink) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT tf.instanceId, fp.path, tf.streamId, tf.versionId, tf.filePathId, fp.pathId \
         FROM TroveFiles tf JOIN FilePaths fp ON fp.filePathId = tf.filePathId",
    )?;
    let rows: Vec<(i64, String, i64, i64, i64, String)> = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut groups: std::collections::HashMap<(i64, String), Vec<(i64, i64, i64, String)>> =
        std::collections::HashMap::new();
    for (instance_id, path, stream_id, version_id, file_path_id, path_id) in rows {
        groups.entry((instance_id, path)).or_default().push((stream_id, version_id, file_path_id, path_id));
    }

    let dupes: Vec<_> = groups.into_iter().filter(|(_, rows)| rows.len() > 1).collect();
    let total = dupes.len();
    progress.start(total as u64);
    let mut delete = conn.prepare(
        "DELETE FROM TroveFiles WHERE instanceId = ?1 AND streamId = ?2 AND versionId = ?3 AND filePathId = ?4",
    )?;
    for (i, ((instance_id, _path), mut rows)) in dupes.into_iter().enumerate() {
        rows.sort_by(|a, b| (a.0, a.1, &a.3).cmp(&(b.0, b.1, &b.3)));
        for (stream_id, version_id, file_path_id, _) in rows.into_iter().skip(1) {
            delete.execute(rusqlite::params![instance_id, stream_id, version_id, file_path_id])?;
        }
        progress.advance(1, &format!("deduplicating TroveFiles ({}/{})", i + 1, total));
    }
    progress.finish("TroveFiles dedup complete");
    Ok(())
}

/// Strip `Provides` rows from redirect instances (`troveType = 1`):
/// a redirect has nothing to provide, and older repositories sometimes
/// carried stale rows from before the redirect was created.
fn migrate_to_16(conn: &Connection, progress: &dyn ProgressSink) -> Result<()> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM Provides WHERE instanceId IN (SELECT instanceId FROM Instances WHERE troveType = 1)",
        [],
        |row| row.get(0),
    )?;
    progress.start(count as u64);
    conn.execute(
        "DELETE FROM Provides WHERE instanceId IN (SELECT instanceId FROM Instances WHERE troveType = 1)",
        [],
    )?;
    progress.finish("redirect Provides stripped");
    Ok(())
}

/// Discriminator for `LatestCache.latestType`, mirroring the three
/// passes the original `rebuildLatest` makes over the instance graph.
const LATEST_TYPE_ANY: i64 = 0;
const LATEST_TYPE_PRESENT: i64 = 1;
const LATEST_TYPE_NORMAL: i64 = 2;

/// Recompute `LatestCache` from scratch: for every `(item, branch,
/// flavor)`, the highest-versioned instance under each of the three
/// visibility passes (ANY instance, PRESENT-only, NORMAL-type-only).
/// A DELETE-then-INSERT pass, not an incremental update, matching the
/// original `rebuildLatest(db, recreate=False)`.
pub fn rebuild_latest_cache(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM LatestCache", [])?;

    for (latest_type, predicate) in [
        (LATEST_TYPE_ANY, "1=1"),
        (LATEST_TYPE_PRESENT, "i.isPresent = 1"),
        (LATEST_TYPE_NORMAL, "i.isPresent = 1 AND i.troveType = 0"),
    ] {
        let sql = format!(
            "INSERT INTO LatestCache (itemId, branchId, flavorId, versionId, latestType) \
             SELECT n.itemId, n.branchId, i.flavorId, MAX(n.versionId), {latest_type} \
             FROM Instances i \
             JOIN Nodes n ON n.itemId = i.itemId AND n.versionId = i.versionId \
             WHERE {predicate} \
             GROUP BY n.itemId, n.branchId, i.flavorId"
        );
        conn.execute(&sql, [])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::SqliteDialect;
    use crate::progress::SilentSink;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_schema(&conn, &SqliteDialect).unwrap();
        conn
    }

    #[test]
    fn test_fresh_database_is_stamped_current_without_steps() {
        let conn = conn();
        let dialect = SqliteDialect;
        let progress = SilentSink::new();
        let applied = migrate(&conn, &dialect, &progress).unwrap();
        assert_eq!(applied, 0);
        assert_eq!(schema::get_version(&conn, &dialect).unwrap(), SchemaVersion::CURRENT);
    }

    #[test]
    fn test_too_old_database_is_rejected() {
        let conn = conn();
        let dialect = SqliteDialect;
        schema::set_version(&conn, &dialect, SchemaVersion::new(1, 0)).unwrap();
        let progress = SilentSink::new();
        assert!(migrate(&conn, &dialect, &progress).is_err());
    }

    #[test]
    fn test_sha1_backfill_step_fills_null_rows() {
        let conn = conn();
        conn.execute(
            "INSERT INTO FileStreams (fileId, stream, sha1) VALUES (?1, ?2, NULL)",
            rusqlite::params![b"fid".to_vec(), b"streambytes".to_vec()],
        )
        .unwrap();
        let progress = SilentSink::new();
        migrate_to_14(&conn, &progress).unwrap();
        let sha1: Option<Vec<u8>> = conn
            .query_row("SELECT sha1 FROM FileStreams LIMIT 1", [], |row| row.get(0))
            .unwrap();
        assert!(sha1.is_some());
    }

    #[test]
    fn test_migrate_to_15_collapses_duplicate_path_under_distinct_path_ids() {
        let conn = conn();
        conn.execute("INSERT INTO FilePaths (filePathId, pathId, path) VALUES (1, 'a', '/bin/foo')", []).unwrap();
        conn.execute("INSERT INTO FilePaths (filePathId, pathId, path) VALUES (2, 'b', '/bin/foo')", []).unwrap();
        conn.execute("INSERT INTO Versions (versionId, version, finalTimestamp) VALUES (3, 'v3', 3.0)", []).unwrap();
        conn.execute("INSERT INTO FileStreams (streamId, fileId, stream) VALUES (7, X'07', X'07')", []).unwrap();
        conn.execute("INSERT INTO FileStreams (streamId, fileId, stream) VALUES (9, X'09', X'09')", []).unwrap();
        conn.execute(
            "INSERT INTO TroveFiles (instanceId, streamId, versionId, filePathId) VALUES (42, 9, 3, 2)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO TroveFiles (instanceId, streamId, versionId, filePathId) VALUES (42, 7, 3, 1)",
            [],
        )
        .unwrap();

        let progress = SilentSink::new();
        migrate_to_15(&conn, &progress).unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM TroveFiles WHERE instanceId = 42", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
        let kept_stream: i64 = conn.query_row("SELECT streamId FROM TroveFiles WHERE instanceId = 42", [], |r| r.get(0)).unwrap();
        assert_eq!(kept_stream, 7);
    }

    #[test]
    fn test_rebuild_latest_cache_picks_highest_version() {
        let conn = conn();
        conn.execute("INSERT INTO Items (itemId, item) VALUES (1, 'foo:runtime')", []).unwrap();
        conn.execute("INSERT INTO Branches (branchId, branch) VALUES (1, '/host@ns:1')", []).unwrap();
        conn.execute("INSERT INTO Flavors (flavorId, flavor) VALUES (1, '')", []).unwrap();
        conn.execute("INSERT INTO Versions (versionId, version, finalTimestamp) VALUES (1, 'v1', 1.0)", []).unwrap();
        conn.execute("INSERT INTO Versions (versionId, version, finalTimestamp) VALUES (2, 'v2', 2.0)", []).unwrap();
        conn.execute(
            "INSERT INTO Nodes (nodeId, itemId, branchId, versionId, finalTimestamp) VALUES (1, 1, 1, 1, 1.0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO Nodes (nodeId, itemId, branchId, versionId, finalTimestamp) VALUES (2, 1, 1, 2, 2.0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO Instances (instanceId, itemId, versionId, flavorId, isPresent, troveType) VALUES (1, 1, 1, 1, 1, 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO Instances (instanceId, itemId, versionId, flavorId, isPresent, troveType) VALUES (2, 1, 2, 1, 1, 0)",
            [],
        )
        .unwrap();
        rebuild_latest_cache(&conn).unwrap();
        let latest: i64 = conn
            .query_row(
                "SELECT versionId FROM LatestCache WHERE latestType = 2",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(latest, 2);
    }
}
