// src/db/schema.rs

//! Declarative schema catalog: every table this repository needs,
//! created idempotently, plus the `DatabaseVersion` bookkeeping the
//! migration engine drives.

use crate::db::dialect::DialectProfile;
use crate::error::Result;
use rusqlite::Connection;
use tracing::debug;

/// The schema version this build of the crate understands.
pub const CURRENT_MAJOR: i64 = 16;
pub const CURRENT_MINOR: i64 = 0;

/// Databases older than this cannot be migrated forward at all.
pub const MIN_SUPPORTED_MAJOR: i64 = 13;

/// `(major, minor)` schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaVersion {
    pub major: i64,
    pub minor: i64,
}

impl SchemaVersion {
    pub const CURRENT: SchemaVersion = SchemaVersion { major: CURRENT_MAJOR, minor: CURRENT_MINOR };

    pub fn new(major: i64, minor: i64) -> Self {
        Self { major, minor }
    }
}

/// One table's CREATE statement plus the indexes that go with it.
/// `name` drives the `tableExists` idempotence check — DDL is skipped
/// entirely once the table is present, matching the original catalog's
/// "reflect, then skip" behavior rather than relying on `IF NOT
/// EXISTS` alone (index statements need the same guard).
struct TableDef {
    name: &'static str,
    create: &'static str,
    indexes: &'static [&'static str],
}

const TABLES: &[TableDef] = &[
    TableDef {
        name: "Items",
        create: "CREATE TABLE Items (itemId INTEGER PRIMARY KEY, item TEXT UNIQUE NOT NULL)",
        indexes: &[],
    },
    TableDef {
        name: "Versions",
        create: "CREATE TABLE Versions (versionId INTEGER PRIMARY KEY, version TEXT UNIQUE NOT NULL, \
                  finalTimestamp REAL NOT NULL)",
        indexes: &[],
    },
    TableDef {
        name: "Flavors",
        create: "CREATE TABLE Flavors (flavorId INTEGER PRIMARY KEY, flavor TEXT UNIQUE NOT NULL)",
        indexes: &[],
    },
    TableDef {
        name: "Branches",
        create: "CREATE TABLE Branches (branchId INTEGER PRIMARY KEY, branch TEXT UNIQUE NOT NULL)",
        indexes: &[],
    },
    TableDef {
        name: "Nodes",
        create: "CREATE TABLE Nodes (nodeId INTEGER PRIMARY KEY, itemId INTEGER NOT NULL REFERENCES Items(itemId), \
                  branchId INTEGER NOT NULL REFERENCES Branches(branchId), \
                  versionId INTEGER NOT NULL REFERENCES Versions(versionId), \
                  finalTimestamp REAL NOT NULL, \
                  UNIQUE(itemId, versionId))",
        indexes: &["CREATE INDEX NodesBranchIdx ON Nodes(itemId, branchId)"],
    },
    TableDef {
        name: "Instances",
        create: "CREATE TABLE Instances (instanceId INTEGER PRIMARY KEY, itemId INTEGER NOT NULL REFERENCES Items(itemId), \
                  versionId INTEGER NOT NULL REFERENCES Versions(versionId), \
                  flavorId INTEGER NOT NULL REFERENCES Flavors(flavorId), \
                  isPresent INTEGER NOT NULL DEFAULT 1, \
                  troveType INTEGER NOT NULL DEFAULT 0, \
                  clonedFromId INTEGER REFERENCES Versions(versionId), \
                  UNIQUE(itemId, versionId, flavorId))",
        indexes: &["CREATE INDEX InstancesItemIdx ON Instances(itemId)"],
    },
    TableDef {
        name: "FilePaths",
        create: "CREATE TABLE FilePaths (filePathId INTEGER PRIMARY KEY, pathId TEXT NOT NULL, path TEXT NOT NULL, \
                  UNIQUE(pathId, path))",
        indexes: &[],
    },
    TableDef {
        name: "FileStreams",
        create: "CREATE TABLE FileStreams (streamId INTEGER PRIMARY KEY, fileId BLOB UNIQUE NOT NULL, \
                  stream BLOB NOT NULL, sha1 BLOB)",
        indexes: &[],
    },
    TableDef {
        name: "TroveFiles",
        // No UNIQUE(instanceId, filePathId) at the SQL level: the store
        // maintains that invariant itself (delete-then-reinsert on
        // every commit), and migrate_to_15 exists precisely to repair
        // legacy databases where it was violated before the store did.
        create: "CREATE TABLE TroveFiles (instanceId INTEGER NOT NULL REFERENCES Instances(instanceId), \
                  streamId INTEGER NOT NULL REFERENCES FileStreams(streamId), \
                  versionId INTEGER NOT NULL REFERENCES Versions(versionId), \
                  filePathId INTEGER NOT NULL REFERENCES FilePaths(filePathId))",
        indexes: &["CREATE INDEX TroveFilesInstanceIdx ON TroveFiles(instanceId)"],
    },
    TableDef {
        name: "Dependencies",
        create: "CREATE TABLE Dependencies (depId INTEGER PRIMARY KEY, class TEXT NOT NULL, name TEXT NOT NULL, \
                  flags TEXT NOT NULL, UNIQUE(class, name, flags))",
        indexes: &[],
    },
    TableDef {
        name: "Provides",
        create: "CREATE TABLE Provides (instanceId INTEGER NOT NULL REFERENCES Instances(instanceId), \
                  depId INTEGER NOT NULL REFERENCES Dependencies(depId), \
                  UNIQUE(instanceId, depId))",
        indexes: &["CREATE INDEX ProvidesInstanceIdx ON Provides(instanceId)"],
    },
    TableDef {
        name: "Requires",
        create: "CREATE TABLE Requires (instanceId INTEGER NOT NULL REFERENCES Instances(instanceId), \
                  depId INTEGER NOT NULL REFERENCES Dependencies(depId), \
                  UNIQUE(instanceId, depId))",
        indexes: &["CREATE INDEX RequiresInstanceIdx ON Requires(instanceId)"],
    },
    TableDef {
        name: "LabelMap",
        create: "CREATE TABLE LabelMap (itemId INTEGER NOT NULL REFERENCES Items(itemId), \
                  labelId INTEGER NOT NULL, branchId INTEGER NOT NULL REFERENCES Branches(branchId), \
                  UNIQUE(itemId, labelId, branchId))",
        indexes: &[],
    },
    TableDef {
        name: "LatestCache",
        create: "CREATE TABLE LatestCache (itemId INTEGER NOT NULL REFERENCES Items(itemId), \
                  branchId INTEGER NOT NULL REFERENCES Branches(branchId), \
                  flavorId INTEGER NOT NULL REFERENCES Flavors(flavorId), \
                  versionId INTEGER NOT NULL REFERENCES Versions(versionId), \
                  latestType INTEGER NOT NULL, \
                  UNIQUE(itemId, branchId, flavorId, latestType))",
        indexes: &[],
    },
    TableDef {
        name: "Roles",
        create: "CREATE TABLE Roles (roleId INTEGER PRIMARY KEY, role TEXT UNIQUE NOT NULL, \
                  isAdmin INTEGER NOT NULL DEFAULT 0)",
        indexes: &[],
    },
    TableDef {
        name: "Permissions",
        create: "CREATE TABLE Permissions (permissionId INTEGER PRIMARY KEY, roleId INTEGER NOT NULL REFERENCES Roles(roleId), \
                  labelPattern TEXT NOT NULL, itemPattern TEXT NOT NULL, \
                  canWrite INTEGER NOT NULL DEFAULT 0, canRemove INTEGER NOT NULL DEFAULT 0)",
        indexes: &[],
    },
    TableDef {
        name: "CheckTroveCache",
        create: "CREATE TABLE CheckTroveCache (patternItemId INTEGER NOT NULL, itemId INTEGER NOT NULL REFERENCES Items(itemId), \
                  UNIQUE(patternItemId, itemId))",
        indexes: &[],
    },
    TableDef {
        name: "RoleInstanceCache",
        create: "CREATE TABLE RoleInstanceCache (roleId INTEGER NOT NULL REFERENCES Roles(roleId), \
                  instanceId INTEGER NOT NULL REFERENCES Instances(instanceId), \
                  canWrite INTEGER NOT NULL DEFAULT 0, canRemove INTEGER NOT NULL DEFAULT 0, \
                  UNIQUE(roleId, instanceId))",
        indexes: &["CREATE INDEX RoleInstanceCacheRoleIdx ON RoleInstanceCache(roleId)"],
    },
    TableDef {
        name: "CommitLock",
        create: "CREATE TABLE CommitLock (lockId INTEGER PRIMARY KEY CHECK (lockId = 1))",
        indexes: &[],
    },
    TableDef {
        name: "LatestMirror",
        create: "CREATE TABLE LatestMirror (mark REAL NOT NULL)",
        indexes: &[],
    },
];

/// Create every table and index in the catalog that does not already
/// exist. Calling this twice in a row is a no-op on the second call:
/// each definition is guarded by `tableExists`, not just `IF NOT
/// EXISTS`, so repeated calls never re-touch a table already present.
pub fn create_schema(conn: &Connection, dialect: &dyn DialectProfile) -> Result<()> {
    for table in TABLES {
        if dialect.table_exists(conn, table.name)? {
            continue;
        }
        debug!(table = table.name, "creating table");
        conn.execute(table.create, [])?;
        for index in table.indexes {
            conn.execute(index, [])?;
        }
    }
    create_database_version_table(conn, dialect)?;
    // CommitLock's single row is part of the schema, not data: it
    // must exist before the store can take the advisory commit lock.
    conn.execute("INSERT OR IGNORE INTO CommitLock (lockId) VALUES (1)", [])?;
    Ok(())
}

fn create_database_version_table(conn: &Connection, dialect: &dyn DialectProfile) -> Result<()> {
    if dialect.table_exists(conn, "DatabaseVersion")? {
        return Ok(());
    }
    conn.execute(
        "CREATE TABLE DatabaseVersion (major INTEGER NOT NULL, minor INTEGER NOT NULL)",
        [],
    )?;
    Ok(())
}

/// Read the current schema version. An empty or absent
/// `DatabaseVersion` table is version `(0, 0)`; a legacy single-column
/// layout (no `minor` column) is treated as `(major, 0)` per the open
/// question in the design notes.
pub fn get_version(conn: &Connection, dialect: &dyn DialectProfile) -> Result<SchemaVersion> {
    if !dialect.table_exists(conn, "DatabaseVersion")? {
        return Ok(SchemaVersion::new(0, 0));
    }
    let columns = dialect.table_columns(conn, "DatabaseVersion")?;
    let has_minor = columns.iter().any(|c| c.eq_ignore_ascii_case("minor"));

    if has_minor {
        let row = conn
            .query_row("SELECT major, minor FROM DatabaseVersion LIMIT 1", [], |row| {
                Ok(SchemaVersion::new(row.get(0)?, row.get(1)?))
            })
            .ok();
        Ok(row.unwrap_or(SchemaVersion::new(0, 0)))
    } else {
        let major: Option<i64> = conn.query_row("SELECT major FROM DatabaseVersion LIMIT 1", [], |row| row.get(0)).ok();
        Ok(SchemaVersion::new(major.unwrap_or(0), 0))
    }
}

/// Set the schema version, auto-upgrading a legacy single-column table
/// to the two-column form on first write.
pub fn set_version(conn: &Connection, dialect: &dyn DialectProfile, version: SchemaVersion) -> Result<()> {
    let columns = dialect.table_columns(conn, "DatabaseVersion")?;
    let has_minor = columns.iter().any(|c| c.eq_ignore_ascii_case("minor"));
    if !has_minor && !columns.is_empty() {
        conn.execute("ALTER TABLE DatabaseVersion ADD COLUMN minor INTEGER NOT NULL DEFAULT 0", [])?;
    }
    conn.execute("DELETE FROM DatabaseVersion", [])?;
    conn.execute(
        "INSERT INTO DatabaseVersion (major, minor) VALUES (?1, ?2)",
        rusqlite::params![version.major, version.minor],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::SqliteDialect;

    fn conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_create_schema_is_idempotent() {
        let conn = conn();
        let dialect = SqliteDialect;
        create_schema(&conn, &dialect).unwrap();
        let count_before: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table'", [], |r| r.get(0))
            .unwrap();
        create_schema(&conn, &dialect).unwrap();
        let count_after: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count_before, count_after);
    }

    #[test]
    fn test_empty_database_is_version_zero() {
        let conn = conn();
        let dialect = SqliteDialect;
        create_schema(&conn, &dialect).unwrap();
        assert_eq!(get_version(&conn, &dialect).unwrap(), SchemaVersion::new(0, 0));
    }

    #[test]
    fn test_set_and_get_version_roundtrip() {
        let conn = conn();
        let dialect = SqliteDialect;
        create_schema(&conn, &dialect).unwrap();
        set_version(&conn, &dialect, SchemaVersion::new(15, 2)).unwrap();
        assert_eq!(get_version(&conn, &dialect).unwrap(), SchemaVersion::new(15, 2));
    }

    #[test]
    fn test_legacy_single_column_is_treated_as_minor_zero() {
        let conn = conn();
        conn.execute("CREATE TABLE DatabaseVersion (major INTEGER NOT NULL)", []).unwrap();
        conn.execute("INSERT INTO DatabaseVersion (major) VALUES (13)", []).unwrap();
        let dialect = SqliteDialect;
        assert_eq!(get_version(&conn, &dialect).unwrap(), SchemaVersion::new(13, 0));
    }

    #[test]
    fn test_set_version_upgrades_legacy_table() {
        let conn = conn();
        conn.execute("CREATE TABLE DatabaseVersion (major INTEGER NOT NULL)", []).unwrap();
        conn.execute("INSERT INTO DatabaseVersion (major) VALUES (13)", []).unwrap();
        let dialect = SqliteDialect;
        set_version(&conn, &dialect, SchemaVersion::new(14, 0)).unwrap();
        assert_eq!(get_version(&conn, &dialect).unwrap(), SchemaVersion::new(14, 0));
    }
}
