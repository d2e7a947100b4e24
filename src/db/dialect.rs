// src/db/dialect.rs

//! `DialectProfile`: the single seam between the schema/store/migration
//! layers and a concrete SQL engine. Only a SQLite-backed profile
//! ships in this crate, but the catalog and migrations never call
//! `rusqlite` directly for anything dialect-sensitive — they go
//! through this trait so that the keyword-dict reflection the
//! original engine did (`%(BINARY20)s % self.db.keywords`) becomes a
//! typed method call instead of string-formatting a dict.

use rusqlite::Connection;

/// Portable column/table-option keywords a schema definition can ask
/// the driver to translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    PrimaryKey,
    AutoIncrement,
    Blob,
    PathType,
    Changed,
    TableOpts,
}

/// Translates portable schema keywords to dialect-specific SQL and
/// exposes the capability probes migrations need instead of
/// catching driver-specific "no such table" exceptions.
pub trait DialectProfile: Send + Sync {
    fn keyword(&self, kw: Keyword) -> &'static str;

    /// `BINARY(n)` fixed-width binary column declaration.
    fn binary(&self, n: usize) -> String;

    /// Capability probe replacing exception-based "does this table
    /// exist" control flow.
    fn table_exists(&self, conn: &Connection, name: &str) -> rusqlite::Result<bool>;

    /// Column names of an existing table, in declaration order; empty
    /// if the table does not exist. Used to detect the legacy
    /// single-column `DatabaseVersion` layout.
    fn table_columns(&self, conn: &Connection, name: &str) -> rusqlite::Result<Vec<String>>;
}

/// The only `DialectProfile` this core ships: bundled SQLite via
/// `rusqlite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl DialectProfile for SqliteDialect {
    fn keyword(&self, kw: Keyword) -> &'static str {
        match kw {
            Keyword::PrimaryKey => "INTEGER PRIMARY KEY",
            Keyword::AutoIncrement => "AUTOINCREMENT",
            Keyword::Blob => "BLOB",
            Keyword::PathType => "TEXT",
            Keyword::Changed => "TIMESTAMP DEFAULT CURRENT_TIMESTAMP",
            Keyword::TableOpts => "",
        }
    }

    fn binary(&self, n: usize) -> String {
        // SQLite has no fixed-width binary type; the column stays a
        // BLOB and length is a documentation-only hint.
        let _ = n;
        "BLOB".to_string()
    }

    fn table_exists(&self, conn: &Connection, name: &str) -> rusqlite::Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn table_columns(&self, conn: &Connection, name: &str) -> rusqlite::Result<Vec<String>> {
        if !self.table_exists(conn, name)? {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({name})"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_exists_probe() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE Foo (id INTEGER)", []).unwrap();
        let dialect = SqliteDialect;
        assert!(dialect.table_exists(&conn, "Foo").unwrap());
        assert!(!dialect.table_exists(&conn, "Bar").unwrap());
    }

    #[test]
    fn test_table_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE Foo (id INTEGER, name TEXT)", []).unwrap();
        let dialect = SqliteDialect;
        assert_eq!(dialect.table_columns(&conn, "Foo").unwrap(), vec!["id", "name"]);
        assert!(dialect.table_columns(&conn, "Missing").unwrap().is_empty());
    }
}
