// src/db/mod.rs

//! The storage engine: schema catalog, migration engine, CRUD store,
//! query/resolution layer, and access control, all sitting behind the
//! single [`dialect::DialectProfile`] seam.

pub mod access;
pub mod dialect;
pub mod migration;
pub mod query;
pub mod schema;
pub mod store;

use crate::error::Result;
use crate::keystore::{InMemoryKeyStore, KeyStore};
use crate::progress::{ProgressSink, SilentSink};
use dialect::{DialectProfile, SqliteDialect};
use rusqlite::Connection;
use std::sync::Arc;
use tracing::info;

/// Everything a single repository instance needs to operate, carried
/// explicitly rather than reached for through module-level globals:
/// the open connection, the dialect seam, the key store, and a
/// progress sink for long-running operations (migration, clone).
pub struct RepositoryContext {
    pub conn: Connection,
    pub dialect: Arc<dyn DialectProfile>,
    pub keystore: Arc<dyn KeyStore>,
    pub progress: Arc<dyn ProgressSink>,
}

impl RepositoryContext {
    /// Open (or create) a repository database at `path`, creating the
    /// schema and running any pending migrations.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let dialect: Arc<dyn DialectProfile> = Arc::new(SqliteDialect);
        let keystore: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        let progress: Arc<dyn ProgressSink> = Arc::new(SilentSink::new());
        let ctx = Self { conn, dialect, keystore, progress };
        schema::create_schema(&ctx.conn, ctx.dialect.as_ref())?;
        let applied = migration::migrate(&ctx.conn, ctx.dialect.as_ref(), ctx.progress.as_ref())?;
        if applied > 0 {
            info!(steps = applied, "applied pending migrations");
        }
        Ok(ctx)
    }

    pub fn with_keystore(mut self, keystore: Arc<dyn KeyStore>) -> Self {
        self.keystore = keystore;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_schema_and_sets_version() {
        let ctx = RepositoryContext::open_in_memory().unwrap();
        let version = schema::get_version(&ctx.conn, ctx.dialect.as_ref()).unwrap();
        assert_eq!(version, schema::SchemaVersion::CURRENT);
    }
}
