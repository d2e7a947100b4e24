// src/error.rs

//! Crate-wide error taxonomy.
//!
//! Kinds, not type hierarchies: every fallible operation in this crate
//! returns one of these variants rather than a component-specific error
//! type, so callers at the store boundary can match on kind alone.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed version, flavor, dependency, config, or trove-spec input.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Requested trove, file, key, or path is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Schema FK violation, duplicate unique key, or label collision.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Role lacks canWrite/canRemove/admin.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Digest mismatch, failed signature, or broken changeset diff.
    #[error("integrity error: {0}")]
    IntegrityError(String),

    /// A changeset diff does not apply to the trove it was built against.
    #[error("patch error: {0}")]
    PatchError(String),

    /// Remote call failed (retried by callers before surfacing).
    #[error("transport error: {0}")]
    TransportError(String),

    /// Database older than MIN_SUPPORTED_MAJOR, or newer than code supports.
    #[error("schema version error: {0}")]
    SchemaVersionError(String),

    /// A migration step failed; the database is left at the last
    /// successfully committed minor.
    #[error("migration error: {0}")]
    MigrationError(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::ParseError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn patch(msg: impl Into<String>) -> Self {
        Error::PatchError(msg.into())
    }

    /// True for the handful of dialect-level transient errors the store
    /// retries a bounded number of times before surfacing (deadlock,
    /// busy/locked connection).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Database(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }
}
