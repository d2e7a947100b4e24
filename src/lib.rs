// src/lib.rs

//! Trove/changeset model and repository storage engine for a
//! distributed package system.
//!
//! # Architecture
//!
//! - Troves: named, versioned, flavored package units, carrying a
//!   file manifest, sub-trove references, and provided/required
//!   dependency sets.
//! - Changesets: the unit of transfer and commit — either an absolute
//!   snapshot or a relative diff against a basis version, built from
//!   byte-level file-stream patches.
//! - Repository storage: a relational schema (`db::schema`) behind a
//!   `DialectProfile`, a resolution layer (`db::query`) implementing
//!   version/flavor filtering with affinity, and a role/permission
//!   access-control layer (`db::access`).
//! - Everything above is storage-backend agnostic; `db::dialect`
//!   ships the one `DialectProfile` this crate provides, over SQLite.

pub mod changeset;
pub mod clone;
pub mod config;
pub mod db;
pub mod deps;
pub mod diff;
mod error;
pub mod filestream;
pub mod flavor;
pub mod hash;
pub mod keystore;
pub mod label;
pub mod progress;
pub mod trove;
pub mod version;

pub use changeset::{Changeset, ContentArchive, DepSetEdit, DiffContent, FileChange, NewTroveCs};
pub use clone::{clone_batch, clone_trove, check_label_conflicts, CloneFlags, CloneRequest, LabelConflict};
pub use config::RepositoryConfig;
pub use db::RepositoryContext;
pub use deps::{DepClass, Dependency, DependencySet};
pub use diff::diff_troves;
pub use error::{Error, Result};
pub use filestream::{ContentsInfo, FileStream, InodeInfo};
pub use flavor::{ArchSpec, Flavor, FlavorItem, FlavorOp};
pub use hash::{hash_bytes, Hash, HashAlgorithm, Hasher};
pub use keystore::{InMemoryKeyStore, KeyStore, PublicKey};
pub use label::{Branch, Label, LabelParseError, LabelPath};
pub use progress::{CallbackSink, LogSink, ProgressEvent, ProgressSink, SilentSink};
pub use trove::{RedirectSpec, Signature, SubTroveRef, Trove, TroveFile, TroveType};
pub use version::{Revision, Version};
