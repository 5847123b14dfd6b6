//! Relational record store for the published catalogue
//!
//! Holds function families, function implementations, benchmarks, datasets,
//! get-started plans, dev articles and pipelines. Every write goes through
//! [`RecordStore::commit`], which returns a [`MutationEvent`] describing the
//! entity before and after the transaction; the rebuild engine in
//! `pagegraph-orchestration` turns those events into page rebuilds.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pagegraph_storage::{EntityChange, FamilyDraft, New, RecordStore, SqliteRecordStore};
//!
//! let store = SqliteRecordStore::in_memory()?;
//! let event = store
//!     .commit(EntityChange::CreateFamily(New::new(FamilyDraft::new("vision", "Vision"))))
//!     .await?;
//! assert_eq!(event.kind, MutationKind::Create);
//! ```

pub mod domain;
pub mod error;

#[cfg(feature = "sqlite")]
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::*;

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteRecordStore;
