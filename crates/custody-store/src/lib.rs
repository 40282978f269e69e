//! # Custody Store
//!
//! Persistence for documents and the hash-chained ledger, behind the
//! [`Store`] and [`Transaction`] traits. The primary implementation is
//! [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - Reads and the transaction factory
//! - [`Transaction`] - Atomic document + ledger writes, with the tail lock
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`Period`] - A monthly ledger partition
//! - [`InsertResult`] - Outcome of a uniqueness-guarded insert
//!
//! ## Usage
//!
//! ```rust,no_run
//! use custody_store::{SqliteStore, Store, TailScope};
//!
//! async fn example() -> custody_store::Result<()> {
//!     let store = SqliteStore::open("custody.db")?;
//!
//!     let mut tx = store.begin().await?;
//!     let tail = tx.lock_ledger_tail(TailScope::All).await?;
//!     // ... insert a document and the next ledger entry ...
//!     tx.commit().await?;
//!     # let _ = tail;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: a taken content hash or `(document_id, hash)`
//!   pair returns `AlreadyExists`, never an error
//! - **One writer at a time**: the tail lock serializes appends
//! - **Partitions**: ledger entries live in one table per UTC month; reads
//!   span all of them

pub mod error;
pub mod memory;
pub mod migration;
pub mod partition;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemoryStore, MemoryTransaction};
pub use partition::Period;
pub use sqlite::{SqliteConfig, SqliteStore, SqliteTransaction};
pub use traits::{InsertResult, Store, TailScope, Transaction, MAX_PAGE_SIZE};
