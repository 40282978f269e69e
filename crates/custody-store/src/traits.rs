//! Store traits: the abstract interface for document and ledger persistence.
//!
//! These traits let the vault, the ledger and the verification engine be
//! storage-agnostic. Implementations include SQLite (primary) and in-memory
//! (for tests).

use async_trait::async_trait;
use custody_core::{ChainHash, ContentHash, Document, DocumentId, EvidenceState, LedgerCursor, LedgerEntry};

use crate::error::Result;
use crate::partition::Period;

/// Hard cap on ledger pages, whatever the caller asks for.
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Row was inserted.
    Inserted,
    /// A row with the same unique key exists (idempotent - not an error).
    AlreadyExists,
}

/// Which partitions a tail lookup may inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailScope {
    /// The given period and any later one.
    From(Period),
    /// Every partition.
    All,
}

/// Read side and transaction factory.
///
/// Reads outside a transaction never take locks.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction.
    ///
    /// Dropping the returned handle without committing rolls it back.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Get a document by id.
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>>;

    /// Look a document up by its content hash.
    async fn find_by_content_hash(&self, hash: &ContentHash) -> Result<Option<Document>>;

    /// The ledger entry with exactly this `(document_id, hash)`, if any.
    async fn find_ledger_entry(
        &self,
        document_id: &DocumentId,
        hash: &ChainHash,
    ) -> Result<Option<LedgerEntry>>;

    /// Every ledger entry recorded for a document.
    async fn ledger_entries_for(&self, document_id: &DocumentId) -> Result<Vec<LedgerEntry>>;

    /// Entries strictly after `after` in `(timestamp, seq)` order.
    ///
    /// `limit` is clamped to [`MAX_PAGE_SIZE`].
    async fn ledger_page(
        &self,
        after: Option<LedgerCursor>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Create the partition for `period` if it does not exist.
    ///
    /// Returns `true` if it was created by this call. Safe to run
    /// concurrently with appends.
    async fn ensure_partition(&self, period: Period) -> Result<bool>;

    /// Known partitions, ascending.
    async fn partitions(&self) -> Result<Vec<Period>>;
}

/// One multi-statement transaction.
///
/// Everything written through a transaction becomes visible atomically on
/// [`Transaction::commit`], or not at all.
#[async_trait]
pub trait Transaction: Send {
    /// Insert a document row.
    ///
    /// Returns `AlreadyExists` when the id or the content hash is taken,
    /// including by another transaction that has not finished yet.
    async fn insert_document(&mut self, document: &Document) -> Result<InsertResult>;

    /// Fill in the evidence fields of a document inserted by this
    /// transaction. They can be set once.
    async fn record_evidence(
        &mut self,
        id: &DocumentId,
        token: Option<&str>,
        state: EvidenceState,
        chain_hash: Option<&ChainHash>,
    ) -> Result<()>;

    /// Locking read of the most recent entry (highest timestamp, then
    /// highest seq) within `scope`.
    ///
    /// The lock is held until the transaction ends; no other transaction can
    /// append in the meantime.
    async fn lock_ledger_tail(&mut self, scope: TailScope) -> Result<Option<LedgerEntry>>;

    /// Insert a ledger entry into the partition of its timestamp.
    ///
    /// Returns `AlreadyExists` if `(document_id, hash)` is already recorded.
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<InsertResult>;

    /// Make all writes durable.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all writes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
