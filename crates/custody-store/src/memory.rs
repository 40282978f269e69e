//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same transactional semantics as
//! SQLite but keeps everything in memory with no persistence:
//!
//! - writes are staged in the transaction and applied on commit
//! - a content hash claimed by an open transaction is unavailable to others
//! - `lock_ledger_tail` takes a ledger-wide async lock held until the
//!   transaction ends, bounded by the lock timeout

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use custody_core::{
    ChainHash, ContentHash, Document, DocumentId, EvidenceState, LedgerCursor, LedgerEntry,
};

use crate::error::{Result, StoreError};
use crate::partition::Period;
use crate::traits::{InsertResult, Store, TailScope, Transaction, MAX_PAGE_SIZE};

/// Default time a transaction waits for the ledger lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory store implementation.
///
/// All data is lost when the store is dropped.
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    ledger_lock: Arc<tokio::sync::Mutex<()>>,
    lock_timeout: Duration,
}

#[derive(Default)]
struct MemoryState {
    /// Committed documents indexed by id.
    documents: HashMap<DocumentId, Document>,

    /// Content hash index.
    by_hash: HashMap<ContentHash, DocumentId>,

    /// Content hashes claimed by open transactions.
    in_flight: HashSet<ContentHash>,

    /// Ledger entries per partition, in append order.
    partitions: BTreeMap<Period, Vec<LedgerEntry>>,
}

impl MemoryState {
    fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.partitions.values().flatten()
    }

    fn has_entry(&self, document_id: &DocumentId, hash: &ChainHash) -> bool {
        self.entries()
            .any(|e| e.document_id == *document_id && e.hash == *hash)
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a store whose transactions give up on the ledger lock after
    /// `lock_timeout`.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            ledger_lock: Arc::new(tokio::sync::Mutex::new(())),
            lock_timeout,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>> {
    state
        .lock()
        .map_err(|e| StoreError::Poisoned(e.to_string()))
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            ledger_lock: Arc::clone(&self.ledger_lock),
            lock_timeout: self.lock_timeout,
            tail_guard: None,
            documents: Vec::new(),
            entries: Vec::new(),
            claimed: Vec::new(),
        }))
    }

    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>> {
        let state = lock(&self.state)?;
        Ok(state.documents.get(id).cloned())
    }

    async fn find_by_content_hash(&self, hash: &ContentHash) -> Result<Option<Document>> {
        let state = lock(&self.state)?;
        Ok(state
            .by_hash
            .get(hash)
            .and_then(|id| state.documents.get(id))
            .cloned())
    }

    async fn find_ledger_entry(
        &self,
        document_id: &DocumentId,
        hash: &ChainHash,
    ) -> Result<Option<LedgerEntry>> {
        let state = lock(&self.state)?;
        let found = state
            .entries()
            .find(|e| e.document_id == *document_id && e.hash == *hash)
            .cloned();
        Ok(found)
    }

    async fn ledger_entries_for(&self, document_id: &DocumentId) -> Result<Vec<LedgerEntry>> {
        let state = lock(&self.state)?;
        let mut entries: Vec<LedgerEntry> = state
            .entries()
            .filter(|e| e.document_id == *document_id)
            .cloned()
            .collect();
        entries.sort_by_key(LedgerEntry::cursor);
        Ok(entries)
    }

    async fn ledger_page(
        &self,
        after: Option<LedgerCursor>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let limit = limit.min(MAX_PAGE_SIZE);
        let state = lock(&self.state)?;

        let mut entries: Vec<LedgerEntry> = state
            .entries()
            .filter(|e| after.map_or(true, |cursor| e.cursor() > cursor))
            .cloned()
            .collect();
        entries.sort_by_key(LedgerEntry::cursor);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn ensure_partition(&self, period: Period) -> Result<bool> {
        let mut state = lock(&self.state)?;
        if state.partitions.contains_key(&period) {
            return Ok(false);
        }
        state.partitions.insert(period, Vec::new());
        Ok(true)
    }

    async fn partitions(&self) -> Result<Vec<Period>> {
        let state = lock(&self.state)?;
        let periods = state.partitions.keys().copied().collect();
        Ok(periods)
    }
}

/// A transaction against a [`MemoryStore`].
pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    ledger_lock: Arc<tokio::sync::Mutex<()>>,
    lock_timeout: Duration,
    /// Held from the first ledger access until the transaction ends.
    tail_guard: Option<OwnedMutexGuard<()>>,
    documents: Vec<Document>,
    entries: Vec<LedgerEntry>,
    /// Content hashes this transaction claimed in `in_flight`.
    claimed: Vec<ContentHash>,
}

impl MemoryTransaction {
    async fn acquire_ledger_lock(&mut self) -> Result<()> {
        if self.tail_guard.is_some() {
            return Ok(());
        }
        let guard = tokio::time::timeout(
            self.lock_timeout,
            Arc::clone(&self.ledger_lock).lock_owned(),
        )
        .await
        .map_err(|_| {
            StoreError::Busy(format!(
                "ledger tail lock not acquired within {:?}",
                self.lock_timeout
            ))
        })?;
        self.tail_guard = Some(guard);
        Ok(())
    }

    fn release_claims(&mut self) {
        if self.claimed.is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            for hash in self.claimed.drain(..) {
                state.in_flight.remove(&hash);
            }
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn insert_document(&mut self, document: &Document) -> Result<InsertResult> {
        let mut state = lock(&self.state)?;

        let taken = state.documents.contains_key(&document.id)
            || state.by_hash.contains_key(&document.content_hash)
            || state.in_flight.contains(&document.content_hash)
            || self.documents.iter().any(|d| d.id == document.id);
        if taken {
            return Ok(InsertResult::AlreadyExists);
        }

        state.in_flight.insert(document.content_hash);
        drop(state);

        self.claimed.push(document.content_hash);
        self.documents.push(document.clone());
        Ok(InsertResult::Inserted)
    }

    async fn record_evidence(
        &mut self,
        id: &DocumentId,
        token: Option<&str>,
        state: EvidenceState,
        chain_hash: Option<&ChainHash>,
    ) -> Result<()> {
        let document = self
            .documents
            .iter_mut()
            .find(|d| d.id == *id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("document {id} was not inserted by this transaction"))
            })?;

        if document.evidence_token.is_some() || document.chain_hash.is_some() {
            return Err(StoreError::InvalidData(format!(
                "evidence for document {id} is already recorded"
            )));
        }

        document.evidence_token = token.map(str::to_owned);
        document.evidence_state = state;
        document.chain_hash = chain_hash.copied();
        Ok(())
    }

    async fn lock_ledger_tail(&mut self, scope: TailScope) -> Result<Option<LedgerEntry>> {
        self.acquire_ledger_lock().await?;

        let state = lock(&self.state)?;
        let committed = state
            .partitions
            .iter()
            .filter(|(period, _)| match scope {
                TailScope::From(from) => **period >= from,
                TailScope::All => true,
            })
            .flat_map(|(_, entries)| entries.iter());
        let staged = self.entries.iter().filter(|e| match scope {
            TailScope::From(from) => Period::of(e.timestamp) >= from,
            TailScope::All => true,
        });

        Ok(committed.chain(staged).max_by_key(|e| e.cursor()).cloned())
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<InsertResult> {
        self.acquire_ledger_lock().await?;

        let state = lock(&self.state)?;
        let duplicate = state.has_entry(&entry.document_id, &entry.hash)
            || self
                .entries
                .iter()
                .any(|e| e.document_id == entry.document_id && e.hash == entry.hash);
        drop(state);

        if duplicate {
            return Ok(InsertResult::AlreadyExists);
        }
        self.entries.push(entry.clone());
        Ok(InsertResult::Inserted)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        {
            let mut state = lock(&self.state)?;

            for document in self.documents.drain(..) {
                state.in_flight.remove(&document.content_hash);
                state.by_hash.insert(document.content_hash, document.id);
                state.documents.insert(document.id, document);
            }
            for entry in self.entries.drain(..) {
                state
                    .partitions
                    .entry(Period::of(entry.timestamp))
                    .or_default()
                    .push(entry);
            }
        }
        self.claimed.clear();
        self.tail_guard = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.documents.clear();
        self.entries.clear();
        self.release_claims();
        self.tail_guard = None;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release_claims();
    }
}
