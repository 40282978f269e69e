//! Hash-chained ledger append.
//!
//! Each entry links to the global tail:
//!
//! ```text
//! hash = SHA256(previous_hash_hex || content_hash_hex)   // later entries
//! hash = SHA256(content_hash_hex)                        // first entry ever
//! ```
//!
//! The append runs inside the caller's transaction so that the entry commits
//! or rolls back together with the document row. The tail lock taken in
//! [`Transaction::lock_ledger_tail`] is the only serialization point.

use std::sync::Arc;

use tracing::debug;

use custody_core::{ChainHash, Clock, ContentHash, DocumentId, LedgerEntry};
use custody_store::{InsertResult, Period, Result, TailScope, Transaction};

/// Appends entries to the ledger.
#[derive(Clone)]
pub struct Ledger {
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Append an entry for `document_id` and return its chain hash.
    ///
    /// Re-appending the same `(document_id, hash)` is a no-op that returns
    /// the same hash.
    pub async fn append(
        &self,
        tx: &mut dyn Transaction,
        document_id: DocumentId,
        content_hash: &ContentHash,
        evidence_token: Option<&str>,
    ) -> Result<ChainHash> {
        let now = self.clock.now();
        let tail = lock_tail(tx, Period::of(now)).await?;

        // Entries are ordered by (timestamp, seq); never go behind the tail.
        let timestamp = match &tail {
            Some(t) if t.timestamp > now => t.timestamp,
            _ => now,
        };
        let seq = tail.as_ref().map_or(1, |t| t.seq + 1);
        let previous_hash = tail.map(|t| t.hash);
        let hash = ChainHash::link(previous_hash.as_ref(), content_hash);

        let entry = LedgerEntry {
            seq,
            document_id,
            hash,
            previous_hash,
            timestamp,
            evidence_token: evidence_token.map(str::to_owned),
        };

        match tx.insert_ledger_entry(&entry).await? {
            InsertResult::Inserted => {
                debug!(%document_id, seq, chain_hash = %hash, "ledger entry appended");
            }
            InsertResult::AlreadyExists => {
                debug!(%document_id, chain_hash = %hash, "ledger entry already present");
            }
        }
        Ok(hash)
    }
}

/// Lock the global tail.
///
/// Looks in the current period (and any later one) first. An empty result
/// there does not mean the ledger is empty: at the first append of a month
/// the tail lives in an earlier partition, so fall back to all of them.
async fn lock_tail(tx: &mut dyn Transaction, current: Period) -> Result<Option<LedgerEntry>> {
    if let Some(tail) = tx.lock_ledger_tail(TailScope::From(current)).await? {
        return Ok(Some(tail));
    }
    tx.lock_ledger_tail(TailScope::All).await
}
