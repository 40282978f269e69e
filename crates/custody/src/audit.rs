//! Full-chain audit.
//!
//! Replays the ledger in `(timestamp, seq)` order and recomputes every chain
//! value from the stored predecessor and the document's content hash.

use serde::{Deserialize, Serialize};
use tracing::warn;

use custody_core::{ChainHash, DocumentId, LedgerCursor};
use custody_store::{Result, Store};

/// Default number of entries fetched per page.
pub const AUDIT_PAGE_SIZE: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakKind {
    /// The entry does not point at the entry before it (gap, fork or
    /// reordering).
    PreviousMismatch {
        expected: Option<ChainHash>,
        found: Option<ChainHash>,
    },
    /// The stored hash is not the link of its predecessor and content.
    HashMismatch { expected: ChainHash, found: ChainHash },
    /// The entry names a document that does not exist.
    MissingDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub seq: u64,
    pub document_id: DocumentId,
    #[serde(flatten)]
    pub kind: BreakKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    /// Entries examined.
    pub entries: u64,
    /// Chain value of the last entry.
    pub head: Option<ChainHash>,
    pub breaks: Vec<ChainBreak>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.breaks.is_empty()
    }
}

/// Audit the whole ledger.
pub async fn audit_chain<S: Store + ?Sized>(store: &S, page_size: usize) -> Result<ChainReport> {
    let page_size = page_size.max(1);
    let mut report = ChainReport::default();
    let mut cursor: Option<LedgerCursor> = None;
    let mut previous: Option<ChainHash> = None;

    loop {
        let page = store.ledger_page(cursor, page_size).await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(last.cursor());
        let full = page.len() >= page_size;

        for entry in page {
            report.entries += 1;

            if entry.previous_hash != previous {
                report.breaks.push(ChainBreak {
                    seq: entry.seq,
                    document_id: entry.document_id,
                    kind: BreakKind::PreviousMismatch {
                        expected: previous,
                        found: entry.previous_hash,
                    },
                });
            }

            match store.get_document(&entry.document_id).await? {
                Some(document) => {
                    let expected =
                        ChainHash::link(entry.previous_hash.as_ref(), &document.content_hash);
                    if expected != entry.hash {
                        report.breaks.push(ChainBreak {
                            seq: entry.seq,
                            document_id: entry.document_id,
                            kind: BreakKind::HashMismatch {
                                expected,
                                found: entry.hash,
                            },
                        });
                    }
                }
                None => report.breaks.push(ChainBreak {
                    seq: entry.seq,
                    document_id: entry.document_id,
                    kind: BreakKind::MissingDocument,
                }),
            }

            previous = Some(entry.hash);
        }

        if !full {
            break;
        }
    }

    report.head = previous;
    for b in &report.breaks {
        warn!(seq = b.seq, document_id = %b.document_id, kind = ?b.kind, "ledger chain break");
    }
    Ok(report)
}
