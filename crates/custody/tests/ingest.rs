//! Ingest: idempotency, ticket identity, evidence policy, atomicity.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use custody::core::{
    BusinessMetadata, ChainHash, ContentHash, Document, DocumentId, DocumentKind, EvidenceState,
    LedgerCursor, LedgerEntry, TicketSubmission,
};
use custody::store::{
    InsertResult, MemoryStore, Period, Store, StoreError, TailScope, Transaction,
};
use custody::{EvidencePolicy, IngestStatus, VaultConfig, VaultError};

use common::{memory, metadata, sqlite, Harness, UnavailableSigner};

async fn restore_is_idempotent<S: Store>(h: Harness<S>) -> anyhow::Result<()> {
    let content = Bytes::from_static(b"INVOICE 2026-0042 total 120.00 EUR");

    let first = h.vault.store(metadata("a.txt"), content.clone()).await?;
    let second = h.vault.store(metadata("renamed.txt"), content).await?;

    assert_eq!(first.status, IngestStatus::Created);
    assert_eq!(second.status, IngestStatus::AlreadyExists);
    assert_eq!(second.document.id, first.document.id);
    assert_eq!(second.document.content_hash, first.document.content_hash);
    assert_eq!(second.document.filename, "a.txt");

    let entries = h.vault.backend().ledger_entries_for(&first.document.id).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(Some(entries[0].hash), first.document.chain_hash);
    Ok(())
}

#[tokio::test]
async fn test_restore_is_idempotent_memory() -> anyhow::Result<()> {
    restore_is_idempotent(memory(VaultConfig::default())).await
}

#[tokio::test]
async fn test_restore_is_idempotent_sqlite() -> anyhow::Result<()> {
    restore_is_idempotent(sqlite(VaultConfig::default())).await
}

#[tokio::test]
async fn test_created_document_is_complete() -> anyhow::Result<()> {
    let h = sqlite(VaultConfig::default());
    let content = Bytes::from_static(b"%PDF-1.7 invoice");

    let outcome = h.vault.store(metadata("invoice.pdf"), content.clone()).await?;
    let doc = outcome.document;

    assert_eq!(doc.size, content.len() as u64);
    assert_eq!(doc.content_hash, ContentHash::compute(&content));
    assert_eq!(doc.evidence_state, EvidenceState::Signed);
    assert!(doc.evidence_token.is_some());
    assert_eq!(doc.stored_path, format!("2026/10/19/{}", doc.content_hash));
    assert_eq!(h.vault.get(&doc.id).await?, doc);
    assert_eq!(h.vault.content(&doc.id).await?, content);
    assert!(h.vault.blobs().pending().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_get_unknown_is_not_found() {
    let h = memory(VaultConfig::default());
    let err = h.vault.get(&DocumentId::new()).await.unwrap_err();
    assert!(matches!(err, VaultError::NotFound(_)));
}

fn ticket(cashier: &str, terminal: &str) -> TicketSubmission {
    TicketSubmission {
        body: json!({
            "lines": [
                {"sku": "CAFE-01", "qty": 2, "unit_price": 1.80},
                {"sku": "CROIS-02", "qty": 1, "unit_price": 2.10, "discount": null}
            ],
            "total": 5.70
        }),
        metadata: BusinessMetadata {
            source_system: Some("till-v3".into()),
            external_id: Some("T/2026/000981".into()),
            session_id: Some("shift-2026-10-19-am".into()),
            terminal_id: Some(terminal.into()),
            cashier_name: Some(cashier.into()),
            total_minor: Some(570),
            currency: Some("EUR".into()),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn test_cashier_change_keeps_ticket_identity() -> anyhow::Result<()> {
    let h = sqlite(VaultConfig::default());

    let first = h.vault.store_ticket(ticket("Ana", "T1")).await?;
    let second = h.vault.store_ticket(ticket("Bruno", "T2")).await?;

    assert!(first.is_new());
    assert_eq!(second.status, IngestStatus::AlreadyExists);
    assert_eq!(second.document.id, first.document.id);
    assert_eq!(second.document.content_hash, first.document.content_hash);

    let stored = &first.document;
    assert_eq!(stored.metadata.kind, Some(DocumentKind::Ticket));
    assert_eq!(stored.metadata.cashier_name.as_deref(), Some("Ana"));
    assert_eq!(stored.filename, "ticket-T_2026_000981.json");
    assert_eq!(stored.content_type, "application/json");
    Ok(())
}

#[tokio::test]
async fn test_ticket_session_change_is_new_document() -> anyhow::Result<()> {
    let h = memory(VaultConfig::default());
    let mut other = ticket("Ana", "T1");
    other.metadata.session_id = Some("shift-2026-10-19-pm".into());

    let first = h.vault.store_ticket(ticket("Ana", "T1")).await?;
    let second = h.vault.store_ticket(other).await?;

    assert!(second.is_new());
    assert_ne!(first.document.content_hash, second.document.content_hash);
    assert_eq!(second.document.chain_hash.map(|_| ()), Some(()));
    Ok(())
}

#[tokio::test]
async fn test_best_effort_stores_unsigned_when_signer_down() -> anyhow::Result<()> {
    let h = memory(VaultConfig::default());
    let vault = h.vault.with_signer(Arc::new(UnavailableSigner));

    let outcome = vault.store(metadata("a.bin"), Bytes::from_static(b"abc")).await?;

    assert!(outcome.is_new());
    assert_eq!(outcome.document.evidence_state, EvidenceState::Unsigned);
    assert_eq!(outcome.document.evidence_token, None);
    assert!(outcome.document.chain_hash.is_some());

    let report = vault.verify(&outcome.document.id).await?;
    assert!(report.valid);
    Ok(())
}

#[tokio::test]
async fn test_required_evidence_aborts_whole_ingest() -> anyhow::Result<()> {
    let h = sqlite(VaultConfig {
        evidence: EvidencePolicy::Required,
        ..Default::default()
    });
    let vault = h.vault.with_signer(Arc::new(UnavailableSigner));

    let err = vault
        .store(metadata("a.bin"), Bytes::from_static(b"abc"))
        .await
        .unwrap_err();

    assert!(matches!(err, VaultError::Signing(_)));
    assert!(vault
        .backend()
        .find_by_content_hash(&ContentHash::compute(b"abc"))
        .await?
        .is_none());
    assert!(vault.ledger_page(None, 10).await?.is_empty());
    assert!(vault.blobs().pending().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_evidence_disabled_and_ledger_disabled() -> anyhow::Result<()> {
    let h = memory(VaultConfig {
        evidence: EvidencePolicy::Disabled,
        ledger_enabled: false,
        ..Default::default()
    });

    let outcome = h.vault.store(metadata("a.bin"), Bytes::from_static(b"plain")).await?;

    assert_eq!(outcome.document.evidence_state, EvidenceState::Disabled);
    assert_eq!(outcome.document.chain_hash, None);
    assert!(h.vault.ledger_page(None, 10).await?.is_empty());
    Ok(())
}

/// Delegates to a [`MemoryStore`] but fails every ledger insert.
struct LedgerDown(MemoryStore);

struct LedgerDownTx(Box<dyn Transaction>);

#[async_trait]
impl Store for LedgerDown {
    async fn begin(&self) -> custody::store::Result<Box<dyn Transaction>> {
        Ok(Box::new(LedgerDownTx(self.0.begin().await?)))
    }

    async fn get_document(&self, id: &DocumentId) -> custody::store::Result<Option<Document>> {
        self.0.get_document(id).await
    }

    async fn find_by_content_hash(
        &self,
        hash: &ContentHash,
    ) -> custody::store::Result<Option<Document>> {
        self.0.find_by_content_hash(hash).await
    }

    async fn find_ledger_entry(
        &self,
        document_id: &DocumentId,
        hash: &ChainHash,
    ) -> custody::store::Result<Option<LedgerEntry>> {
        self.0.find_ledger_entry(document_id, hash).await
    }

    async fn ledger_entries_for(
        &self,
        document_id: &DocumentId,
    ) -> custody::store::Result<Vec<LedgerEntry>> {
        self.0.ledger_entries_for(document_id).await
    }

    async fn ledger_page(
        &self,
        after: Option<LedgerCursor>,
        limit: usize,
    ) -> custody::store::Result<Vec<LedgerEntry>> {
        self.0.ledger_page(after, limit).await
    }

    async fn ensure_partition(&self, period: Period) -> custody::store::Result<bool> {
        self.0.ensure_partition(period).await
    }

    async fn partitions(&self) -> custody::store::Result<Vec<Period>> {
        self.0.partitions().await
    }
}

#[async_trait]
impl Transaction for LedgerDownTx {
    async fn insert_document(&mut self, document: &Document) -> custody::store::Result<InsertResult> {
        self.0.insert_document(document).await
    }

    async fn record_evidence(
        &mut self,
        id: &DocumentId,
        token: Option<&str>,
        state: EvidenceState,
        chain_hash: Option<&ChainHash>,
    ) -> custody::store::Result<()> {
        self.0.record_evidence(id, token, state, chain_hash).await
    }

    async fn lock_ledger_tail(
        &mut self,
        scope: TailScope,
    ) -> custody::store::Result<Option<LedgerEntry>> {
        self.0.lock_ledger_tail(scope).await
    }

    async fn insert_ledger_entry(
        &mut self,
        _entry: &LedgerEntry,
    ) -> custody::store::Result<InsertResult> {
        Err(StoreError::Busy("ledger partition locked".into()))
    }

    async fn commit(self: Box<Self>) -> custody::store::Result<()> {
        self.0.commit().await
    }

    async fn rollback(self: Box<Self>) -> custody::store::Result<()> {
        self.0.rollback().await
    }
}

#[tokio::test]
async fn test_ledger_failure_rolls_back_document() -> anyhow::Result<()> {
    common::init_tracing();
    let h = Harness::open_with(VaultConfig::default(), |_| LedgerDown(MemoryStore::new()));
    let vault = &h.vault;

    let err = vault
        .store(metadata("a.bin"), Bytes::from_static(b"never stored"))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(vault
        .backend()
        .find_by_content_hash(&ContentHash::compute(b"never stored"))
        .await?
        .is_none());
    assert!(vault.blobs().pending().await?.is_empty());
    Ok(())
}
