//! The Vault: content-addressed document custody.
//!
//! Ingest writes the blob to a temp file, then in one transaction inserts the
//! document row, issues evidence, appends to the ledger and records the
//! evidence on the row. Only after commit is the blob renamed into place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use custody_core::{
    Clock, ContentHash, Document, DocumentId, DocumentKind, DocumentMetadata, EvidencePayload,
    EvidenceSigner, EvidenceState, EvidenceVerifier, KeyRing, LedgerCursor, LedgerEntry,
    SigningError, SystemClock, TicketSubmission,
};
use custody_store::{InsertResult, Period, Store, Transaction};

use crate::audit::{audit_chain, ChainReport, AUDIT_PAGE_SIZE};
use crate::blob::{digest_file, BlobStore};
use crate::config::{EvidencePolicy, VaultConfig};
use crate::error::{Result, VaultError};
use crate::ledger::Ledger;
use crate::verify::{VerificationEngine, VerificationResult};

/// Whether an ingest created a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Created,
    /// Identical content was stored before; the original is returned.
    AlreadyExists,
}

/// Result of [`Vault::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOutcome {
    pub document: Document,
    pub status: IngestStatus,
}

impl StoreOutcome {
    pub fn is_new(&self) -> bool {
        self.status == IngestStatus::Created
    }
}

/// What [`Vault::reconcile`] did with leftover temp blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Committed documents whose blob was moved into place.
    pub published: Vec<DocumentId>,
    /// Temps of documents whose blob was already in place.
    pub discarded: Vec<DocumentId>,
    /// Temps whose document never committed.
    pub orphaned: Vec<DocumentId>,
    /// Files left untouched for an operator.
    pub skipped: Vec<PathBuf>,
}

/// The main Vault struct.
pub struct Vault<S: Store> {
    store: Arc<S>,
    blobs: BlobStore,
    signer: Option<Arc<dyn EvidenceSigner>>,
    verifier: Option<Arc<dyn EvidenceVerifier>>,
    clock: Arc<dyn Clock>,
    ledger: Ledger,
    config: VaultConfig,
}

impl<S: Store> Vault<S> {
    /// Create a vault over `store`, keeping blobs under `blob_root`.
    pub fn new(store: S, blob_root: impl Into<PathBuf>, config: VaultConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            store: Arc::new(store),
            blobs: BlobStore::new(blob_root),
            signer: None,
            verifier: None,
            ledger: Ledger::new(Arc::clone(&clock)),
            clock,
            config,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn EvidenceSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn EvidenceVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Sign and verify with the same key ring.
    pub fn with_key_ring(self, keys: Arc<KeyRing>) -> Self {
        self.with_signer(Arc::clone(&keys) as Arc<dyn EvidenceSigner>)
            .with_verifier(keys)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ledger = Ledger::new(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    /// The storage backend.
    pub fn backend(&self) -> &S {
        &self.store
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ingest
    // ─────────────────────────────────────────────────────────────────────────

    /// Store raw content.
    ///
    /// Identical content returns the existing document with
    /// [`IngestStatus::AlreadyExists`].
    pub async fn store(&self, metadata: DocumentMetadata, content: Bytes) -> Result<StoreOutcome> {
        self.validate(&metadata, content.len())?;
        let content_hash = ContentHash::compute(&content);
        self.ingest(metadata, content, content_hash).await
    }

    /// Store a point-of-sale ticket.
    ///
    /// The stored blob is the ticket's canonical identity, so resubmitting
    /// the same ticket with a different cashier or terminal returns the
    /// original document.
    pub async fn store_ticket(&self, ticket: TicketSubmission) -> Result<StoreOutcome> {
        if !ticket.body.is_object() {
            return Err(VaultError::Validation("ticket body must be a JSON object".into()));
        }

        let identity = Bytes::from(ticket.identity_bytes()?);
        let content_hash = ContentHash::compute(&identity);

        let mut business = ticket.metadata;
        business.kind.get_or_insert(DocumentKind::Ticket);
        let filename = match &business.external_id {
            Some(external_id) => {
                let safe: String = external_id
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                    .collect();
                format!("ticket-{safe}.json")
            }
            None => format!("ticket-{}.json", &content_hash.to_hex()[..16]),
        };
        let metadata = DocumentMetadata::new(filename, "application/json").with_business(business);

        self.validate(&metadata, identity.len())?;
        self.ingest(metadata, identity, content_hash).await
    }

    fn validate(&self, metadata: &DocumentMetadata, size: usize) -> Result<()> {
        if metadata.filename.trim().is_empty() {
            return Err(VaultError::Validation("filename is required".into()));
        }
        if metadata.filename.contains(['/', '\\']) {
            return Err(VaultError::Validation(format!(
                "filename must not contain path separators: {}",
                metadata.filename
            )));
        }
        if metadata.content_type.trim().is_empty() {
            return Err(VaultError::Validation("content type is required".into()));
        }
        if size == 0 {
            return Err(VaultError::Validation("content is empty".into()));
        }
        if size > self.config.max_document_bytes {
            return Err(VaultError::Validation(format!(
                "content is {size} bytes, limit is {}",
                self.config.max_document_bytes
            )));
        }
        if let Some(currency) = &metadata.business.currency {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(VaultError::Validation(format!(
                    "currency must be an ISO 4217 code: {currency}"
                )));
            }
        }
        Ok(())
    }

    async fn ingest(
        &self,
        metadata: DocumentMetadata,
        content: Bytes,
        content_hash: ContentHash,
    ) -> Result<StoreOutcome> {
        if let Some(existing) = self.store.find_by_content_hash(&content_hash).await? {
            debug!(document_id = %existing.id, %content_hash, "content already stored");
            return Ok(StoreOutcome {
                document: existing,
                status: IngestStatus::AlreadyExists,
            });
        }

        let id = DocumentId::new();
        let created_at = self.clock.now();
        let document = Document {
            id,
            filename: metadata.filename,
            content_type: metadata.content_type,
            size: content.len() as u64,
            content_hash,
            stored_path: BlobStore::final_path(created_at, &content_hash),
            created_at,
            evidence_token: None,
            evidence_state: EvidenceState::Disabled,
            chain_hash: None,
            metadata: metadata.business,
        };

        // Removed on any early return below until released.
        let temp = self.blobs.write_temp(&id, &content).await?;

        // The deadline stops short of COMMIT: once COMMIT is issued the row
        // may become durable whether or not the acknowledgement arrives.
        let timeout = self.config.db_timeout();
        let prepared = tokio::time::timeout(timeout, self.prepare_document(document))
            .await
            .map_err(|_| VaultError::Timeout(timeout))??;

        let Some((tx, document)) = prepared else {
            drop(temp);
            return match self.store.find_by_content_hash(&content_hash).await? {
                Some(existing) => {
                    debug!(document_id = %existing.id, %content_hash, "lost insert race");
                    Ok(StoreOutcome {
                        document: existing,
                        status: IngestStatus::AlreadyExists,
                    })
                }
                None => Err(VaultError::InFlight(content_hash)),
            };
        };

        // From here the temp file belongs to reconcile() unless this call
        // settles it.
        let temp_path = temp.release();
        if let Err(e) = tx.commit().await {
            match self.store.get_document(&id).await {
                Ok(None) => {
                    remove(&temp_path).await?;
                    return Err(e.into());
                }
                Ok(Some(_)) => {
                    warn!(document_id = %id, error = %e, "commit reported failure but the row is durable");
                }
                Err(lookup) => {
                    warn!(document_id = %id, error = %lookup, "commit outcome unknown, temp blob left for reconcile");
                    return Err(e.into());
                }
            }
        }

        self.blobs.publish(&temp_path, &document.stored_path).await?;

        info!(
            document_id = %document.id,
            %content_hash,
            chain_hash = ?document.chain_hash,
            evidence = document.evidence_state.as_str(),
            "document stored"
        );
        Ok(StoreOutcome {
            document,
            status: IngestStatus::Created,
        })
    }

    /// The transactional part of an ingest, up to but not including COMMIT.
    ///
    /// Returns `None` if the content hash was taken by a concurrent ingest.
    /// Dropping the transaction on any error rolls it back.
    async fn prepare_document(
        &self,
        mut document: Document,
    ) -> Result<Option<(Box<dyn Transaction>, Document)>> {
        let mut tx = self.store.begin().await?;

        if tx.insert_document(&document).await? == InsertResult::AlreadyExists {
            tx.rollback().await?;
            return Ok(None);
        }

        let (token, state) = self.issue_evidence(&document).await?;

        let chain_hash = if self.config.ledger_enabled {
            Some(
                self.ledger
                    .append(tx.as_mut(), document.id, &document.content_hash, token.as_deref())
                    .await?,
            )
        } else {
            None
        };

        tx.record_evidence(&document.id, token.as_deref(), state, chain_hash.as_ref())
            .await?;

        document.evidence_token = token;
        document.evidence_state = state;
        document.chain_hash = chain_hash;
        Ok(Some((tx, document)))
    }

    /// Sign the document's evidence payload according to policy.
    async fn issue_evidence(&self, document: &Document) -> Result<(Option<String>, EvidenceState)> {
        let policy = self.config.evidence;
        if policy == EvidencePolicy::Disabled {
            return Ok((None, EvidenceState::Disabled));
        }

        let outcome = match &self.signer {
            Some(signer) => {
                let payload =
                    EvidencePayload::new(document.id, document.content_hash, document.created_at);
                match payload.canonical_bytes() {
                    Ok(bytes) => signer.sign(&bytes).await,
                    Err(e) => Err(e),
                }
            }
            None => Err(SigningError::KeyUnavailable("no evidence signer configured".into())),
        };

        match outcome {
            Ok(signed) => Ok((Some(signed.token), EvidenceState::Signed)),
            Err(e) if policy == EvidencePolicy::Required => Err(e.into()),
            Err(e) => {
                warn!(document_id = %document.id, error = %e, "storing without evidence");
                Ok((None, EvidenceState::Unsigned))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a document by id.
    pub async fn get(&self, id: &DocumentId) -> Result<Document> {
        self.store
            .get_document(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("document {id}")))
    }

    /// Read a document's stored bytes.
    pub async fn content(&self, id: &DocumentId) -> Result<Bytes> {
        let document = self.get(id).await?;
        Ok(Bytes::from(self.blobs.read(&document.stored_path).await?))
    }

    /// Ledger entries strictly after `after`, ascending.
    pub async fn ledger_page(
        &self,
        after: Option<LedgerCursor>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        Ok(self.store.ledger_page(after, limit).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────

    /// A verification engine over this vault's resources.
    pub fn verification(&self) -> VerificationEngine<S> {
        let mut engine = VerificationEngine::new(Arc::clone(&self.store), self.blobs.clone())
            .with_clock(Arc::clone(&self.clock));
        if let Some(verifier) = &self.verifier {
            engine = engine.with_verifier(Arc::clone(verifier));
        }
        if let Some(signer) = &self.signer {
            engine = engine.with_signer(Arc::clone(signer));
        }
        engine
    }

    pub async fn verify(&self, id: &DocumentId) -> Result<VerificationResult> {
        self.verification().verify(id).await
    }

    pub async fn verify_with_proof(&self, id: &DocumentId) -> Result<VerificationResult> {
        self.verification().verify_with_proof(id).await
    }

    /// Replay and check the whole ledger.
    pub async fn audit_chain(&self) -> Result<ChainReport> {
        Ok(audit_chain(self.store.as_ref(), AUDIT_PAGE_SIZE).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Make sure the partitions for `now`'s month and the next one exist.
    ///
    /// Returns the partitions created by this call.
    pub async fn ensure_upcoming_partitions(&self, now: DateTime<Utc>) -> Result<Vec<Period>> {
        let current = Period::of(now);
        let mut created = Vec::new();
        for period in [current, current.next()] {
            if self.store.ensure_partition(period).await? {
                info!(%period, "ledger partition created");
                created.push(period);
            }
        }
        Ok(created)
    }

    /// Resolve temp blobs left by an interrupted ingest.
    ///
    /// Run at startup, before accepting writes: a temp blob whose document
    /// has not committed yet is indistinguishable from an orphan.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for (id, path) in self.blobs.pending().await? {
            let Some(id) = id else {
                warn!(path = %path.display(), "unrecognized file in temp directory");
                report.skipped.push(path);
                continue;
            };

            match self.store.get_document(&id).await? {
                None => {
                    remove(&path).await?;
                    info!(document_id = %id, "removed orphaned temp blob");
                    report.orphaned.push(id);
                }
                Some(document) if self.blobs.exists(&document.stored_path).await? => {
                    remove(&path).await?;
                    debug!(document_id = %id, "temp blob already published");
                    report.discarded.push(id);
                }
                Some(document) => {
                    let digest = digest_file(&path).await?;
                    let intact = digest.map_or(false, |d| {
                        d.size == document.size && d.content_hash == document.content_hash
                    });
                    if !intact {
                        warn!(document_id = %id, path = %path.display(), "temp blob does not match record");
                        report.skipped.push(path);
                        continue;
                    }
                    self.blobs.publish(&path, &document.stored_path).await?;
                    info!(document_id = %id, stored_path = %document.stored_path, "published pending blob");
                    report.published.push(id);
                }
            }
        }

        Ok(report)
    }
}

async fn remove(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use custody_store::MemoryStore;

    fn vault(dir: &Path, config: VaultConfig) -> Vault<MemoryStore> {
        Vault::new(MemoryStore::new(), dir, config)
    }

    #[tokio::test]
    async fn test_validation_rejects_before_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(
            dir.path(),
            VaultConfig {
                max_document_bytes: 4,
                ..Default::default()
            },
        );

        let cases = [
            (DocumentMetadata::new("", "text/plain"), "abc"),
            (DocumentMetadata::new("a/b.txt", "text/plain"), "abc"),
            (DocumentMetadata::new("a.txt", ""), "abc"),
            (DocumentMetadata::new("a.txt", "text/plain"), ""),
            (DocumentMetadata::new("a.txt", "text/plain"), "too long"),
        ];
        for (metadata, content) in cases {
            let err = vault.store(metadata, Bytes::from(content)).await.unwrap_err();
            assert!(matches!(err, VaultError::Validation(_)), "{err}");
        }
        assert!(vault.blobs().pending().await.unwrap().is_empty());
        assert!(vault.ledger_page(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ticket_body_must_be_object() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(dir.path(), VaultConfig::default());
        let ticket = TicketSubmission {
            body: serde_json::json!([1, 2, 3]),
            metadata: Default::default(),
        };
        assert!(matches!(
            vault.store_ticket(ticket).await,
            Err(VaultError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_required_evidence_without_signer_fails() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(
            dir.path(),
            VaultConfig {
                evidence: EvidencePolicy::Required,
                ..Default::default()
            },
        );

        let err = vault
            .store(DocumentMetadata::new("a.txt", "text/plain"), Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Signing(SigningError::KeyUnavailable(_))));
        assert!(vault
            .backend()
            .find_by_content_hash(&ContentHash::compute(b"abc"))
            .await
            .unwrap()
            .is_none());
        assert!(vault.blobs().pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upcoming_partitions_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(dir.path(), VaultConfig::default());
        let now = Utc.with_ymd_and_hms(2026, 12, 15, 0, 0, 0).unwrap();

        let created = vault.ensure_upcoming_partitions(now).await.unwrap();
        assert_eq!(
            created,
            vec![Period::new(2026, 12).unwrap(), Period::new(2027, 1).unwrap()]
        );
        assert!(vault.ensure_upcoming_partitions(now).await.unwrap().is_empty());
    }
}
