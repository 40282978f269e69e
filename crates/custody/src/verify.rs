//! Verification engine.
//!
//! Cross-checks a document's database row, stored blob and ledger entry, and
//! optionally its evidence token. Detected tampering is reported in the
//! [`VerificationResult`], never raised; only infrastructure failures are
//! errors.

use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use custody_core::{
    to_canonical_bytes, Clock, ContentHash, Document, DocumentId, EvidencePayload,
    EvidenceSigner, EvidenceState, EvidenceVerifier, SigningError, SystemClock,
};
use custody_store::Store;

use crate::blob::BlobStore;
use crate::error::Result;

/// Which resource a check looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Database,
    File,
    Ledger,
    Evidence,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Component::Database => "database",
            Component::File => "file",
            Component::Ledger => "ledger",
            Component::Evidence => "evidence",
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Missing,
    Error,
    /// Noteworthy but does not invalidate the document.
    Warn,
}

impl CheckStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, CheckStatus::Missing | CheckStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub component: Component,
    pub status: CheckStatus,
    pub message: String,
}

/// Signed attestation of a verification outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationProof {
    /// SHA-256 of the canonical result, proof excluded.
    pub result_hash: ContentHash,
    pub token: String,
    pub key_id: String,
}

/// What a proof token signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPayload {
    pub document_id: DocumentId,
    pub result_hash: ContentHash,
    pub valid: bool,
    pub timestamp: DateTime<Utc>,
}

/// Structured verification report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub document_id: DocumentId,
    /// False if any check is `missing` or `error`.
    pub valid: bool,
    pub checks: Vec<Check>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<VerificationProof>,
}

impl VerificationResult {
    fn new(document_id: DocumentId, timestamp: DateTime<Utc>) -> Self {
        Self {
            document_id,
            valid: true,
            checks: Vec::new(),
            timestamp,
            errors: Vec::new(),
            proof: None,
        }
    }

    fn record(&mut self, component: Component, status: CheckStatus, message: impl Into<String>) {
        let message = message.into();
        if status.is_failure() {
            self.valid = false;
            self.errors.push(format!("{}: {message}", component.as_str()));
        }
        self.checks.push(Check {
            component,
            status,
            message,
        });
    }

    /// The check for `component`, if it ran.
    pub fn check(&self, component: Component) -> Option<&Check> {
        self.checks.iter().find(|c| c.component == component)
    }

    /// SHA-256 over the canonical JSON of this result without its proof.
    pub fn result_hash(&self) -> Result<ContentHash> {
        let unsigned = Self {
            proof: None,
            ..self.clone()
        };
        Ok(ContentHash::compute(&to_canonical_bytes(&unsigned)?))
    }
}

/// Runs verification pipelines.
pub struct VerificationEngine<S: Store> {
    store: Arc<S>,
    blobs: BlobStore,
    verifier: Option<Arc<dyn EvidenceVerifier>>,
    signer: Option<Arc<dyn EvidenceSigner>>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> Clone for VerificationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            blobs: self.blobs.clone(),
            verifier: self.verifier.clone(),
            signer: self.signer.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: Store> VerificationEngine<S> {
    pub fn new(store: Arc<S>, blobs: BlobStore) -> Self {
        Self {
            store,
            blobs,
            verifier: None,
            signer: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Also check evidence tokens against `verifier`'s key set.
    pub fn with_verifier(mut self, verifier: Arc<dyn EvidenceVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Sign proofs with `signer`.
    pub fn with_signer(mut self, signer: Arc<dyn EvidenceSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Verify one document.
    pub async fn verify(&self, id: &DocumentId) -> Result<VerificationResult> {
        let mut result = VerificationResult::new(*id, self.clock.now());

        let Some(document) = self.store.get_document(id).await? else {
            result.record(Component::Database, CheckStatus::Missing, "document not found");
            return Ok(result);
        };
        result.record(Component::Database, CheckStatus::Ok, "record found");

        if !self.check_file(&document, &mut result).await? {
            return Ok(result);
        }
        self.check_ledger(&document, &mut result).await?;
        if let Some(verifier) = &self.verifier {
            check_evidence(verifier.as_ref(), &document, &mut result).await;
        }

        debug!(document_id = %id, valid = result.valid, "document verified");
        Ok(result)
    }

    /// Verify and attach a signed proof when a signer is available.
    ///
    /// A signing failure leaves `proof` empty; the result itself stands.
    pub async fn verify_with_proof(&self, id: &DocumentId) -> Result<VerificationResult> {
        let mut result = self.verify(id).await?;
        let Some(signer) = &self.signer else {
            warn!(document_id = %id, "no signer configured, proof omitted");
            return Ok(result);
        };

        match sign_result(signer.as_ref(), &result).await {
            Ok(proof) => result.proof = Some(proof),
            Err(e) => warn!(document_id = %id, error = %e, "proof signing failed, proof omitted"),
        }
        Ok(result)
    }

    /// Whether `result` carries a proof that validates and matches it.
    pub async fn check_proof(&self, result: &VerificationResult) -> Result<bool> {
        let (Some(proof), Some(verifier)) = (&result.proof, &self.verifier) else {
            return Ok(false);
        };
        let expected = result.result_hash()?;
        if proof.result_hash != expected {
            return Ok(false);
        }
        let payload = match verifier.verify(&proof.token).await {
            Ok(bytes) => serde_json::from_slice::<ProofPayload>(&bytes)
                .map_err(|e| SigningError::Payload(e.to_string()))?,
            Err(SigningError::SignatureInvalid | SigningError::UnknownKey(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(payload.result_hash == expected
            && payload.document_id == result.document_id
            && payload.valid == result.valid)
    }

    /// File check. Returns `false` when verification must stop.
    async fn check_file(&self, document: &Document, result: &mut VerificationResult) -> Result<bool> {
        let digest = match self.blobs.inspect(&document.stored_path).await {
            Ok(digest) => digest,
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                result.record(Component::File, CheckStatus::Error, e.to_string());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let failure = match digest {
            None => Some(format!("blob missing at {}", document.stored_path)),
            Some(d) if d.size != document.size => Some(format!(
                "size mismatch: recorded {} bytes, found {}",
                document.size, d.size
            )),
            Some(d) if d.content_hash != document.content_hash => Some(format!(
                "hash mismatch: recorded {}, found {}",
                document.content_hash, d.content_hash
            )),
            Some(_) => None,
        };

        match failure {
            Some(message) => {
                warn!(document_id = %document.id, %message, "file check failed");
                result.record(Component::File, CheckStatus::Error, message);
                Ok(false)
            }
            None => {
                result.record(Component::File, CheckStatus::Ok, "content matches recorded hash");
                Ok(true)
            }
        }
    }

    async fn check_ledger(&self, document: &Document, result: &mut VerificationResult) -> Result<()> {
        let Some(chain_hash) = &document.chain_hash else {
            result.record(Component::Ledger, CheckStatus::Warn, "ledger disabled or not linked");
            return Ok(());
        };

        match self.store.find_ledger_entry(&document.id, chain_hash).await? {
            Some(entry) => result.record(
                Component::Ledger,
                CheckStatus::Ok,
                format!("linked at seq {}", entry.seq),
            ),
            None => {
                warn!(document_id = %document.id, %chain_hash, "ledger entry missing");
                result.record(
                    Component::Ledger,
                    CheckStatus::Error,
                    format!("no ledger entry for chain hash {chain_hash}"),
                );
            }
        }
        Ok(())
    }
}

async fn check_evidence(
    verifier: &dyn EvidenceVerifier,
    document: &Document,
    result: &mut VerificationResult,
) {
    let token = match (document.evidence_state, &document.evidence_token) {
        (EvidenceState::Disabled, None) => return,
        (EvidenceState::Unsigned, None) => {
            result.record(Component::Evidence, CheckStatus::Warn, "stored without evidence");
            return;
        }
        (EvidenceState::Signed, Some(token)) => token,
        (state, _) => {
            result.record(
                Component::Evidence,
                CheckStatus::Error,
                format!("evidence state {} inconsistent with token", state.as_str()),
            );
            return;
        }
    };

    let expected = EvidencePayload::new(document.id, document.content_hash, document.created_at);
    match verifier.verify_evidence(token).await {
        Ok(payload) if payload == expected => {
            result.record(Component::Evidence, CheckStatus::Ok, "token valid");
        }
        Ok(_) => result.record(
            Component::Evidence,
            CheckStatus::Error,
            "token payload does not match record",
        ),
        Err(e) => result.record(Component::Evidence, CheckStatus::Error, e.to_string()),
    }
}

async fn sign_result(
    signer: &dyn EvidenceSigner,
    result: &VerificationResult,
) -> Result<VerificationProof> {
    let result_hash = result.result_hash()?;
    let payload = ProofPayload {
        document_id: result.document_id,
        result_hash,
        valid: result.valid,
        timestamp: result.timestamp,
    };
    let signed = signer.sign(&to_canonical_bytes(&payload)?).await?;
    Ok(VerificationProof {
        result_hash,
        token: signed.token,
        key_id: signed.key_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warn_keeps_result_valid() {
        let mut result = VerificationResult::new(DocumentId::new(), Utc::now());
        result.record(Component::Database, CheckStatus::Ok, "record found");
        result.record(Component::Ledger, CheckStatus::Warn, "ledger disabled or not linked");
        assert!(result.valid);
        assert!(result.errors.is_empty());

        result.record(Component::Evidence, CheckStatus::Error, "bad token");
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["evidence: bad token".to_string()]);
    }

    #[test]
    fn test_result_hash_ignores_proof() {
        let mut result = VerificationResult::new(DocumentId::new(), Utc::now());
        result.record(Component::Database, CheckStatus::Ok, "record found");
        let before = result.result_hash().unwrap();
        result.proof = Some(VerificationProof {
            result_hash: before,
            token: "t".into(),
            key_id: "k".into(),
        });
        assert_eq!(result.result_hash().unwrap(), before);
    }

    #[test]
    fn test_statuses_serialize_lowercase() {
        let check = Check {
            component: Component::File,
            status: CheckStatus::Missing,
            message: "gone".into(),
        };
        assert_eq!(
            serde_json::to_string(&check).unwrap(),
            r#"{"component":"file","status":"missing","message":"gone"}"#
        );
    }
}
