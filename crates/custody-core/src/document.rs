//! Documents, ledger entries, and business metadata.
//!
//! A [`Document`] is created once on ingestion and never mutated afterwards,
//! except that its evidence fields are filled in within the same transaction
//! that inserted it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical::canonicalize_value;
use crate::error::Result;
use crate::types::{ChainHash, ContentHash, DocumentId};

/// What kind of business document this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    Ticket,
    Other,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Ticket => "ticket",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invoice" => Some(Self::Invoice),
            "ticket" => Some(Self::Ticket),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Business fields attached to a document.
///
/// Every field is optional: ingestion accepts partial metadata. None of these
/// fields feed the content hash of a raw upload; for tickets only
/// `source_system`, `external_id` and `session_id` do (see
/// [`TicketSubmission::identity_bytes`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessMetadata {
    pub kind: Option<DocumentKind>,
    /// Originating system (POS vendor, ERP).
    pub source_system: Option<String>,
    /// Identifier assigned by the originating system.
    pub external_id: Option<String>,
    /// Till session or shift the document belongs to.
    pub session_id: Option<String>,
    pub terminal_id: Option<String>,
    pub cashier_name: Option<String>,
    /// Total in minor currency units.
    pub total_minor: Option<i64>,
    pub currency: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
}

/// Whether a document carries evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceState {
    /// A token was issued.
    Signed,
    /// Signing failed and policy allowed storing without evidence.
    Unsigned,
    /// Evidence was not requested.
    Disabled,
}

impl EvidenceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signed => "signed",
            Self::Unsigned => "unsigned",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "signed" => Some(Self::Signed),
            "unsigned" => Some(Self::Unsigned),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    /// Globally unique; the idempotency key.
    pub content_hash: ContentHash,
    /// Blob location, relative to the blob root.
    pub stored_path: String,
    pub created_at: DateTime<Utc>,
    pub evidence_token: Option<String>,
    pub evidence_state: EvidenceState,
    pub chain_hash: Option<ChainHash>,
    pub metadata: BusinessMetadata,
}

/// One entry of the hash-chained ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Monotonically increasing, starting at 1.
    pub seq: u64,
    pub document_id: DocumentId,
    pub hash: ChainHash,
    /// `None` only for the first entry ever appended.
    pub previous_hash: Option<ChainHash>,
    pub timestamp: DateTime<Utc>,
    pub evidence_token: Option<String>,
}

impl LedgerEntry {
    /// Position in the total order `(timestamp, seq)`.
    pub fn cursor(&self) -> LedgerCursor {
        LedgerCursor {
            timestamp: self.timestamp,
            seq: self.seq,
        }
    }
}

/// A position in the ledger's `(timestamp, seq)` order, for paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerCursor {
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
}

/// Caller-supplied description of a raw upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub business: BusinessMetadata,
}

impl DocumentMetadata {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            business: BusinessMetadata::default(),
        }
    }

    pub fn with_business(mut self, business: BusinessMetadata) -> Self {
        self.business = business;
        self
    }
}

/// A point-of-sale ticket submitted as structured JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketSubmission {
    /// The ticket body as produced by the till.
    pub body: Value,
    #[serde(default)]
    pub metadata: BusinessMetadata,
}

impl TicketSubmission {
    /// The bytes that define this ticket's business identity.
    ///
    /// Canonical JSON of the body plus source system, external id and
    /// session. Cashier, terminal, amounts and issue time are excluded, so
    /// editing them does not produce a new document.
    pub fn identity_bytes(&self) -> Result<Vec<u8>> {
        let mut identity = Map::new();
        identity.insert("body".into(), self.body.clone());
        identity.insert("external_id".into(), opt_string(&self.metadata.external_id));
        identity.insert("session_id".into(), opt_string(&self.metadata.session_id));
        identity.insert("source_system".into(), opt_string(&self.metadata.source_system));
        canonicalize_value(&Value::Object(identity))
    }
}

fn opt_string(v: &Option<String>) -> Value {
    v.as_ref().map_or(Value::Null, |s| Value::String(s.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ticket(cashier: &str) -> TicketSubmission {
        TicketSubmission {
            body: json!({"lines": [{"sku": "A-1", "qty": 2, "price": 3.50}], "total": 7.0}),
            metadata: BusinessMetadata {
                kind: Some(DocumentKind::Ticket),
                source_system: Some("till".into()),
                external_id: Some("T-0001".into()),
                session_id: Some("S-42".into()),
                cashier_name: Some(cashier.into()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_identity_ignores_cashier() {
        let a = ticket("Ana").identity_bytes().unwrap();
        let b = ticket("Bruno").identity_bytes().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_depends_on_session() {
        let a = ticket("Ana");
        let mut b = ticket("Ana");
        b.metadata.session_id = Some("S-43".into());
        assert_ne!(a.identity_bytes().unwrap(), b.identity_bytes().unwrap());
    }

    #[test]
    fn test_identity_is_canonical() {
        let bytes = ticket("Ana").identity_bytes().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"body":{"lines":[{"price":3.5,"qty":2,"sku":"A-1"}],"total":7},"external_id":"T-0001","session_id":"S-42","source_system":"till"}"#
        );
    }

    #[test]
    fn test_missing_identity_fields_are_dropped() {
        let t = TicketSubmission {
            body: json!({"n": 1}),
            metadata: BusinessMetadata::default(),
        };
        assert_eq!(t.identity_bytes().unwrap(), br#"{"body":{"n":1}}"#.to_vec());
    }

    #[test]
    fn test_enum_string_forms() {
        for kind in [DocumentKind::Invoice, DocumentKind::Ticket, DocumentKind::Other] {
            assert_eq!(DocumentKind::parse(kind.as_str()), Some(kind));
        }
        for state in [EvidenceState::Signed, EvidenceState::Unsigned, EvidenceState::Disabled] {
            assert_eq!(EvidenceState::parse(state.as_str()), Some(state));
        }
    }
}
