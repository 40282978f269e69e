//! # Custody Core
//!
//! Pure primitives for tamper-evident document custody: identifiers, hashes,
//! canonical JSON, and evidence tokens.
//!
//! This crate contains no storage and no networking. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`DocumentId`] - Identity of a stored document
//! - [`ContentHash`] - SHA-256 of canonical content, the idempotency key
//! - [`ChainHash`] - A ledger chain value
//! - [`Document`] / [`LedgerEntry`] - The persisted records
//! - [`KeyRing`] - Ed25519 evidence signer/verifier with rotation
//!
//! ## Canonicalization
//!
//! Structured payloads are hashed over canonical JSON. See [`canonical`].

pub mod canonical;
pub mod clock;
pub mod crypto;
pub mod document;
pub mod error;
pub mod evidence;
pub mod types;

pub use canonical::{canonicalize, canonicalize_value, to_canonical_bytes};
pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{sha256, Ed25519PublicKey, Keypair, StreamingSha256};
pub use document::{
    BusinessMetadata, Document, DocumentKind, DocumentMetadata, EvidenceState, LedgerCursor,
    LedgerEntry, TicketSubmission,
};
pub use error::{CoreError, SigningError};
pub use evidence::{
    EvidencePayload, EvidenceSigner, EvidenceVerifier, Jwk, JwkSet, KeyRing, SignedToken,
};
pub use types::{ChainHash, ContentHash, DocumentId};
