//! # Custody
//!
//! Tamper-evident custody of business documents: a content-addressed vault,
//! a hash-chained ledger, evidence tokens and a verification engine.
//!
//! ## Overview
//!
//! - **Vault**: stores content once per content hash, writes the blob
//!   atomically after the database commit
//! - **Ledger**: a single append-only hash chain across monthly partitions
//! - **Evidence**: Ed25519 tokens binding document id, content hash and time
//! - **Verification**: cross-checks row, blob, ledger entry and token
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use custody::{Vault, VaultConfig};
//! use custody::core::{DocumentMetadata, KeyRing, Keypair};
//! use custody::store::SqliteStore;
//!
//! async fn example() -> custody::Result<()> {
//!     let store = SqliteStore::open("custody.db")?;
//!     let keys = Arc::new(KeyRing::new(Keypair::generate()));
//!     let vault = Vault::new(store, "blobs", VaultConfig::default()).with_key_ring(keys);
//!
//!     // Finish any ingest interrupted by a crash.
//!     vault.reconcile().await?;
//!
//!     let outcome = vault
//!         .store(
//!             DocumentMetadata::new("invoice.pdf", "application/pdf"),
//!             Bytes::from_static(b"%PDF-1.7 ..."),
//!         )
//!         .await?;
//!
//!     let report = vault.verify(&outcome.document.id).await?;
//!     assert!(report.valid);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `custody::core` - Primitives (hashes, canonical JSON, evidence)
//! - `custody::store` - Storage traits, SQLite and in-memory backends

pub mod audit;
pub mod blob;
pub mod config;
pub mod error;
pub mod ledger;
pub mod vault;
pub mod verify;

pub use custody_core as core;
pub use custody_store as store;

pub use audit::{audit_chain, BreakKind, ChainBreak, ChainReport};
pub use blob::{BlobDigest, BlobStore, TempBlob};
pub use config::{EvidencePolicy, VaultConfig};
pub use error::{Result, VaultError};
pub use ledger::Ledger;
pub use vault::{IngestStatus, ReconcileReport, StoreOutcome, Vault};
pub use verify::{
    Check, CheckStatus, Component, ProofPayload, VerificationEngine, VerificationProof,
    VerificationResult,
};

pub use custody_core::{
    canonicalize, ChainHash, ContentHash, Document, DocumentId, DocumentMetadata, LedgerEntry,
    TicketSubmission,
};
