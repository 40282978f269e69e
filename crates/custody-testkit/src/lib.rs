//! # Custody Testkit
//!
//! Testing utilities for custody.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: canonical JSON encodings and chain values every
//!   implementation must reproduce
//! - **Generators**: Proptest strategies for JSON, tickets and digests
//! - **Fixtures**: ready-to-use vaults with a fixed key and a manual clock
//!
//! ## Golden Vectors
//!
//! ```rust
//! use custody_testkit::vectors::verify_all_vectors;
//!
//! for (name, ok, actual) in verify_all_vectors() {
//!     assert!(ok, "{name}: {actual}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use custody_testkit::generators::TicketParams;
//!
//! proptest! {
//!     #[test]
//!     fn identity_ignores_cashier(params: TicketParams) {
//!         prop_assert_eq!(
//!             params.ticket.identity_bytes().unwrap(),
//!             params.resubmitted().identity_bytes().unwrap()
//!         );
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use custody_testkit::fixtures::TestVault;
//!
//! let fixture = TestVault::sqlite();
//! let outcome = fixture.store_bytes(&b"hello"[..]).await?;
//! assert!(fixture.vault.verify(&outcome.document.id).await?.valid);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{fixture_epoch, random_content, TestVault, FIXTURE_SEED};
pub use generators::TicketParams;
pub use vectors::{canonical_vectors, chain_vectors, verify_all_vectors, CanonicalVector, ChainVector};
