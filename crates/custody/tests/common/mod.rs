//! Shared setup for integration tests, on top of the testkit fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use custody::core::{DocumentMetadata, EvidenceSigner, SignedToken, SigningError};
use custody::store::{MemoryStore, SqliteStore};
use custody::VaultConfig;

pub use custody_testkit::TestVault as Harness;

pub fn start() -> DateTime<Utc> {
    custody_testkit::fixture_epoch()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn memory(config: VaultConfig) -> Harness<MemoryStore> {
    init_tracing();
    Harness::memory_with(config)
}

pub fn sqlite(config: VaultConfig) -> Harness<SqliteStore> {
    init_tracing();
    Harness::sqlite_with(config)
}

pub fn metadata(filename: &str) -> DocumentMetadata {
    DocumentMetadata::new(filename, "application/octet-stream")
}

/// A signer whose key service is down.
pub struct UnavailableSigner;

#[async_trait]
impl EvidenceSigner for UnavailableSigner {
    async fn sign(&self, _payload: &[u8]) -> Result<SignedToken, SigningError> {
        Err(SigningError::KeyUnavailable("key service unreachable".into()))
    }
}
