//! Test fixtures and helpers.
//!
//! A [`TestVault`] is a fully wired vault in a temporary directory, with a
//! deterministic signing key and a manual clock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::RngCore;
use tempfile::TempDir;

use custody::{StoreOutcome, Vault, VaultConfig};
use custody_core::{Clock, DocumentMetadata, KeyRing, Keypair, ManualClock};
use custody_store::{MemoryStore, SqliteStore, Store};

/// Seed of the fixture signing key.
pub const FIXTURE_SEED: [u8; 32] = [0x42; 32];

const DB_FILE: &str = "custody.db";

/// A vault over `S` with everything it needs to run in a test.
pub struct TestVault<S: Store> {
    pub vault: Vault<S>,
    pub keys: Arc<KeyRing>,
    pub clock: Arc<ManualClock>,
    dir: TempDir,
}

impl TestVault<MemoryStore> {
    pub fn memory() -> Self {
        Self::memory_with(VaultConfig::default())
    }

    pub fn memory_with(config: VaultConfig) -> Self {
        Self::open_with(config, |_| MemoryStore::new())
    }
}

impl TestVault<SqliteStore> {
    pub fn sqlite() -> Self {
        Self::sqlite_with(VaultConfig::default())
    }

    pub fn sqlite_with(config: VaultConfig) -> Self {
        Self::open_with(config, |dir| {
            SqliteStore::open(dir.join(DB_FILE)).expect("open fixture database")
        })
    }
}

impl<S: Store> TestVault<S> {
    /// A vault over whatever store `open` builds inside the fixture
    /// directory, e.g. a backend wrapped to inject failures.
    pub fn open_with(config: VaultConfig, open: impl FnOnce(&Path) -> S) -> Self {
        let dir = tempdir();
        let store = open(dir.path());
        Self::build(dir, store, config)
    }

    fn build(dir: TempDir, store: S, config: VaultConfig) -> Self {
        let keys = Arc::new(KeyRing::new(Keypair::from_seed(&FIXTURE_SEED)));
        let clock = Arc::new(ManualClock::new(fixture_epoch()));
        let vault_clock: Arc<dyn Clock> = clock.clone();
        let vault = Vault::new(store, dir.path().join("blobs"), config)
            .with_key_ring(Arc::clone(&keys))
            .with_clock(vault_clock);
        Self {
            vault,
            keys,
            clock,
            dir,
        }
    }

    /// Path of the SQLite file, for tampering with rows directly.
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join(DB_FILE)
    }

    /// Root of the blob directory.
    pub fn blob_root(&self) -> PathBuf {
        self.dir.path().join("blobs")
    }

    /// Absolute path of a stored blob.
    pub fn blob_path(&self, stored_path: &str) -> PathBuf {
        self.blob_root().join(stored_path)
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Store `content` under a generic filename.
    pub async fn store_bytes(&self, content: impl Into<Bytes>) -> custody::Result<StoreOutcome> {
        self.vault
            .store(
                DocumentMetadata::new("fixture.bin", "application/octet-stream"),
                content.into(),
            )
            .await
    }

    /// Store `count` distinct random documents, advancing the clock by
    /// `step` between them.
    pub async fn store_many(&self, count: usize, step: Duration) -> custody::Result<Vec<StoreOutcome>> {
        let mut outcomes = Vec::with_capacity(count);
        for _ in 0..count {
            outcomes.push(self.store_bytes(random_content(256)).await?);
            self.clock.advance(step);
        }
        Ok(outcomes)
    }
}

/// The instant every fixture clock starts at.
pub fn fixture_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0)
        .single()
        .expect("fixture epoch is a valid instant")
}

/// `len` random bytes.
pub fn random_content(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len.max(1)];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

fn tempdir() -> TempDir {
    tempfile::tempdir().expect("create fixture directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_store_and_verify() {
        let fixture = TestVault::memory();
        let outcome = fixture.store_bytes(&b"fixture"[..]).await.unwrap();

        assert!(outcome.is_new());
        assert!(fixture.blob_path(&outcome.document.stored_path).exists());
        assert!(fixture.vault.verify(&outcome.document.id).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_store_many_builds_one_chain() {
        let fixture = TestVault::sqlite();
        let outcomes = fixture.store_many(5, Duration::days(10)).await.unwrap();

        assert_eq!(outcomes.len(), 5);
        let report = fixture.vault.audit_chain().await.unwrap();
        assert!(report.is_intact());
        assert_eq!(report.entries, 5);
        assert_eq!(report.head, outcomes[4].document.chain_hash);
    }

    #[test]
    fn test_fixture_key_is_deterministic() {
        let a = TestVault::memory();
        let b = TestVault::memory();
        assert_eq!(a.keys.active_key_id(), b.keys.active_key_id());
    }
}
