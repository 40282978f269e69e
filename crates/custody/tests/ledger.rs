//! Ledger: linkage across partitions, concurrent appends, audits.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{Duration, TimeZone, Utc};
use tokio::task::JoinSet;

use custody::core::{ChainHash, Clock};
use custody::store::{Period, Store};
use custody::{BreakKind, Component, CheckStatus, Vault, VaultConfig};

use common::{memory, metadata, sqlite, Harness};

async fn link_across_month_boundary<S: Store>(h: Harness<S>) -> anyhow::Result<()> {
    h.clock.set(Utc.with_ymd_and_hms(2026, 10, 31, 23, 59, 59).unwrap());
    let october = h.vault.store(metadata("oct.txt"), Bytes::from_static(b"last of october")).await?;

    h.clock.advance(Duration::seconds(1));
    let november = h.vault.store(metadata("nov.txt"), Bytes::from_static(b"first of november")).await?;

    let page = h.vault.ledger_page(None, 10).await?;
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].document_id, october.document.id);
    assert_eq!(page[0].previous_hash, None);
    assert_eq!(page[1].document_id, november.document.id);
    assert_eq!(page[1].previous_hash, Some(page[0].hash));
    assert_eq!(page[1].seq, page[0].seq + 1);
    assert_eq!(
        page[1].hash,
        ChainHash::link(Some(&page[0].hash), &november.document.content_hash)
    );

    assert!(november.document.stored_path.starts_with("2026/11/01/"));
    assert_eq!(
        h.vault.backend().partitions().await?,
        vec![Period::new(2026, 10).unwrap(), Period::new(2026, 11).unwrap()]
    );
    assert!(h.vault.audit_chain().await?.is_intact());
    Ok(())
}

#[tokio::test]
async fn test_month_boundary_links_to_prior_partition_memory() -> anyhow::Result<()> {
    link_across_month_boundary(memory(VaultConfig::default())).await
}

#[tokio::test]
async fn test_month_boundary_links_to_prior_partition_sqlite() -> anyhow::Result<()> {
    link_across_month_boundary(sqlite(VaultConfig::default())).await
}

#[tokio::test]
async fn test_precreated_empty_partition_still_links() -> anyhow::Result<()> {
    let h = sqlite(VaultConfig::default());
    h.clock.set(Utc.with_ymd_and_hms(2026, 10, 31, 12, 0, 0).unwrap());
    let first = h.vault.store(metadata("a.txt"), Bytes::from_static(b"a")).await?;

    let created = h.vault.ensure_upcoming_partitions(h.clock.now()).await?;
    assert_eq!(created, vec![Period::new(2026, 11).unwrap()]);

    h.clock.set(Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 1).unwrap());
    let second = h.vault.store(metadata("b.txt"), Bytes::from_static(b"b")).await?;

    let entries = h.vault.backend().ledger_entries_for(&second.document.id).await?;
    assert_eq!(entries[0].previous_hash, first.document.chain_hash);
    Ok(())
}

#[tokio::test]
async fn test_clock_behind_tail_keeps_order() -> anyhow::Result<()> {
    let h = memory(VaultConfig::default());
    let first = h.vault.store(metadata("a.txt"), Bytes::from_static(b"a")).await?;

    h.clock.set(common::start() - Duration::minutes(5));
    let second = h.vault.store(metadata("b.txt"), Bytes::from_static(b"b")).await?;

    let page = h.vault.ledger_page(None, 10).await?;
    assert_eq!(page.len(), 2);
    assert_eq!(page[1].document_id, second.document.id);
    assert_eq!(page[1].previous_hash, first.document.chain_hash);
    assert!(page[1].timestamp >= page[0].timestamp);
    Ok(())
}

async fn concurrent_appends_form_one_chain<S: Store + 'static>(h: Harness<S>) -> anyhow::Result<()> {
    const WRITERS: usize = 16;
    // The fixture directory lives as long as `h`.
    let vault: Arc<Vault<S>> = Arc::new(h.vault);

    let mut tasks = JoinSet::new();
    for i in 0..WRITERS {
        let vault = Arc::clone(&vault);
        tasks.spawn(async move {
            let content = Bytes::from(format!("concurrent document {i}"));
            vault.store(metadata(&format!("doc-{i}.txt")), content).await
        });
    }
    let mut ids = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined??;
        assert!(outcome.is_new());
        ids.insert(outcome.document.id);
    }
    assert_eq!(ids.len(), WRITERS);

    let report = vault.audit_chain().await?;
    assert!(report.is_intact(), "breaks: {:?}", report.breaks);
    assert_eq!(report.entries, WRITERS as u64);

    let page = vault.ledger_page(None, 100).await?;
    let previous: HashSet<_> = page.iter().map(|e| e.previous_hash).collect();
    assert_eq!(previous.len(), WRITERS, "two entries share a predecessor");
    let seqs: Vec<u64> = page.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=WRITERS as u64).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_memory() -> anyhow::Result<()> {
    concurrent_appends_form_one_chain(memory(VaultConfig::default())).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_sqlite() -> anyhow::Result<()> {
    concurrent_appends_form_one_chain(sqlite(VaultConfig::default())).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_store_once() -> anyhow::Result<()> {
    let h = sqlite(VaultConfig::default());
    let vault = Arc::new(h.vault);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let vault = Arc::clone(&vault);
        tasks.spawn(async move {
            vault
                .store(metadata("same.txt"), Bytes::from_static(b"identical payload"))
                .await
        });
    }

    let mut created = 0;
    let mut ids = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(outcome) => {
                created += usize::from(outcome.is_new());
                ids.insert(outcome.document.id);
            }
            Err(e) => assert!(e.is_retryable(), "unexpected error: {e}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);
    assert_eq!(vault.ledger_page(None, 10).await?.len(), 1);
    assert!(vault.blobs().pending().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_paging_resumes_after_cursor() -> anyhow::Result<()> {
    let h = memory(VaultConfig::default());
    for i in 0..5u8 {
        h.vault.store(metadata("p.txt"), Bytes::from(vec![b'a' + i])).await?;
        h.clock.advance(Duration::milliseconds(10));
    }

    let first = h.vault.ledger_page(None, 2).await?;
    let second = h.vault.ledger_page(Some(first[1].cursor()), 2).await?;
    let rest = h.vault.ledger_page(Some(second[1].cursor()), 10).await?;

    let seqs: Vec<u64> = first.iter().chain(&second).chain(&rest).map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert!(h.vault.ledger_page(None, 0).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_audit_detects_rewritten_entry() -> anyhow::Result<()> {
    let h = sqlite(VaultConfig::default());
    let mut docs = Vec::new();
    for content in [&b"one"[..], b"two", b"three"] {
        docs.push(h.vault.store(metadata("x.txt"), Bytes::from_static(content)).await?.document);
    }

    let forged = ChainHash::link(None, &docs[1].content_hash);
    let conn = rusqlite::Connection::open(h.db_path())?;
    let table = Period::of(common::start()).table_name();
    let changed = conn.execute(
        &format!("UPDATE {table} SET hash = ?1, previous_hash = NULL WHERE seq = 2"),
        [forged.to_hex()],
    )?;
    assert_eq!(changed, 1);
    drop(conn);

    let report = h.vault.audit_chain().await?;
    assert!(!report.is_intact());
    assert_eq!(report.entries, 3);
    let kinds: Vec<(u64, &BreakKind)> = report.breaks.iter().map(|b| (b.seq, &b.kind)).collect();
    assert!(matches!(kinds[0], (2, BreakKind::PreviousMismatch { found: None, .. })));
    assert!(matches!(kinds[1], (3, BreakKind::PreviousMismatch { .. })));

    let result = h.vault.verify(&docs[1].id).await?;
    assert!(!result.valid);
    assert_eq!(result.check(Component::Ledger).unwrap().status, CheckStatus::Error);
    Ok(())
}

#[tokio::test]
async fn test_audit_detects_swapped_content_hash() -> anyhow::Result<()> {
    let h = sqlite(VaultConfig::default());
    let doc = h
        .vault
        .store(metadata("x.txt"), Bytes::from_static(b"original content"))
        .await?
        .document;

    let conn = rusqlite::Connection::open(h.db_path())?;
    let other = custody::ContentHash::compute(b"substituted content");
    conn.execute(
        "UPDATE documents SET content_hash = ?1 WHERE id = ?2",
        [other.to_hex(), doc.id.to_string()],
    )?;
    drop(conn);

    let report = h.vault.audit_chain().await?;
    assert_eq!(report.breaks.len(), 1);
    assert!(matches!(report.breaks[0].kind, BreakKind::HashMismatch { .. }));
    Ok(())
}
