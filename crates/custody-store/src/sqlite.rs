//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via `tokio::task::spawn_blocking`.
//!
//! Reads go through one shared connection. Every transaction opens its own
//! connection and starts with `BEGIN IMMEDIATE`, which takes the database
//! write lock up front: two transactions can never interleave appends, and a
//! transaction that cannot get the lock within the busy timeout fails with
//! [`StoreError::Busy`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row, ToSql, TransactionBehavior};
use tracing::warn;

use custody_core::{
    BusinessMetadata, ChainHash, ContentHash, Document, DocumentId, DocumentKind, EvidenceState,
    LedgerCursor, LedgerEntry,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::partition::Period;
use crate::traits::{InsertResult, Store, TailScope, Transaction, MAX_PAGE_SIZE};

/// Connection settings.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// How long a statement waits on a locked database before giving up.
    pub busy_timeout_ms: u64,
    /// Use write-ahead logging so readers never block on the writer.
    pub wal: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            wal: true,
        }
    }
}

/// SQLite-based store implementation.
pub struct SqliteStore {
    path: PathBuf,
    config: SqliteConfig,
    /// Connection used for reads outside transactions.
    reader: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open the database at `path` with default settings.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, SqliteConfig::default())
    }

    /// Open the database at `path`.
    pub fn open_with(path: impl AsRef<Path>, config: SqliteConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut conn = connect(&path, &config)?;
        if config.wal {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
        }
        migration::migrate(&mut conn)?;

        Ok(Self {
            path,
            config,
            reader: Arc::new(Mutex::new(conn)),
        })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(Arc::clone(&self.reader), f).await
    }

    /// Run `f` in its own short write transaction.
    async fn write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = connect(&path, &config)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn connect(path: &Path, config: &SqliteConfig) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(conn)
}

/// Execute a blocking operation on a shared connection.
async fn run_blocking<F, T>(conn: Arc<Mutex<Connection>>, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| StoreError::Join(e.to_string()))?
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn to_micros(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

fn from_micros(us: i64) -> Result<DateTime<Utc>> {
    let secs = us.div_euclid(1_000_000);
    let nanos = (us.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp out of range: {us}")))
}

const DOCUMENT_COLUMNS: &str = "id, filename, content_type, size, content_hash, stored_path, \
     created_at, evidence_token, evidence_state, chain_hash, kind, source_system, external_id, \
     session_id, terminal_id, cashier_name, total_minor, currency, issued_at";

/// A `documents` row as stored.
struct DocumentRow {
    id: String,
    filename: String,
    content_type: String,
    size: i64,
    content_hash: String,
    stored_path: String,
    created_at: i64,
    evidence_token: Option<String>,
    evidence_state: String,
    chain_hash: Option<String>,
    kind: Option<String>,
    source_system: Option<String>,
    external_id: Option<String>,
    session_id: Option<String>,
    terminal_id: Option<String>,
    cashier_name: Option<String>,
    total_minor: Option<i64>,
    currency: Option<String>,
    issued_at: Option<i64>,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            content_type: row.get("content_type")?,
            size: row.get("size")?,
            content_hash: row.get("content_hash")?,
            stored_path: row.get("stored_path")?,
            created_at: row.get("created_at")?,
            evidence_token: row.get("evidence_token")?,
            evidence_state: row.get("evidence_state")?,
            chain_hash: row.get("chain_hash")?,
            kind: row.get("kind")?,
            source_system: row.get("source_system")?,
            external_id: row.get("external_id")?,
            session_id: row.get("session_id")?,
            terminal_id: row.get("terminal_id")?,
            cashier_name: row.get("cashier_name")?,
            total_minor: row.get("total_minor")?,
            currency: row.get("currency")?,
            issued_at: row.get("issued_at")?,
        })
    }
}

impl TryFrom<DocumentRow> for Document {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self> {
        let evidence_state = EvidenceState::parse(&row.evidence_state).ok_or_else(|| {
            StoreError::InvalidData(format!("unknown evidence state: {}", row.evidence_state))
        })?;
        let kind = row
            .kind
            .as_deref()
            .map(|k| {
                DocumentKind::parse(k)
                    .ok_or_else(|| StoreError::InvalidData(format!("unknown document kind: {k}")))
            })
            .transpose()?;

        Ok(Document {
            id: row.id.parse()?,
            filename: row.filename,
            content_type: row.content_type,
            size: u64::try_from(row.size)
                .map_err(|_| StoreError::InvalidData(format!("negative size: {}", row.size)))?,
            content_hash: ContentHash::from_hex(&row.content_hash)?,
            stored_path: row.stored_path,
            created_at: from_micros(row.created_at)?,
            evidence_token: row.evidence_token,
            evidence_state,
            chain_hash: row.chain_hash.as_deref().map(ChainHash::from_hex).transpose()?,
            metadata: BusinessMetadata {
                kind,
                source_system: row.source_system,
                external_id: row.external_id,
                session_id: row.session_id,
                terminal_id: row.terminal_id,
                cashier_name: row.cashier_name,
                total_minor: row.total_minor,
                currency: row.currency,
                issued_at: row.issued_at.map(from_micros).transpose()?,
            },
        })
    }
}

const ENTRY_COLUMNS: &str = "seq, document_id, hash, previous_hash, timestamp, evidence_token";

struct EntryRow {
    seq: i64,
    document_id: String,
    hash: String,
    previous_hash: Option<String>,
    timestamp: i64,
    evidence_token: Option<String>,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get("seq")?,
            document_id: row.get("document_id")?,
            hash: row.get("hash")?,
            previous_hash: row.get("previous_hash")?,
            timestamp: row.get("timestamp")?,
            evidence_token: row.get("evidence_token")?,
        })
    }
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(LedgerEntry {
            seq: u64::try_from(row.seq)
                .map_err(|_| StoreError::InvalidData(format!("negative seq: {}", row.seq)))?,
            document_id: row.document_id.parse()?,
            hash: ChainHash::from_hex(&row.hash)?,
            previous_hash: row.previous_hash.as_deref().map(ChainHash::from_hex).transpose()?,
            timestamp: from_micros(row.timestamp)?,
            evidence_token: row.evidence_token,
        })
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidData(format!("{what} too large: {value}")))
}

// ---------------------------------------------------------------------------
// Partitioned ledger queries
// ---------------------------------------------------------------------------

/// Registered partitions, ascending.
fn registered_periods(conn: &Connection) -> Result<Vec<Period>> {
    let mut stmt = conn.prepare("SELECT period FROM ledger_partitions ORDER BY period")?;
    let labels = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    labels.iter().map(|label| label.parse()).collect()
}

/// Run `filter` over the union of the given partitions.
///
/// Table names are derived from [`Period`], never read back from the
/// registry, so only digits are spliced into the statement.
fn query_entries(
    conn: &Connection,
    periods: &[Period],
    filter: &str,
    tail: &str,
    params: &[(&str, &dyn ToSql)],
) -> Result<Vec<LedgerEntry>> {
    if periods.is_empty() {
        return Ok(Vec::new());
    }

    let selects: Vec<String> = periods
        .iter()
        .map(|p| format!("SELECT {ENTRY_COLUMNS} FROM {} WHERE {filter}", p.table_name()))
        .collect();
    let sql = format!("SELECT * FROM ({}) {tail}", selects.join(" UNION ALL "));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, EntryRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(LedgerEntry::try_from).collect()
}

fn find_entry(conn: &Connection, document_id: &str, hash: &str) -> Result<Option<LedgerEntry>> {
    let periods = registered_periods(conn)?;
    let mut found = query_entries(
        conn,
        &periods,
        "document_id = :doc AND hash = :hash",
        "LIMIT 1",
        named_params! { ":doc": document_id, ":hash": hash },
    )?;
    Ok(found.pop())
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let path = self.path.clone();
        let config = self.config.clone();

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = connect(&path, &config)?;
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;

        Ok(Box::new(SqliteTransaction {
            conn: Arc::new(Mutex::new(conn)),
            open: true,
        }))
    }

    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>> {
        let id = id.to_string();
        self.read(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                    params![id],
                    DocumentRow::from_row,
                )
                .optional()?;
            row.map(Document::try_from).transpose()
        })
        .await
    }

    async fn find_by_content_hash(&self, hash: &ContentHash) -> Result<Option<Document>> {
        let hash = hash.to_hex();
        self.read(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE content_hash = ?1"),
                    params![hash],
                    DocumentRow::from_row,
                )
                .optional()?;
            row.map(Document::try_from).transpose()
        })
        .await
    }

    async fn find_ledger_entry(
        &self,
        document_id: &DocumentId,
        hash: &ChainHash,
    ) -> Result<Option<LedgerEntry>> {
        let document_id = document_id.to_string();
        let hash = hash.to_hex();
        self.read(move |conn| find_entry(conn, &document_id, &hash))
            .await
    }

    async fn ledger_entries_for(&self, document_id: &DocumentId) -> Result<Vec<LedgerEntry>> {
        let document_id = document_id.to_string();
        self.read(move |conn| {
            let periods = registered_periods(conn)?;
            query_entries(
                conn,
                &periods,
                "document_id = :doc",
                "ORDER BY timestamp, seq",
                named_params! { ":doc": document_id },
            )
        })
        .await
    }

    async fn ledger_page(
        &self,
        after: Option<LedgerCursor>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let limit = limit.min(MAX_PAGE_SIZE);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (ts, seq) = match after {
            Some(cursor) => (to_micros(cursor.timestamp), to_i64(cursor.seq, "seq")?),
            None => (i64::MIN, -1),
        };

        self.read(move |conn| {
            let periods = registered_periods(conn)?;
            query_entries(
                conn,
                &periods,
                "timestamp > :ts OR (timestamp = :ts AND seq > :seq)",
                "ORDER BY timestamp, seq LIMIT :limit",
                named_params! { ":ts": ts, ":seq": seq, ":limit": limit as i64 },
            )
        })
        .await
    }

    async fn ensure_partition(&self, period: Period) -> Result<bool> {
        self.write(move |conn| migration::ensure_partition_table(conn, period))
            .await
    }

    async fn partitions(&self) -> Result<Vec<Period>> {
        self.read(|conn| registered_periods(conn)).await
    }
}

/// A write transaction on its own connection.
pub struct SqliteTransaction {
    conn: Arc<Mutex<Connection>>,
    /// Cleared once COMMIT or ROLLBACK succeeded.
    open: bool,
}

impl SqliteTransaction {
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(Arc::clone(&self.conn), f).await
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn insert_document(&mut self, document: &Document) -> Result<InsertResult> {
        let doc = document.clone();
        let size = to_i64(doc.size, "size")?;

        self.run(move |conn| {
            let meta = &doc.metadata;
            let changed = conn.execute(
                &format!(
                    "INSERT INTO documents ({DOCUMENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                             ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                     ON CONFLICT DO NOTHING"
                ),
                params![
                    doc.id.to_string(),
                    doc.filename,
                    doc.content_type,
                    size,
                    doc.content_hash.to_hex(),
                    doc.stored_path,
                    to_micros(doc.created_at),
                    doc.evidence_token,
                    doc.evidence_state.as_str(),
                    doc.chain_hash.as_ref().map(ChainHash::to_hex),
                    meta.kind.map(DocumentKind::as_str),
                    meta.source_system,
                    meta.external_id,
                    meta.session_id,
                    meta.terminal_id,
                    meta.cashier_name,
                    meta.total_minor,
                    meta.currency,
                    meta.issued_at.map(to_micros),
                ],
            )?;

            Ok(if changed == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn record_evidence(
        &mut self,
        id: &DocumentId,
        token: Option<&str>,
        state: EvidenceState,
        chain_hash: Option<&ChainHash>,
    ) -> Result<()> {
        let id = id.to_string();
        let token = token.map(str::to_owned);
        let chain_hash = chain_hash.map(ChainHash::to_hex);

        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE documents
                 SET evidence_token = ?2, evidence_state = ?3, chain_hash = ?4
                 WHERE id = ?1 AND evidence_token IS NULL AND chain_hash IS NULL",
                params![id, token, state.as_str(), chain_hash],
            )?;
            if changed == 1 {
                return Ok(());
            }

            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM documents WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            if exists {
                Err(StoreError::InvalidData(format!(
                    "evidence for document {id} is already recorded"
                )))
            } else {
                Err(StoreError::NotFound(format!("document {id}")))
            }
        })
        .await
    }

    async fn lock_ledger_tail(&mut self, scope: TailScope) -> Result<Option<LedgerEntry>> {
        // The write lock is already held since BEGIN IMMEDIATE.
        self.run(move |conn| {
            let mut periods = registered_periods(conn)?;
            if let TailScope::From(from) = scope {
                periods.retain(|p| *p >= from);
            }
            let mut tail = query_entries(
                conn,
                &periods,
                "1",
                "ORDER BY timestamp DESC, seq DESC LIMIT 1",
                &[],
            )?;
            Ok(tail.pop())
        })
        .await
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<InsertResult> {
        let entry = entry.clone();
        let seq = to_i64(entry.seq, "seq")?;

        self.run(move |conn| {
            let period = Period::of(entry.timestamp);
            migration::ensure_partition_table(conn, period)?;

            let document_id = entry.document_id.to_string();
            let hash = entry.hash.to_hex();
            if find_entry(conn, &document_id, &hash)?.is_some() {
                return Ok(InsertResult::AlreadyExists);
            }

            let changed = conn.execute(
                &format!(
                    "INSERT INTO {} ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (document_id, hash) DO NOTHING",
                    period.table_name()
                ),
                params![
                    seq,
                    document_id,
                    hash,
                    entry.previous_hash.as_ref().map(ChainHash::to_hex),
                    to_micros(entry.timestamp),
                    entry.evidence_token,
                ],
            )?;

            Ok(if changed == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.run(|conn| {
            conn.execute_batch("COMMIT")?;
            Ok(())
        })
        .await?;
        self.open = false;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.run(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK")?;
            }
            Ok(())
        })
        .await?;
        self.open = false;
        Ok(())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        // A blocking call may still hold the connection if the owning future
        // was cancelled; closing the connection rolls back in that case.
        if let Ok(conn) = self.conn.try_lock() {
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!(error = %e, "rollback of abandoned transaction failed");
                }
            }
        }
    }
}
