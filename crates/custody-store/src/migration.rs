//! Database schema migrations for SQLite.
//!
//! Versioned: each migration moves the schema from version N to N+1. Ledger
//! partition tables are not part of the versioned schema; they are created on
//! demand by [`ensure_partition_table`] and listed in `ledger_partitions`.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};
use crate::partition::Period;

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, Utc::now().timestamp_micros()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: documents and the partition registry.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Documents: one row per distinct content hash
        CREATE TABLE documents (
            id TEXT PRIMARY KEY,                -- UUID
            filename TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            content_hash TEXT NOT NULL UNIQUE,  -- SHA-256, lowercase hex
            stored_path TEXT NOT NULL,          -- relative to the blob root
            created_at INTEGER NOT NULL,        -- Unix micros
            evidence_token TEXT,
            evidence_state TEXT NOT NULL,       -- signed | unsigned | disabled
            chain_hash TEXT,

            -- Business metadata, all optional
            kind TEXT,
            source_system TEXT,
            external_id TEXT,
            session_id TEXT,
            terminal_id TEXT,
            cashier_name TEXT,
            total_minor INTEGER,
            currency TEXT,
            issued_at INTEGER
        );

        -- One row per monthly ledger table
        CREATE TABLE ledger_partitions (
            period TEXT PRIMARY KEY,            -- YYYY-MM
            table_name TEXT NOT NULL UNIQUE,
            range_start INTEGER NOT NULL,       -- Unix micros, inclusive
            range_end INTEGER NOT NULL,         -- Unix micros, exclusive
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_documents_created ON documents(created_at);
        CREATE INDEX idx_documents_external ON documents(source_system, external_id);
        "#,
    )?;

    Ok(())
}

/// Create the ledger table for `period` and register it.
///
/// Returns `true` if the partition did not exist before. Must run inside a
/// write transaction so that table and registry row appear together.
pub fn ensure_partition_table(conn: &Connection, period: Period) -> Result<bool> {
    let table = period.table_name();
    let start = period.start().timestamp_micros();
    let end = period.end().timestamp_micros();

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            seq INTEGER PRIMARY KEY,
            document_id TEXT NOT NULL,
            hash TEXT NOT NULL,
            previous_hash TEXT,
            timestamp INTEGER NOT NULL CHECK (timestamp >= {start} AND timestamp < {end}),
            evidence_token TEXT,
            UNIQUE (document_id, hash)
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_order ON {table}(timestamp, seq);"
    ))?;

    let created = conn.execute(
        "INSERT INTO ledger_partitions (period, table_name, range_start, range_end, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT DO NOTHING",
        params![
            period.to_string(),
            table,
            start,
            end,
            Utc::now().timestamp_micros()
        ],
    )?;

    Ok(created == 1)
}
