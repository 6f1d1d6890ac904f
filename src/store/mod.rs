//! SQLite-backed usage table
//!
//! Narrow storage contract consumed by the core: transactional upsert
//! by identifier, date-range query ordered by timestamp, cost updates,
//! and a per-provider sync-state side table.

use crate::types::{LedgerError, Result, UsageRecord};
use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs::{self, File, OpenOptions};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS usage_record (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL,
  provider TEXT NOT NULL,
  model TEXT NOT NULL,
  input_tokens INTEGER NOT NULL,
  output_tokens INTEGER NOT NULL,
  reasoning_tokens INTEGER NOT NULL DEFAULT 0,
  cache_write_tokens INTEGER NOT NULL,
  cache_read_tokens INTEGER NOT NULL,
  cost REAL NOT NULL DEFAULT 0,
  ts INTEGER NOT NULL,
  date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_usage_record_date ON usage_record(date);
CREATE INDEX IF NOT EXISTS idx_usage_record_ts ON usage_record(ts);
CREATE TABLE IF NOT EXISTS sync_state (
  provider TEXT PRIMARY KEY,
  last_sync_at INTEGER NOT NULL,
  last_record_id TEXT
);
"#;

/// Per-provider bookkeeping row, upserted after a successful sync
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)] // read back through sync_state, exercised in tests
pub struct SyncState {
    pub provider: String,
    /// Epoch milliseconds of the last successful sync
    pub last_sync_at: i64,
    pub last_record_id: Option<String>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// In-memory table for tests
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert-or-replace by identifier. All rows commit in one
    /// transaction; any failure rolls the whole batch back.
    pub fn upsert(&mut self, records: &[UsageRecord]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut written = 0usize;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO usage_record (
                  id, session_id, provider, model, input_tokens, output_tokens,
                  reasoning_tokens, cache_write_tokens, cache_read_tokens, cost, ts, date
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
            )?;
            for record in records {
                stmt.execute(params![
                    record.id,
                    record.session_id,
                    record.provider,
                    record.model,
                    record.input_tokens as i64,
                    record.output_tokens as i64,
                    record.reasoning_tokens as i64,
                    record.cache_write_tokens as i64,
                    record.cache_read_tokens as i64,
                    record.cost,
                    record.timestamp.timestamp_millis(),
                    record.date.format("%Y-%m-%d").to_string(),
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Records with `start <= date <= end`, ordered by timestamp
    /// ascending. Lexicographic comparison on the date column is
    /// date-order-correct for YYYY-MM-DD.
    pub fn query_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UsageRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, session_id, provider, model, input_tokens, output_tokens,
                   reasoning_tokens, cache_write_tokens, cache_read_tokens, cost, ts, date
            FROM usage_record
            WHERE date >= ?1 AND date <= ?2
            ORDER BY ts ASC
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                start.format("%Y-%m-%d").to_string(),
                end.format("%Y-%m-%d").to_string()
            ],
            row_to_record,
        )?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Every stored record, ordered by timestamp ascending
    pub fn all_records(&self) -> Result<Vec<UsageRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, session_id, provider, model, input_tokens, output_tokens,
                   reasoning_tokens, cache_write_tokens, cache_read_tokens, cost, ts, date
            FROM usage_record
            ORDER BY ts ASC
            "#,
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn count_records(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM usage_record", [], |row| row.get(0))
            .map_err(LedgerError::from)
    }

    /// Single-field cost update for one record
    #[allow(dead_code)] // storage contract surface, exercised in tests
    pub fn update_cost(&self, id: &str, cost: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE usage_record SET cost = ?1 WHERE id = ?2",
            params![cost, id],
        )?;
        Ok(())
    }

    /// Batch cost update in one transaction; used by the recalculation
    /// pass so a mid-pass failure commits nothing.
    pub fn update_costs(&mut self, updates: &[(String, f64)]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut updated = 0usize;
        {
            let mut stmt = tx.prepare("UPDATE usage_record SET cost = ?1 WHERE id = ?2")?;
            for (id, cost) in updates {
                let rows = stmt.execute(params![cost, id])?;
                if rows > 0 {
                    updated += 1;
                }
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Upsert the sync-state row for a provider
    pub fn record_sync(
        &self,
        provider: &str,
        last_sync_at: i64,
        last_record_id: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO sync_state (provider, last_sync_at, last_record_id)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(provider) DO UPDATE SET
              last_sync_at = excluded.last_sync_at,
              last_record_id = excluded.last_record_id
            "#,
            params![provider, last_sync_at, last_record_id],
        )?;
        Ok(())
    }

    #[allow(dead_code)] // storage contract surface, exercised in tests
    pub fn sync_state(&self, provider: &str) -> Result<Option<SyncState>> {
        self.conn
            .query_row(
                r#"
                SELECT provider, last_sync_at, last_record_id
                FROM sync_state
                WHERE provider = ?1
                "#,
                params![provider],
                |row| {
                    Ok(SyncState {
                        provider: row.get(0)?,
                        last_sync_at: row.get(1)?,
                        last_record_id: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(LedgerError::from)
    }
}

fn row_to_record(row: &Row<'_>) -> std::result::Result<UsageRecord, rusqlite::Error> {
    let ts_millis: i64 = row.get(10)?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(ts_millis).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(10, ts_millis)
    })?;
    let date_text: String = row.get(11)?;
    let date = date_text.parse::<NaiveDate>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(UsageRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        provider: row.get(2)?,
        model: row.get(3)?,
        input_tokens: row.get::<_, i64>(4)? as u64,
        output_tokens: row.get::<_, i64>(5)? as u64,
        reasoning_tokens: row.get::<_, i64>(6)? as u64,
        cache_write_tokens: row.get::<_, i64>(7)? as u64,
        cache_read_tokens: row.get::<_, i64>(8)? as u64,
        cost: row.get(9)?,
        timestamp,
        date,
    })
}

/// Exclusive advisory lock on the data directory, held for the duration
/// of a mutating invocation. Concurrent external writers are undefined
/// behavior; this turns the common accident into a clean error.
pub struct WriteLock {
    _file: File,
}

impl WriteLock {
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let lock_path = data_dir.join("ledger.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        file.try_lock_exclusive().map_err(|_| {
            LedgerError::Config(format!(
                "another tokledger invocation holds the lock at {}",
                lock_path.display()
            ))
        })?;
        Ok(Self { _file: file })
    }
}
