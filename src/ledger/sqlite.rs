use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::LedgerStore;
use crate::models::{LedgerEntry, MarketId, TransactionType, UserId};

/// SQLite-backed ledger. One transaction per appended batch.
#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

struct LedgerRow {
    id: String,
    user_id: i64,
    market_id: Option<i64>,
    amount: f64,
    transaction_type: String,
    description: String,
    timestamp: String,
}

impl LedgerRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            market_id: row.get(2)?,
            amount: row.get(3)?,
            transaction_type: row.get(4)?,
            description: row.get(5)?,
            timestamp: row.get(6)?,
        })
    }

    fn into_entry(self) -> Result<LedgerEntry> {
        let transaction_type = TransactionType::from_str(&self.transaction_type)
            .with_context(|| format!("unknown transaction type {:?}", self.transaction_type))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .with_context(|| format!("bad ledger timestamp {:?}", self.timestamp))?
            .with_timezone(&Utc);
        Ok(LedgerEntry {
            id: Uuid::parse_str(&self.id).context("bad ledger entry id")?,
            user_id: self.user_id as UserId,
            market_id: self.market_id.map(|m| m as MarketId),
            amount: self.amount,
            transaction_type,
            description: self.description,
            timestamp,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, user_id, market_id, amount, transaction_type, description, ts FROM ledger_entries";

impl SqliteLedger {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open ledger db")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory ledger db")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                user_id INTEGER NOT NULL,
                market_id INTEGER,
                amount REAL NOT NULL,
                transaction_type TEXT NOT NULL,
                description TEXT NOT NULL,
                ts TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ledger_user_seq ON ledger_entries(user_id, seq)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ledger_market_seq ON ledger_entries(market_id, seq)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn query(&self, sql: &str, filter: Option<i64>) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = match filter {
            Some(v) => stmt
                .query_map(params![v], LedgerRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map([], LedgerRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        rows.into_iter().map(LedgerRow::into_entry).collect()
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn append(&self, entries: &[LedgerEntry]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().context("begin ledger batch")?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO ledger_entries \
                 (id, user_id, market_id, amount, transaction_type, description, ts) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for e in entries {
                stmt.execute(params![
                    e.id.to_string(),
                    e.user_id as i64,
                    e.market_id.map(|m| m as i64),
                    e.amount,
                    e.transaction_type.as_str(),
                    &e.description,
                    e.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                ])
                .with_context(|| format!("insert ledger entry {}", e.id))?;
            }
        }
        tx.commit().context("commit ledger batch")?;
        Ok(())
    }

    async fn entries_for_user(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        let sql = format!("{} WHERE user_id = ?1 ORDER BY seq ASC", SELECT_COLUMNS);
        self.query(&sql, Some(user_id as i64)).await
    }

    async fn entries_for_market(&self, market_id: MarketId) -> Result<Vec<LedgerEntry>> {
        let sql = format!("{} WHERE market_id = ?1 ORDER BY seq ASC", SELECT_COLUMNS);
        self.query(&sql, Some(market_id as i64)).await
    }

    async fn all(&self) -> Result<Vec<LedgerEntry>> {
        let sql = format!("{} ORDER BY seq ASC", SELECT_COLUMNS);
        self.query(&sql, None).await
    }

    async fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM ledger_entries", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}
