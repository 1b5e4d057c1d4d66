//! SQLite journal of closed trades.

use crate::ledger::Position;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

/// One row of the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub symbol: String,
    pub side: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub price_pnl: Decimal,
    pub funding_pnl: Decimal,
    pub total_pnl: Decimal,
}

/// Aggregate over every journaled trade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JournalSummary {
    pub trades: u64,
    pub winners: u64,
    pub total_pnl: Decimal,
    pub funding_pnl: Decimal,
    pub best: Option<Decimal>,
    pub worst: Option<Decimal>,
}

/// Closed trade log. Survives restarts; the in-memory ledger does not.
pub struct TradeJournal {
    conn: Mutex<Connection>,
}

fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl TradeJournal {
    /// Open (or create) the journal at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open journal at {:?}", path))?;
        let journal = Self::with_connection(conn)?;

        info!("Trade journal opened at {:?}", path);
        Ok(journal)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS closed_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                funding_time TEXT NOT NULL,
                funding_rate TEXT NOT NULL,
                price_pnl TEXT NOT NULL,
                funding_pnl TEXT NOT NULL,
                total_pnl TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_closed_exit_time ON closed_trades(exit_time);
            CREATE INDEX IF NOT EXISTS idx_closed_symbol ON closed_trades(symbol);
            "#,
        )
        .context("Failed to initialize journal schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("journal connection poisoned"))
    }

    /// Append a closed position. Open positions are ignored.
    pub fn record_closed(&self, position: &Position) -> Result<()> {
        let (Some(realized), Some(exit_price), Some(exit_time)) = (
            position.realized(),
            position.exit_price(),
            position.exit_time(),
        ) else {
            return Ok(());
        };

        self.lock()?.execute(
            r#"
            INSERT INTO closed_trades (order_id, symbol, side, size, entry_price, exit_price,
                                       entry_time, exit_time, funding_time, funding_rate,
                                       price_pnl, funding_pnl, total_pnl)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                position.order_id,
                position.symbol,
                position.side.as_str(),
                position.size.to_string(),
                position.entry_price.to_string(),
                exit_price.to_string(),
                position.entry_time.to_rfc3339(),
                exit_time.to_rfc3339(),
                position.funding_time.to_rfc3339(),
                position.funding_rate_at_entry.to_string(),
                realized.price_component.to_string(),
                realized.funding_component.to_string(),
                realized.total.to_string(),
            ],
        )?;

        debug!(symbol = %position.symbol, total_pnl = %realized.total, "Trade journaled");
        Ok(())
    }

    /// Most recent trades, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT symbol, side, size, entry_price, exit_price, entry_time, exit_time,
                   price_pnl, funding_pnl, total_pnl
            FROM closed_trades
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(JournalEntry {
                    symbol: row.get(0)?,
                    side: row.get(1)?,
                    size: decimal_column(row, 2)?,
                    entry_price: decimal_column(row, 3)?,
                    exit_price: decimal_column(row, 4)?,
                    entry_time: time_column(row, 5)?,
                    exit_time: time_column(row, 6)?,
                    price_pnl: decimal_column(row, 7)?,
                    funding_pnl: decimal_column(row, 8)?,
                    total_pnl: decimal_column(row, 9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Unreadable row in closed_trades")?;

        Ok(entries)
    }

    /// Totals across the whole journal.
    pub fn summary(&self) -> Result<JournalSummary> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT funding_pnl, total_pnl FROM closed_trades")?;
        let rows = stmt
            .query_map([], |row| Ok((decimal_column(row, 0)?, decimal_column(row, 1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Unreadable row in closed_trades")?;

        // PnL is stored as text, so aggregate here rather than in SQL
        let mut summary = JournalSummary::default();
        for (funding, total) in rows {
            summary.trades += 1;
            if total > Decimal::ZERO {
                summary.winners += 1;
            }
            summary.total_pnl += total;
            summary.funding_pnl += funding;
            summary.best = Some(summary.best.map_or(total, |b| b.max(total)));
            summary.worst = Some(summary.worst.map_or(total, |w| w.min(total)));
        }
        Ok(summary)
    }
}
