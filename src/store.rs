use crate::reading::SignalReading;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::info;

pub const DEFAULT_HISTORY_LIMIT: usize = 300;
pub const MAX_HISTORY_LIMIT: usize = 10_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading store I/O failed: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("reading store query failed: {0}")]
    Database(#[from] sqlx::Error),
}

// Window over stored history: `start <= timestamp < end`, newest `limit` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: usize,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl HistoryQuery {
    pub fn new(limit: Option<usize>, start: Option<i64>, end: Option<i64>) -> Self {
        Self {
            limit: limit
                .unwrap_or(DEFAULT_HISTORY_LIMIT)
                .min(MAX_HISTORY_LIMIT),
            start,
            end,
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start.is_none_or(|start| timestamp >= start)
            && self.end.is_none_or(|end| timestamp < end)
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

// Append/query contract shared by the device and the aggregator.
pub trait ReadingStore: Send + Sync {
    fn append(&self, reading: &SignalReading) -> Result<(), StoreError>;
    // Returned readings are in ascending timestamp order.
    fn query(&self, query: &HistoryQuery) -> Result<Vec<SignalReading>, StoreError>;
}

// Apply a query to readings in any order: filter, keep the newest `limit`, oldest first.
pub fn select_latest(mut readings: Vec<SignalReading>, query: &HistoryQuery) -> Vec<SignalReading> {
    readings.retain(|reading| query.contains(reading.timestamp));
    readings.sort_by_key(|reading| reading.timestamp);
    let skip = readings.len().saturating_sub(query.limit);
    readings.drain(..skip);
    readings
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS csq_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    rssi INTEGER,
    dbm REAL,
    ber INTEGER
)";
const CREATE_INDEX: &str = "CREATE INDEX IF NOT EXISTS csq_log_timestamp ON csq_log (timestamp)";
const INSERT_READING: &str = "INSERT INTO csq_log (timestamp, rssi, dbm, ber) VALUES (?1, ?2, ?3, ?4)";
// Plain range bounds so SQLite seeks on the timestamp index.
const SELECT_WINDOW: &str = "SELECT timestamp, rssi, dbm, ber FROM csq_log \
     WHERE timestamp >= ?1 AND timestamp < ?2 \
     ORDER BY timestamp DESC, id DESC LIMIT ?3";

type ReadingRow = (i64, Option<i64>, Option<f64>, Option<i64>);

/// SQLite-backed history in the `csq_log` table.
///
/// The store is called from plain threads and from the HTTP blocking pool, so
/// every query is driven to completion on the runtime behind `runtime`. It
/// must not be called from inside an async task.
pub struct SqliteStore {
    pool: SqlitePool,
    runtime: Handle,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: &Path, runtime: Handle) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = runtime.block_on(async {
            let pool = SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?;
            sqlx::query(CREATE_TABLE).execute(&pool).await?;
            sqlx::query(CREATE_INDEX).execute(&pool).await?;
            Ok::<_, sqlx::Error>(pool)
        })?;
        info!(path = %path.display(), "reading store ready");

        Ok(Self {
            pool,
            runtime,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReadingStore for SqliteStore {
    fn append(&self, reading: &SignalReading) -> Result<(), StoreError> {
        self.runtime.block_on(
            sqlx::query(INSERT_READING)
                .bind(reading.timestamp)
                .bind(reading.rssi.map(i64::from))
                .bind(reading.dbm)
                .bind(reading.ber.map(i64::from))
                .execute(&self.pool),
        )?;
        Ok(())
    }

    fn query(&self, query: &HistoryQuery) -> Result<Vec<SignalReading>, StoreError> {
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let rows: Vec<ReadingRow> = self.runtime.block_on(
            sqlx::query_as(SELECT_WINDOW)
                .bind(query.start.unwrap_or(i64::MIN))
                .bind(query.end.unwrap_or(i64::MAX))
                .bind(limit)
                .fetch_all(&self.pool),
        )?;
        // Newest first from the index; callers get them oldest first.
        Ok(rows.into_iter().rev().map(reading_from_row).collect())
    }
}

fn reading_from_row((timestamp, rssi, dbm, ber): ReadingRow) -> SignalReading {
    SignalReading {
        timestamp,
        rssi: rssi.and_then(|v| u32::try_from(v).ok()),
        dbm,
        ber: ber.and_then(|v| u32::try_from(v).ok()),
    }
}
