//! SQLite tick store.
//!
//! One database file holds every ticker's ticks and doubles as the resume
//! checkpoint: the newest stored timestamp per ticker tells the planner where
//! to pick up. A period is first staged in a connection-private temp table
//! while its file is parsed, then copied in a single `BEGIN IMMEDIATE`
//! transaction, so a crash mid-period never leaves partial rows behind.
//! Concurrent writers queue on SQLite's write lock (bounded by the busy
//! timeout) only for that copy, not for the download or the parse.

pub mod instruments;
pub mod schema;

use crate::domain::{TickRecord, Ticker};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use instruments::{default_catalogue, load_catalogue, FXCM_TICK_INSTRUMENTS};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot read instrument catalogue {path}: {source}")]
    Catalogue { path: PathBuf, source: csv::Error },

    #[error("stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a writer waits for another connection's lock.
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(30),
        }
    }
}

/// Rows written by one period transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// New rows.
    pub inserted: u64,
    /// Rows whose `(ticker, timestamp)` key already existed.
    pub duplicates: u64,
}

/// Handle on the tick database. Not shared between threads: every worker
/// opens its own.
pub struct TickStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl TickStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path, options: &StoreOptions) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(options.busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(path = %path.display(), %mode, "database is not in WAL mode");
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.ensure_schema()?;
        debug!(path = %path.display(), "tick store opened");
        Ok(store)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(schema::CREATE_SCHEMA)?;
        self.conn.execute_batch(schema::CREATE_STAGING)?;
        self.conn
            .execute(schema::ENSURE_VERSION, params![now_text()])?;
        Ok(())
    }

    /// Drop every table, recreate the schema and seed the instrument
    /// catalogue. All stored ticks are lost.
    pub fn reset(&mut self, catalogue: &[Ticker]) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(schema::DROP_SCHEMA)?;
        tx.execute_batch(schema::CREATE_SCHEMA)?;
        tx.execute(schema::INSERT_VERSION, params![now_text()])?;
        {
            let mut stmt = tx.prepare(schema::REGISTER_TICKER)?;
            for ticker in catalogue {
                stmt.execute(params![ticker.as_str()])?;
            }
        }
        tx.commit()?;
        info!(instruments = catalogue.len(), "database reset");
        Ok(())
    }

    /// Newest stored tick for `ticker`, or `None` if it has no rows.
    pub fn last_timestamp(&self, ticker: &Ticker) -> Result<Option<DateTime<Utc>>, StoreError> {
        let max: Option<i64> =
            self.conn
                .query_row(schema::LAST_TIMESTAMP, params![ticker.as_str()], |row| {
                    row.get(0)
                })?;
        max.map(|us| DateTime::from_timestamp_micros(us).ok_or(StoreError::InvalidTimestamp(us)))
            .transpose()
    }

    /// Tickers in the instrument catalogue or with stored ticks.
    pub fn known_tickers(&self) -> Result<BTreeSet<Ticker>, StoreError> {
        let mut stmt = self.conn.prepare(schema::KNOWN_TICKERS)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut tickers = BTreeSet::new();
        for raw in rows {
            let raw = raw?;
            match Ticker::parse(&raw) {
                Ok(t) => {
                    tickers.insert(t);
                }
                Err(e) => warn!("ignoring stored ticker: {e}"),
            }
        }
        Ok(tickers)
    }

    /// Add tickers to the instrument catalogue. Existing entries are kept.
    pub fn register_tickers(&mut self, tickers: &[Ticker]) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare(schema::REGISTER_TICKER)?;
            for ticker in tickers {
                stmt.execute(params![ticker.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Stored tick rows for `ticker`.
    pub fn row_count(&self, ticker: &Ticker) -> Result<u64, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fx_tick WHERE ticker = ?1",
            params![ticker.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    /// Row count of every table.
    pub fn table_counts(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut counts = BTreeMap::new();
        for table in schema::TABLES {
            let n: i64 =
                self.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            counts.insert((*table).to_string(), u64::try_from(n).unwrap_or_default());
        }
        Ok(counts)
    }

    /// Ticks for `ticker` in timestamp order.
    pub fn ticks(&self, ticker: &Ticker) -> Result<Vec<TickRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT ts_us, bid, ask FROM fx_tick WHERE ticker = ?1 ORDER BY ts_us")?;
        let rows = stmt.query_map(params![ticker.as_str()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?, row.get::<_, f64>(2)?))
        })?;

        let mut ticks = Vec::new();
        for row in rows {
            let (us, bid, ask) = row?;
            let ts = DateTime::from_timestamp_micros(us).ok_or(StoreError::InvalidTimestamp(us))?;
            ticks.push(TickRecord::new(ts, bid, ask));
        }
        Ok(ticks)
    }

    /// Start the atomic write of one period for `ticker`.
    ///
    /// Rows are staged in a connection-private temp table while the period
    /// is parsed; the write lock on the database file is only taken by
    /// `commit`, which copies the staged rows in one `BEGIN IMMEDIATE`
    /// transaction.
    pub fn begin_period(&mut self, ticker: &Ticker) -> Result<PeriodWriter<'_>, StoreError> {
        let conn: &Connection = &self.conn;
        conn.execute(schema::CLEAR_STAGING, [])?;
        let stage = Transaction::new_unchecked(conn, TransactionBehavior::Deferred)?;
        Ok(PeriodWriter {
            conn,
            stage,
            ticker: ticker.clone(),
            staged: 0,
            repeated: 0,
        })
    }

    /// Insert a batch of ticks in one transaction, ignoring keys that are
    /// already stored. Safe to repeat with the same input.
    pub fn upsert_many<I>(&mut self, ticker: &Ticker, records: I) -> Result<WriteStats, StoreError>
    where
        I: IntoIterator<Item = TickRecord>,
    {
        let mut writer = self.begin_period(ticker)?;
        for record in records {
            writer.insert(&record)?;
        }
        writer.commit()
    }
}

/// A period being written. Nothing reaches `fx_tick` before `commit`;
/// dropping the writer discards every staged row.
pub struct PeriodWriter<'c> {
    conn: &'c Connection,
    stage: Transaction<'c>,
    ticker: Ticker,
    staged: u64,
    /// Rows repeating a timestamp already staged for this period.
    repeated: u64,
}

impl PeriodWriter<'_> {
    /// Stage one tick. Returns `false` if the period already had a row
    /// with the same timestamp.
    pub fn insert(&mut self, tick: &TickRecord) -> Result<bool, StoreError> {
        let changed = self.stage.prepare_cached(schema::STAGE_TICK)?.execute(params![
            tick.timestamp_micros(),
            tick.bid,
            tick.ask
        ])?;
        if changed == 0 {
            self.repeated += 1;
        } else {
            self.staged += 1;
        }
        Ok(changed > 0)
    }

    /// Distinct rows staged so far.
    pub fn staged(&self) -> u64 {
        self.staged
    }

    /// Copy the staged rows into `fx_tick`, register the ticker and make
    /// the period visible, all in one write transaction.
    pub fn commit(self) -> Result<WriteStats, StoreError> {
        let PeriodWriter {
            conn,
            stage,
            ticker,
            staged,
            repeated,
        } = self;
        stage.commit()?;

        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let inserted = tx.execute(schema::PUBLISH_STAGED, params![ticker.as_str()])? as u64;
        tx.execute(schema::REGISTER_TICKER, params![ticker.as_str()])?;
        tx.execute(schema::TOUCH_VERSION, params![now_text()])?;
        tx.execute(schema::CLEAR_STAGING, [])?;
        tx.commit()?;

        Ok(WriteStats {
            inserted,
            duplicates: repeated + staged.saturating_sub(inserted),
        })
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ticker(s: &str) -> Ticker {
        Ticker::parse(s).unwrap()
    }

    fn tick(secs: i64, bid: f64) -> TickRecord {
        let ts = Utc.with_ymd_and_hms(2019, 1, 7, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs);
        TickRecord::new(ts, bid, bid + 0.0002)
    }

    #[test]
    fn empty_store_has_no_resume_point() {
        let store = TickStore::open_in_memory().unwrap();
        assert_eq!(store.last_timestamp(&ticker("EURUSD")).unwrap(), None);
        assert!(store.known_tickers().unwrap().is_empty());
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut store = TickStore::open_in_memory().unwrap();
        let eurusd = ticker("EURUSD");
        let batch = vec![tick(0, 1.1), tick(1, 1.2), tick(2, 1.3)];

        let first = store.upsert_many(&eurusd, batch.clone()).unwrap();
        assert_eq!(first, WriteStats { inserted: 3, duplicates: 0 });

        let second = store.upsert_many(&eurusd, batch.clone()).unwrap();
        assert_eq!(second, WriteStats { inserted: 0, duplicates: 3 });

        assert_eq!(store.row_count(&eurusd).unwrap(), 3);
        assert_eq!(store.ticks(&eurusd).unwrap(), batch);
    }

    #[test]
    fn last_timestamp_is_per_ticker_max() {
        let mut store = TickStore::open_in_memory().unwrap();
        store
            .upsert_many(&ticker("EURUSD"), vec![tick(5, 1.1), tick(60, 1.2), tick(30, 1.3)])
            .unwrap();
        store.upsert_many(&ticker("USDJPY"), vec![tick(999, 110.0)]).unwrap();

        assert_eq!(
            store.last_timestamp(&ticker("EURUSD")).unwrap(),
            Some(tick(60, 1.2).timestamp)
        );
        assert_eq!(
            store.last_timestamp(&ticker("USDJPY")).unwrap(),
            Some(tick(999, 110.0).timestamp)
        );
    }

    #[test]
    fn microsecond_precision_survives() {
        let mut store = TickStore::open_in_memory().unwrap();
        let eurusd = ticker("EURUSD");
        let t = Utc.with_ymd_and_hms(2019, 1, 7, 0, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        store.upsert_many(&eurusd, vec![TickRecord::new(t, 1.0, 1.1)]).unwrap();
        assert_eq!(store.last_timestamp(&eurusd).unwrap(), Some(t));
    }

    #[test]
    fn dropped_writer_rolls_back() {
        let mut store = TickStore::open_in_memory().unwrap();
        let eurusd = ticker("EURUSD");
        {
            let mut writer = store.begin_period(&eurusd).unwrap();
            writer.insert(&tick(0, 1.1)).unwrap();
            writer.insert(&tick(1, 1.2)).unwrap();
            assert!(!writer.insert(&tick(1, 1.2)).unwrap());
            assert_eq!(writer.staged(), 2);
        }
        assert_eq!(store.row_count(&eurusd).unwrap(), 0);
        assert_eq!(store.last_timestamp(&eurusd).unwrap(), None);
        assert!(store.known_tickers().unwrap().is_empty());
    }

    #[test]
    fn committed_period_registers_ticker() {
        let mut store = TickStore::open_in_memory().unwrap();
        store.upsert_many(&ticker("NZDUSD"), vec![tick(0, 0.7)]).unwrap();
        store.register_tickers(&[ticker("EURUSD")]).unwrap();

        let known: Vec<String> = store
            .known_tickers()
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(known, vec!["EURUSD", "NZDUSD"]);
    }

    #[test]
    fn reset_drops_ticks_and_seeds_catalogue() {
        let mut store = TickStore::open_in_memory().unwrap();
        store.upsert_many(&ticker("EURUSD"), vec![tick(0, 1.1)]).unwrap();

        store.reset(&default_catalogue()).unwrap();

        let counts = store.table_counts().unwrap();
        assert_eq!(counts["fx_tick"], 0);
        assert_eq!(counts["version"], 1);
        assert_eq!(counts["instruments"], FXCM_TICK_INSTRUMENTS.len() as u64);
        assert_eq!(store.last_timestamp(&ticker("EURUSD")).unwrap(), None);
        assert!(store.known_tickers().unwrap().contains(&ticker("USDJPY")));
    }
}
