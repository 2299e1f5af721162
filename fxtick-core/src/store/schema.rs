//! SQLite schema for the tick database.

/// Tables owned by the store, in creation order.
pub const TABLES: &[&str] = &["version", "instruments", "fx_tick"];

pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS version (
    id INTEGER PRIMARY KEY,
    created TEXT NOT NULL,
    updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS instruments (
    ticker TEXT PRIMARY KEY,
    has_ticks INTEGER NOT NULL DEFAULT 1,
    has_candles INTEGER NOT NULL DEFAULT 0
);

-- One row per tick; ts_us is microseconds since the Unix epoch (UTC).
CREATE TABLE IF NOT EXISTS fx_tick (
    ticker TEXT NOT NULL,
    ts_us INTEGER NOT NULL,
    bid REAL NOT NULL,
    ask REAL NOT NULL,
    PRIMARY KEY (ticker, ts_us)
) WITHOUT ROWID;
"#;

pub const DROP_SCHEMA: &str = r#"
DROP TABLE IF EXISTS fx_tick;
DROP TABLE IF EXISTS instruments;
DROP TABLE IF EXISTS version;
"#;

pub const REGISTER_TICKER: &str =
    "INSERT OR IGNORE INTO instruments (ticker, has_ticks, has_candles) VALUES (?1, 1, 0)";

pub const INSERT_VERSION: &str =
    "INSERT OR REPLACE INTO version (id, created, updated) VALUES (1, ?1, ?1)";

pub const ENSURE_VERSION: &str =
    "INSERT OR IGNORE INTO version (id, created, updated) VALUES (1, ?1, ?1)";

pub const TOUCH_VERSION: &str = "UPDATE version SET updated = ?1 WHERE id = 1";

pub const LAST_TIMESTAMP: &str = "SELECT MAX(ts_us) FROM fx_tick WHERE ticker = ?1";

pub const KNOWN_TICKERS: &str =
    "SELECT ticker FROM instruments UNION SELECT DISTINCT ticker FROM fx_tick ORDER BY 1";

/// Per-connection staging area for the period being parsed. Lives in the
/// temp database, so filling it takes no lock on the main file.
pub const CREATE_STAGING: &str = r#"
CREATE TEMP TABLE IF NOT EXISTS staged_tick (
    ts_us INTEGER PRIMARY KEY,
    bid REAL NOT NULL,
    ask REAL NOT NULL
);
"#;

pub const STAGE_TICK: &str =
    "INSERT OR IGNORE INTO temp.staged_tick (ts_us, bid, ask) VALUES (?1, ?2, ?3)";

pub const PUBLISH_STAGED: &str = "INSERT OR IGNORE INTO main.fx_tick (ticker, ts_us, bid, ask) \
     SELECT ?1, ts_us, bid, ask FROM temp.staged_tick ORDER BY ts_us";

pub const CLEAR_STAGING: &str = "DELETE FROM temp.staged_tick";
