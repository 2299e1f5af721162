//! fxtick core: domain types, the FXCM source adapter, the period file
//! parser and the SQLite tick store.
//!
//! - Domain types (tickers, ISO-week periods, tick records)
//! - `TickSource` trait and the blocking FXCM HTTP source
//! - Streaming gzip/CSV parser with per-row failure tolerance
//! - Retry backoff and request pacing
//! - SQLite store with atomic per-period writes

pub mod data;
pub mod domain;
pub mod store;
