use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single bid/ask quote.
///
/// The ticker is not repeated on every record: records always travel in a
/// batch that belongs to exactly one ticker. `(ticker, timestamp)` is the
/// identity of a stored tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub timestamp: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
}

impl TickRecord {
    pub fn new(timestamp: DateTime<Utc>, bid: f64, ask: f64) -> Self {
        Self { timestamp, bid, ask }
    }

    /// Storage key: microseconds since the Unix epoch.
    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp.timestamp_micros()
    }
}
