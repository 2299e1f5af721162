//! Period file parser.
//!
//! A period file is a gzip-compressed CSV with a `DateTime,Bid,Ask` header.
//! FXCM encodes the text as UTF-16LE, so every ASCII byte is followed by a
//! NUL; those are dropped while streaming. The byte-order mark only appears
//! in the header row, which is skipped. A file made of several concatenated
//! gzip members is decoded through to the last one.
//!
//! Parsing is lazy: `TickParser` yields one record per data row and never
//! buffers more than the current row. A row that fails validation is logged,
//! counted and skipped. Only a broken stream (bad gzip, I/O) ends the
//! iteration with an error.

use crate::domain::TickRecord;
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::read::MultiGzDecoder;
use std::io::{self, Read};
use thiserror::Error;
use tracing::warn;

/// Timestamp layouts seen in published files.
pub const TIMESTAMP_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M:%S%.f",
    "%m-%d-%Y %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Fatal stream error. The whole period attempt is void.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read period stream: {0}")]
    Csv(#[from] csv::Error),
}

/// Why a single row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRow {
    #[error("expected 3 fields, found {0}")]
    FieldCount(usize),
    #[error("unrecognised timestamp '{0}'")]
    Timestamp(String),
    #[error("invalid {field} price '{value}'")]
    Price { field: &'static str, value: String },
}

/// Drops NUL bytes from the wrapped stream.
struct NulStripper<R> {
    inner: R,
}

impl<R: Read> Read for NulStripper<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let mut kept = 0;
            for i in 0..n {
                if buf[i] != 0 {
                    buf[kept] = buf[i];
                    kept += 1;
                }
            }
            // A chunk made only of NULs must not be reported as EOF.
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

/// Lazy iterator over the tick rows of one period file.
pub struct TickParser<R: Read> {
    reader: csv::Reader<NulStripper<MultiGzDecoder<R>>>,
    record: csv::ByteRecord,
    label: String,
    parsed: u64,
    malformed: u64,
    done: bool,
}

impl<R: Read> TickParser<R> {
    /// Wrap a gzip-compressed period stream. `label` identifies the period in
    /// log lines (e.g. `EURUSD 2019-W01`).
    pub fn new(compressed: R, label: impl Into<String>) -> Self {
        let stream = NulStripper {
            inner: MultiGzDecoder::new(compressed),
        };
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(stream);

        Self {
            reader,
            record: csv::ByteRecord::new(),
            label: label.into(),
            parsed: 0,
            malformed: 0,
            done: false,
        }
    }

    /// Rows successfully parsed so far.
    pub fn parsed(&self) -> u64 {
        self.parsed
    }

    /// Rows skipped as malformed so far.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

/// Parse an in-memory period file.
pub fn parse(raw: &[u8], label: impl Into<String>) -> TickParser<&[u8]> {
    TickParser::new(raw, label)
}

impl<R: Read> Iterator for TickParser<R> {
    type Item = Result<TickRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.reader.read_byte_record(&mut self.record) {
                Ok(false) => self.done = true,
                Ok(true) => match parse_row(&self.record) {
                    Ok(tick) => {
                        self.parsed += 1;
                        return Some(Ok(tick));
                    }
                    Err(reason) => {
                        self.malformed += 1;
                        let line = self.record.position().map_or(0, |p| p.line());
                        warn!(period = %self.label, line, %reason, "skipping malformed row");
                    }
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(ParseError::Csv(e)));
                }
            }
        }
        None
    }
}

/// Parse a single `timestamp,bid,ask` row.
pub fn parse_row(record: &csv::ByteRecord) -> Result<TickRecord, MalformedRow> {
    if record.len() < 3 {
        return Err(MalformedRow::FieldCount(record.len()));
    }

    let raw_ts = String::from_utf8_lossy(&record[0]);
    let timestamp =
        parse_timestamp(&raw_ts).ok_or_else(|| MalformedRow::Timestamp(raw_ts.to_string()))?;
    let bid = parse_price("bid", &record[1])?;
    let ask = parse_price("ask", &record[2])?;

    Ok(TickRecord::new(timestamp, bid, ask))
}

/// Parse a UTC timestamp in any of the published layouts.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_price(field: &'static str, raw: &[u8]) -> Result<f64, MalformedRow> {
    let text = String::from_utf8_lossy(raw);
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(MalformedRow::Price {
            field,
            value: text.to_string(),
        }),
    }
}
