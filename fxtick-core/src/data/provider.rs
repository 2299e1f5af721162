//! Tick source trait and structured fetch errors.
//!
//! The TickSource trait abstracts over where period files come from (the FXCM
//! HTTP repository in production, in-memory fixtures in tests). Sources are
//! stateless: one call fetches one period file, retries live in the planner.

use crate::domain::{Period, Ticker};
use thiserror::Error;

/// Structured error types for a single period fetch.
#[derive(Debug, Error)]
pub enum DataError {
    /// The remote source has no file for this period (HTTP 404). Recent
    /// periods legitimately do not exist yet; this is not a failure.
    #[error("{ticker} {period} is not published yet")]
    NotPublished { ticker: Ticker, period: Period },

    /// Network failure, timeout, non-404 error status or a broken body.
    #[error("transient fetch error for {ticker} {period}: {message}")]
    Transient {
        ticker: Ticker,
        period: Period,
        message: String,
    },

    #[error("http client setup failed: {0}")]
    ClientSetup(String),
}

impl DataError {
    /// Whether another attempt at the same period may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataError::Transient { .. })
    }
}

/// Trait for remote tick sources.
pub trait TickSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch the raw (compressed) file for one ticker and period.
    fn fetch(&self, ticker: &Ticker, period: Period) -> Result<Vec<u8>, DataError>;
}

impl<T: TickSource + ?Sized> TickSource for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self, ticker: &Ticker, period: Period) -> Result<Vec<u8>, DataError> {
        (**self).fetch(ticker, period)
    }
}
