//! FXCM tick-data repository source.
//!
//! FXCM publishes one gzip-compressed CSV per ticker and ISO week at
//! `{base}/{TICKER}/{iso_year}/{iso_week}.csv.gz`, starting with 2019-W01.
//! New weeks appear in monthly batches, so the most recent weeks return 404
//! until the next batch is published.

use super::provider::{DataError, TickSource};
use crate::domain::{Period, Ticker};
use chrono::NaiveDate;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://tickdata.fxcorporate.com";

/// First day the repository has tick data for (2019-W01).
pub fn data_floor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// HTTP settings for the FXCM source.
#[derive(Debug, Clone)]
pub struct FxcmOptions {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FxcmOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            user_agent: concat!("fxtick/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// FXCM tick-data source over blocking HTTP.
pub struct FxcmSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl FxcmSource {
    pub fn new(options: FxcmOptions) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent)
            .build()
            .map_err(|e| DataError::ClientSetup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: options.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Download URL for a ticker's week file.
    pub fn period_url(&self, ticker: &Ticker, period: Period) -> String {
        period_url(&self.base_url, ticker, period)
    }
}

fn period_url(base_url: &str, ticker: &Ticker, period: Period) -> String {
    format!(
        "{base_url}/{ticker}/{}/{}.csv.gz",
        period.iso_year(),
        period.iso_week()
    )
}

/// Map an HTTP status to the fetch outcome.
fn check_status(ticker: &Ticker, period: Period, status: StatusCode) -> Result<(), DataError> {
    if status == StatusCode::NOT_FOUND {
        return Err(DataError::NotPublished {
            ticker: ticker.clone(),
            period,
        });
    }
    if !status.is_success() {
        return Err(DataError::Transient {
            ticker: ticker.clone(),
            period,
            message: format!("HTTP {status}"),
        });
    }
    Ok(())
}

impl TickSource for FxcmSource {
    fn name(&self) -> &str {
        "fxcm_tickdata"
    }

    fn fetch(&self, ticker: &Ticker, period: Period) -> Result<Vec<u8>, DataError> {
        let url = self.period_url(ticker, period);
        debug!(%url, "requesting period file");

        let transient = |message: String| DataError::Transient {
            ticker: ticker.clone(),
            period,
            message,
        };

        let resp = self.client.get(&url).send().map_err(|e| {
            if e.is_timeout() {
                transient(format!("timed out: {e}"))
            } else {
                transient(e.to_string())
            }
        })?;

        check_status(ticker, period, resp.status())?;

        let body = resp
            .bytes()
            .map_err(|e| transient(format!("failed to read body: {e}")))?;
        debug!(%url, bytes = body.len(), "period file downloaded");
        Ok(body.to_vec())
    }
}
