//! Per-ticker job reports and the run summary.

use chrono::{DateTime, NaiveDate, Utc};
use fxtick_core::domain::{Period, Ticker};
use serde::Serialize;

/// How a ticker job ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Every planned period was stored.
    Completed,
    /// Reached a period the repository has not published yet.
    StoppedAtUnpublished { period: Period },
    /// A period exhausted its retries, or the database failed.
    Failed { error: String },
}

/// Outcome of one ticker job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub ticker: Ticker,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    /// Stored resume point the window was advanced to, if any.
    pub resumed_from: Option<DateTime<Utc>>,
    pub periods_planned: usize,
    pub periods_fetched: usize,
    /// Periods in the window that resume made unnecessary.
    pub periods_skipped: usize,
    /// The unpublished period plus every later one that was not attempted.
    pub periods_unpublished: usize,
    pub periods_failed: usize,
    pub rows_inserted: u64,
    pub rows_duplicate: u64,
    pub rows_malformed: u64,
    /// Valid rows of edge weeks dated outside the window, not stored.
    pub rows_outside_window: u64,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobReport {
    /// Report for a job that failed before planning (e.g. database unreachable).
    pub fn failed(ticker: Ticker, window_start: NaiveDate, window_end: NaiveDate, error: String) -> Self {
        Self {
            ticker,
            window_start,
            window_end,
            resumed_from: None,
            periods_planned: 0,
            periods_fetched: 0,
            periods_skipped: 0,
            periods_unpublished: 0,
            periods_failed: 0,
            rows_inserted: 0,
            rows_duplicate: 0,
            rows_malformed: 0,
            rows_outside_window: 0,
            elapsed_ms: 0,
            status: JobStatus::Failed { error },
        }
    }

    pub fn succeeded(&self) -> bool {
        !matches!(self.status, JobStatus::Failed { .. })
    }
}

/// Aggregated totals across jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub tickers: usize,
    pub tickers_failed: usize,
    pub periods_fetched: usize,
    pub periods_skipped: usize,
    pub periods_unpublished: usize,
    pub periods_failed: usize,
    pub rows_inserted: u64,
    pub rows_malformed: u64,
}

/// Summary of a whole run, one report per ticker in dispatch order.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reports: Vec<JobReport>,
    pub totals: Totals,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>, reports: Vec<JobReport>) -> Self {
        let totals = reports.iter().fold(Totals::default(), |mut t, r| {
            t.tickers += 1;
            t.tickers_failed += usize::from(!r.succeeded());
            t.periods_fetched += r.periods_fetched;
            t.periods_skipped += r.periods_skipped;
            t.periods_unpublished += r.periods_unpublished;
            t.periods_failed += r.periods_failed;
            t.rows_inserted += r.rows_inserted;
            t.rows_malformed += r.rows_malformed;
            t
        });
        Self {
            started_at,
            finished_at: Utc::now(),
            reports,
            totals,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.totals.tickers_failed == 0
    }

    /// Failed tickers with their error.
    pub fn failures(&self) -> Vec<(&Ticker, &str)> {
        self.reports
            .iter()
            .filter_map(|r| match &r.status {
                JobStatus::Failed { error } => Some((&r.ticker, error.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn report(&self, ticker: &Ticker) -> Option<&JobReport> {
        self.reports.iter().find(|r| &r.ticker == ticker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, fetched: usize, status: JobStatus) -> JobReport {
        let d = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        JobReport {
            periods_fetched: fetched,
            rows_inserted: fetched as u64 * 10,
            status,
            ..JobReport::failed(Ticker::parse(name).unwrap(), d, d, String::new())
        }
    }

    #[test]
    fn totals_and_failures() {
        let summary = RunSummary::new(
            Utc::now(),
            vec![
                report("EURUSD", 3, JobStatus::Completed),
                report("GBPUSD", 1, JobStatus::Failed { error: "HTTP 503".into() }),
                report(
                    "USDJPY",
                    2,
                    JobStatus::StoppedAtUnpublished {
                        period: Period::new(2019, 5).unwrap(),
                    },
                ),
            ],
        );

        assert!(!summary.all_succeeded());
        assert_eq!(summary.totals.tickers, 3);
        assert_eq!(summary.totals.tickers_failed, 1);
        assert_eq!(summary.totals.periods_fetched, 6);
        assert_eq!(summary.totals.rows_inserted, 60);

        let failures = summary.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.as_str(), "GBPUSD");
        assert_eq!(failures[0].1, "HTTP 503");
    }

    #[test]
    fn json_shape() {
        let summary = RunSummary::new(
            Utc::now(),
            vec![report(
                "EURUSD",
                1,
                JobStatus::StoppedAtUnpublished {
                    period: Period::new(2019, 2).unwrap(),
                },
            )],
        );
        let json = serde_json::to_value(&summary).unwrap();
        let r = &json["reports"][0];
        assert_eq!(r["ticker"], "EURUSD");
        assert_eq!(r["status"], "stopped_at_unpublished");
        assert_eq!(r["period"], "2019-W02");
        assert_eq!(json["totals"]["periods_fetched"], 1);
    }
}
