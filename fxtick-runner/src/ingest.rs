//! Ingestion planner: reconciles the remote period files of one ticker with
//! the local store.
//!
//! For each job:
//! 1. Clamp the requested window to what the repository can have: not before
//!    the data floor, not past the end of the previous month (the current
//!    month is never finalised).
//! 2. Advance the start to the stored resume point. The period straddling it
//!    is fetched again and upsert idempotence absorbs the overlap.
//! 3. Walk the ISO weeks oldest first: fetch, parse and write each one in a
//!    single transaction, keeping only rows dated inside the window (the
//!    first and last weeks usually spill over its edges). Stop at the first unpublished week, since
//!    publication is chronological. Retry transient failures; when the
//!    budget is spent the job fails but earlier weeks stay committed.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use fxtick_core::data::{
    parse, DataError, ParseError, RetryError, RetryPolicy, Throttle, TickSource,
};
use fxtick_core::domain::{Period, PeriodRange, Ticker};
use fxtick_core::store::{StoreError, TickStore, WriteStats};
use std::fmt;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::summary::{JobReport, JobStatus};

/// One ticker's unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionJob {
    pub ticker: Ticker,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl IngestionJob {
    pub fn new(ticker: Ticker, start: NaiveDate, end: NaiveDate) -> Self {
        Self { ticker, start, end }
    }

    /// One job per ticker over the same window.
    pub fn for_tickers<'a>(
        tickers: impl IntoIterator<Item = &'a Ticker>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<Self> {
        tickers
            .into_iter()
            .map(|t| Self::new(t.clone(), start, end))
            .collect()
    }
}

/// Everything a job needs besides the source and the store.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Earliest date the repository has data for.
    pub floor: NaiveDate,
    /// The run's notion of "today" (UTC).
    pub today: NaiveDate,
    /// Use the stored resume point. Off right after a reset.
    pub resume: bool,
    pub retry: RetryPolicy,
    pub throttle: Throttle,
}

impl IngestSettings {
    pub fn from_config(config: &IngestConfig, today: NaiveDate, resume: bool) -> Self {
        Self {
            floor: config.source.data_floor,
            today,
            resume,
            retry: config.retry_policy(),
            throttle: config.throttle(),
        }
    }
}

/// Last day of the month before `today`'s month.
pub fn last_day_of_previous_month(today: NaiveDate) -> NaiveDate {
    let first = today.with_day(1).unwrap_or(today);
    first.pred_opt().unwrap_or(first)
}

/// Clamp a requested window to `[floor, end of previous month]`.
pub fn clamp_window(
    requested_start: NaiveDate,
    requested_end: NaiveDate,
    floor: NaiveDate,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    (
        requested_start.max(floor),
        requested_end.min(last_day_of_previous_month(today)),
    )
}

/// Inclusive calendar window a job stores rows for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let day = ts.date_naive();
        self.start <= day && day <= self.end
    }
}

/// The periods a job will fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestPlan {
    pub ticker: Ticker,
    /// Clamped window, before resume.
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub resumed_from: Option<DateTime<Utc>>,
    /// Oldest first.
    pub periods: Vec<Period>,
    /// Periods of the window left out because of the resume point.
    pub skipped: usize,
}

impl IngestPlan {
    /// The clamped window. Edge weeks also carry rows outside it, which
    /// are not stored.
    pub fn window(&self) -> DateWindow {
        DateWindow {
            start: self.window_start,
            end: self.window_end,
        }
    }
}

/// Compute the plan for `job` given the stored resume point. Pure: no I/O.
pub fn plan(job: &IngestionJob, last_stored: Option<DateTime<Utc>>, settings: &IngestSettings) -> IngestPlan {
    let (window_start, window_end) = clamp_window(job.start, job.end, settings.floor, settings.today);

    let resumed_from = last_stored.filter(|_| settings.resume);
    let start = match resumed_from {
        Some(ts) => window_start.max(ts.date_naive()),
        None => window_start,
    };

    let periods: Vec<Period> = PeriodRange::new(start, window_end).collect();
    let skipped = PeriodRange::new(window_start, window_end)
        .count()
        .saturating_sub(periods.len());

    IngestPlan {
        ticker: job.ticker.clone(),
        window_start,
        window_end,
        resumed_from,
        periods,
        skipped,
    }
}

/// Job-ending error.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{period}: giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        period: Period,
        attempts: u32,
        last: AttemptError,
    },

    #[error("{period}: {source}")]
    Period { period: Period, source: AttemptError },

    #[error("cannot read resume point: {0}")]
    ResumePoint(StoreError),
}

/// Failure of a single attempt at one period.
#[derive(Debug)]
pub enum AttemptError {
    Fetch(DataError),
    Parse(ParseError),
    Store(StoreError),
}

impl AttemptError {
    /// Fetch hiccups and broken files are worth another try; database
    /// failures are not.
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Fetch(e) => e.is_retryable(),
            AttemptError::Parse(_) => true,
            AttemptError::Store(_) => false,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Fetch(e) => write!(f, "{e}"),
            AttemptError::Parse(e) => write!(f, "{e}"),
            AttemptError::Store(e) => write!(f, "database error: {e}"),
        }
    }
}

impl std::error::Error for AttemptError {}

impl From<StoreError> for AttemptError {
    fn from(e: StoreError) -> Self {
        AttemptError::Store(e)
    }
}

/// Result of one stored or missing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodOutcome {
    Stored {
        stats: WriteStats,
        malformed: u64,
        /// Valid rows dated outside the job's window.
        outside: u64,
    },
    NotPublished,
}

/// Fetch, parse and store the rows of one period that fall in `window`,
/// retrying transient failures.
pub fn ingest_period<S: TickSource + ?Sized>(
    source: &S,
    store: &mut TickStore,
    ticker: &Ticker,
    period: Period,
    window: DateWindow,
    retry: &RetryPolicy,
) -> Result<PeriodOutcome, IngestError> {
    let result = retry.run(
        |attempt| {
            if attempt > 1 {
                debug!(%ticker, %period, attempt, "retrying period");
            }
            let outcome = attempt_period(source, store, ticker, period, window);
            if let Err(e) = &outcome {
                if e.is_retryable() {
                    warn!(%ticker, %period, attempt, "attempt failed: {e}");
                }
            }
            outcome
        },
        AttemptError::is_retryable,
    );

    result.map_err(|e| match e {
        RetryError::Exhausted { attempts, last } => IngestError::RetriesExhausted {
            period,
            attempts,
            last,
        },
        RetryError::Fatal(source) => IngestError::Period { period, source },
    })
}

fn attempt_period<S: TickSource + ?Sized>(
    source: &S,
    store: &mut TickStore,
    ticker: &Ticker,
    period: Period,
    window: DateWindow,
) -> Result<PeriodOutcome, AttemptError> {
    let raw = match source.fetch(ticker, period) {
        Ok(raw) => raw,
        Err(DataError::NotPublished { .. }) => return Ok(PeriodOutcome::NotPublished),
        Err(e) => return Err(AttemptError::Fetch(e)),
    };

    let mut parser = parse(&raw, format!("{ticker} {period}"));
    // Rows only become visible on commit; any early return rolls back.
    let mut writer = store.begin_period(ticker)?;
    let mut outside = 0;
    for tick in parser.by_ref() {
        let tick = tick.map_err(AttemptError::Parse)?;
        if window.contains(tick.timestamp) {
            writer.insert(&tick)?;
        } else {
            outside += 1;
        }
    }
    let malformed = parser.malformed();
    let stats = writer.commit()?;

    Ok(PeriodOutcome::Stored {
        stats,
        malformed,
        outside,
    })
}

/// Run one ticker job to completion. Never panics on remote or database
/// failures: they end up in the report's status.
pub fn run_job<S: TickSource + ?Sized>(
    source: &S,
    store: &mut TickStore,
    job: &IngestionJob,
    settings: &IngestSettings,
) -> JobReport {
    let started = Instant::now();
    let ticker = &job.ticker;

    let last_stored = if settings.resume {
        match store.last_timestamp(ticker) {
            Ok(ts) => ts,
            Err(e) => {
                let err = IngestError::ResumePoint(e);
                error!(%ticker, "{err}");
                let (start, end) = clamp_window(job.start, job.end, settings.floor, settings.today);
                return JobReport::failed(ticker.clone(), start, end, err.to_string());
            }
        }
    } else {
        None
    };

    let plan = plan(job, last_stored, settings);
    info!(
        %ticker,
        start = %plan.window_start,
        end = %plan.window_end,
        resume = ?plan.resumed_from,
        periods = plan.periods.len(),
        skipped = plan.skipped,
        "planned ticker"
    );

    let mut report = JobReport {
        ticker: ticker.clone(),
        window_start: plan.window_start,
        window_end: plan.window_end,
        resumed_from: plan.resumed_from,
        periods_planned: plan.periods.len(),
        periods_fetched: 0,
        periods_skipped: plan.skipped,
        periods_unpublished: 0,
        periods_failed: 0,
        rows_inserted: 0,
        rows_duplicate: 0,
        rows_malformed: 0,
        rows_outside_window: 0,
        elapsed_ms: 0,
        status: JobStatus::Completed,
    };

    for (i, &period) in plan.periods.iter().enumerate() {
        if i > 0 {
            settings.throttle.pause();
        }

        let period_started = Instant::now();
        match ingest_period(source, store, ticker, period, plan.window(), &settings.retry) {
            Ok(PeriodOutcome::Stored {
                stats,
                malformed,
                outside,
            }) => {
                report.periods_fetched += 1;
                report.rows_inserted += stats.inserted;
                report.rows_duplicate += stats.duplicates;
                report.rows_malformed += malformed;
                report.rows_outside_window += outside;
                info!(
                    %ticker,
                    %period,
                    inserted = stats.inserted,
                    duplicates = stats.duplicates,
                    malformed,
                    outside,
                    secs = format_args!("{:.1}", period_started.elapsed().as_secs_f64()),
                    "stored period"
                );
            }
            Ok(PeriodOutcome::NotPublished) => {
                report.periods_unpublished = plan.periods.len() - i;
                report.status = JobStatus::StoppedAtUnpublished { period };
                info!(%ticker, %period, "period not published yet, stopping");
                break;
            }
            Err(e) => {
                report.periods_failed += 1;
                report.status = JobStatus::Failed {
                    error: e.to_string(),
                };
                error!(%ticker, "{e}");
                break;
            }
        }
    }

    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn settings(today: NaiveDate) -> IngestSettings {
        IngestSettings {
            floor: d(2019, 1, 1),
            today,
            resume: true,
            retry: RetryPolicy::immediate(1),
            throttle: Throttle::disabled(),
        }
    }

    fn job(start: NaiveDate, end: NaiveDate) -> IngestionJob {
        IngestionJob::new(Ticker::parse("EURUSD").unwrap(), start, end)
    }

    fn labels(plan: &IngestPlan) -> Vec<String> {
        plan.periods.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn previous_month_end() {
        assert_eq!(last_day_of_previous_month(d(2024, 3, 15)), d(2024, 2, 29));
        assert_eq!(last_day_of_previous_month(d(2024, 1, 1)), d(2023, 12, 31));
        assert_eq!(last_day_of_previous_month(d(2023, 5, 31)), d(2023, 4, 30));
    }

    #[test]
    fn end_in_current_month_is_clamped() {
        let (start, end) = clamp_window(d(2024, 1, 1), d(2024, 3, 20), d(2019, 1, 1), d(2024, 3, 21));
        assert_eq!(start, d(2024, 1, 1));
        assert_eq!(end, d(2024, 2, 29));
    }

    #[test]
    fn start_before_floor_is_clamped() {
        let (start, _) = clamp_window(d(2015, 1, 1), d(2019, 3, 1), d(2019, 1, 1), d(2024, 1, 1));
        assert_eq!(start, d(2019, 1, 1));
    }

    #[test]
    fn january_2019_on_empty_store() {
        let plan = plan(&job(d(2019, 1, 1), d(2019, 1, 31)), None, &settings(d(2024, 1, 1)));
        assert_eq!(
            labels(&plan),
            vec!["2019-W01", "2019-W02", "2019-W03", "2019-W04", "2019-W05"]
        );
        assert_eq!(plan.skipped, 0);
        assert_eq!(plan.resumed_from, None);
    }

    #[test]
    fn resume_starts_at_straddling_period() {
        // 2019-01-16 is a Wednesday in 2019-W03.
        let last = Utc.with_ymd_and_hms(2019, 1, 16, 12, 30, 0).unwrap();
        let plan = plan(&job(d(2019, 1, 1), d(2019, 1, 31)), Some(last), &settings(d(2024, 1, 1)));
        assert_eq!(labels(&plan), vec!["2019-W03", "2019-W04", "2019-W05"]);
        assert_eq!(plan.skipped, 2);
        assert_eq!(plan.resumed_from, Some(last));
    }

    #[test]
    fn resume_never_moves_start_backwards() {
        let last = Utc.with_ymd_and_hms(2019, 1, 2, 0, 0, 0).unwrap();
        let plan = plan(&job(d(2019, 3, 1), d(2019, 3, 31)), Some(last), &settings(d(2024, 1, 1)));
        assert_eq!(plan.periods[0], Period::containing(d(2019, 3, 1)));
        assert_eq!(plan.skipped, 0);
    }

    #[test]
    fn resume_is_ignored_without_resume_flag() {
        let last = Utc.with_ymd_and_hms(2019, 1, 16, 0, 0, 0).unwrap();
        let mut s = settings(d(2024, 1, 1));
        s.resume = false;
        let plan = plan(&job(d(2019, 1, 1), d(2019, 1, 31)), Some(last), &s);
        assert_eq!(plan.periods.len(), 5);
        assert_eq!(plan.resumed_from, None);
    }

    #[test]
    fn resume_past_window_plans_nothing() {
        let last = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        let plan = plan(&job(d(2019, 1, 1), d(2019, 1, 31)), Some(last), &settings(d(2024, 1, 1)));
        assert!(plan.periods.is_empty());
        assert_eq!(plan.skipped, 5);
    }

    #[test]
    fn window_bounds_are_whole_days() {
        let plan = plan(&job(d(2019, 1, 1), d(2019, 1, 31)), None, &settings(d(2024, 1, 1)));
        let window = plan.window();
        assert!(!window.contains(Utc.with_ymd_and_hms(2018, 12, 31, 23, 59, 59).unwrap()));
        assert!(window.contains(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()));
        assert!(window.contains(Utc.with_ymd_and_hms(2019, 1, 31, 23, 59, 59).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2019, 2, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn window_entirely_in_current_month_is_empty() {
        let plan = plan(&job(d(2024, 3, 2), d(2024, 3, 20)), None, &settings(d(2024, 3, 21)));
        assert!(plan.periods.is_empty());
    }
}
