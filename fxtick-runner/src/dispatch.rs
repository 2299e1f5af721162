//! Runs ingestion jobs sequentially or across a bounded worker pool.
//!
//! Connections are never shared between threads: rayon's `map_init` opens
//! one for each job split it hands to a worker, so a run opens at most one
//! per job. SQLite's WAL journal plus immediate transactions serialise the
//! writers. A panic inside one job is
//! caught and reported as that job's failure, the rest of the run goes on.

use chrono::Utc;
use fxtick_core::data::TickSource;
use fxtick_core::store::{StoreError, TickStore};
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, info, warn};

use crate::ingest::{clamp_window, run_job, IngestSettings, IngestionJob};
use crate::summary::{JobReport, RunSummary};

/// How jobs are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// One job after another, on the calling thread.
    Sequential,
    /// Up to `workers` jobs at once.
    Parallel { workers: usize },
}

impl DispatchMode {
    pub fn workers(self) -> usize {
        match self {
            DispatchMode::Sequential => 1,
            DispatchMode::Parallel { workers } => workers.max(1),
        }
    }
}

/// Run every job and collect one report per job, in job order.
///
/// `open_store` is called once per rayon job split, never more often than
/// there are jobs (once in total when sequential). A failure to open marks
/// that split's jobs failed without touching the network.
pub fn dispatch<S, F>(
    jobs: &[IngestionJob],
    source: &S,
    open_store: F,
    settings: &IngestSettings,
    mode: DispatchMode,
) -> RunSummary
where
    S: TickSource + ?Sized,
    F: Fn() -> Result<TickStore, StoreError> + Sync,
{
    let started_at = Utc::now();
    info!(
        jobs = jobs.len(),
        workers = mode.workers(),
        source = source.name(),
        "dispatching"
    );

    let reports = match mode {
        DispatchMode::Parallel { workers } if workers > 1 && jobs.len() > 1 => {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(workers.min(jobs.len()))
                .thread_name(|i| format!("fxtick-worker-{i}"))
                .build()
            {
                Ok(pool) => pool.install(|| {
                    jobs.par_iter()
                        .map_init(
                            || open_store().map_err(|e| e.to_string()),
                            |store, job| run_contained(source, store, job, settings),
                        )
                        .collect()
                }),
                Err(e) => {
                    warn!("cannot build worker pool ({e}), running sequentially");
                    run_sequential(jobs, source, &open_store, settings)
                }
            }
        }
        _ => run_sequential(jobs, source, &open_store, settings),
    };

    let summary = RunSummary::new(started_at, reports);
    info!(
        tickers = summary.totals.tickers,
        failed = summary.totals.tickers_failed,
        periods = summary.totals.periods_fetched,
        rows = summary.totals.rows_inserted,
        "run finished"
    );
    summary
}

fn run_sequential<S, F>(
    jobs: &[IngestionJob],
    source: &S,
    open_store: &F,
    settings: &IngestSettings,
) -> Vec<JobReport>
where
    S: TickSource + ?Sized,
    F: Fn() -> Result<TickStore, StoreError>,
{
    let mut store = open_store().map_err(|e| e.to_string());
    jobs.iter()
        .map(|job| run_contained(source, &mut store, job, settings))
        .collect()
}

fn run_contained<S: TickSource + ?Sized>(
    source: &S,
    store: &mut Result<TickStore, String>,
    job: &IngestionJob,
    settings: &IngestSettings,
) -> JobReport {
    let (start, end) = clamp_window(job.start, job.end, settings.floor, settings.today);

    let store = match store {
        Ok(store) => store,
        Err(e) => {
            error!(ticker = %job.ticker, "cannot open database: {e}");
            return JobReport::failed(job.ticker.clone(), start, end, format!("cannot open database: {e}"));
        }
    };

    match panic::catch_unwind(AssertUnwindSafe(|| run_job(source, store, job, settings))) {
        Ok(report) => report,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(ticker = %job.ticker, "job panicked: {message}");
            JobReport::failed(job.ticker.clone(), start, end, format!("job panicked: {message}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_never_zero() {
        assert_eq!(DispatchMode::Sequential.workers(), 1);
        assert_eq!(DispatchMode::Parallel { workers: 0 }.workers(), 1);
        assert_eq!(DispatchMode::Parallel { workers: 4 }.workers(), 4);
    }
}
