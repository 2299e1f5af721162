//! FxTick Runner: plans and dispatches per-ticker ingestion jobs.
//!
//! This crate builds on `fxtick-core` to provide:
//! - Window clamping and incremental resume planning
//! - The per-period fetch, parse and store loop with retries
//! - Sequential or worker-pool dispatch with per-job failure containment
//! - Run summaries (text or JSON)
//! - TOML configuration

pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod summary;

pub use config::{ConfigError, IngestConfig};
pub use dispatch::{dispatch, DispatchMode};
pub use ingest::{
    clamp_window, ingest_period, last_day_of_previous_month, plan, run_job, AttemptError,
    DateWindow, IngestError, IngestPlan, IngestSettings, IngestionJob, PeriodOutcome,
};
pub use summary::{JobReport, JobStatus, RunSummary, Totals};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn reports_are_send_sync() {
        assert_send::<JobReport>();
        assert_sync::<JobReport>();
        assert_send::<RunSummary>();
    }

    #[test]
    fn settings_are_send_sync() {
        assert_send::<IngestSettings>();
        assert_sync::<IngestSettings>();
        assert_send::<IngestionJob>();
        assert_sync::<IngestionJob>();
    }
}
