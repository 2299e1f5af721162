//! Domain types for fxtick

pub mod period;
pub mod tick;
pub mod ticker;

pub use period::{Period, PeriodRange};
pub use tick::TickRecord;
pub use ticker::{Ticker, TickerError};
