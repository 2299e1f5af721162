//! Remote period files: fetching, parsing and retry pacing

pub mod backoff;
pub mod fxcm;
pub mod parse;
pub mod provider;

pub use backoff::{RetryError, RetryPolicy, Throttle};
pub use fxcm::{data_floor, FxcmOptions, FxcmSource};
pub use parse::{parse, MalformedRow, ParseError, TickParser};
pub use provider::{DataError, TickSource};
