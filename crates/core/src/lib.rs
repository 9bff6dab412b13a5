//! Core types for cumulus: the error taxonomy shared by every layer, backoff
//! policies, and the retrying call executor that absorbs the cloud's eventual
//! consistency.

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod backoff;
pub mod error;
pub mod resource;
pub mod result;
pub mod retry;

pub use backoff::{BackoffPolicy, BackoffProfiles};
pub use error::Error;
pub use resource::{Call, Operation, ResourceKind};
pub use result::{at_most_one, OptionExt, Result, ResultExt};
pub use retry::{retry_call, retry_with_backoff, Attempt, RecordingSleeper, Sleeper, TokioSleeper};
