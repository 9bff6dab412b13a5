//! Cloud access for cumulus.
//!
//! - [`api`]: the traits a cloud SDK binding implements
//! - [`facade`]: [`Cloud`], the only way the rest of the workspace talks to
//!   the cloud; every call is retried under a backoff profile
//! - [`memory`]: [`InMemoryCloud`], a fault-injecting cloud for tests

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod api;
pub mod facade;
pub mod memory;
pub mod types;

pub use api::{ApiError, ApiResult, CloudClients};
pub use facade::{Cloud, CloudSettings};
pub use memory::{ApiCall, InMemoryCloud};
