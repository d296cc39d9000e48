//! # keel-core
//!
//! Foundation types shared by every keel crate:
//!
//! - **Error codes**: [`ErrorCode`], the service-wide failure taxonomy
//! - **Backoff**: [`BackoffConfig`] and the exponential delay math used by
//!   connect retries
//! - **Build info**: immutable [`BuildInfo`] constructed once at startup
//! - **Logging**: `tracing-subscriber` initialization
//! - **IDs**: prefixed, time-ordered identifiers
//! - **Metrics**: metric name constants

#![deny(unsafe_code)]

pub mod build_info;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod retry;

pub use build_info::BuildInfo;
pub use errors::ErrorCode;
pub use retry::BackoffConfig;
