// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # sonda-core
//!
//! Concurrency core of the sonda diagnostic capture orchestrator.
//!
//! Two background monitors run as independent tasks: [`CaptureMonitor`]
//! watches live traffic for a marker and then records it to a rotating
//! capture file set, and [`ServiceLogMonitor`] restarts a managed service
//! and scans its log stream for an error marker. The [`Orchestrator`]
//! sequences them through bounded detection windows by blocking on
//! [`CompositeWaiter`]s (derived [`Signal`]s that fire when *any*
//! constituent fires) and guarantees both monitors are stopped, drained,
//! and joined before it reports an [`Outcome`].
//!
//! Subprocesses are owned exclusively by their monitor and signaled as
//! whole process groups via [`ManagedProcess`], so tools that spawn
//! dependents of their own are never left orphaned.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Allow significant_drop_tightening - overly aggressive for async code with locks
#![allow(clippy::significant_drop_tightening)]

pub mod capture;
pub mod config;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod process;
pub mod service;
pub mod signal;
#[cfg(test)]
pub mod tests;
pub mod types;
pub mod waiter;

pub use capture::{CaptureMonitor, DETECT_MARKER};
pub use config::{CaptureConfig, RunConfig, ServiceConfig};
pub use error::{MonitorError, Result};
pub use monitor::{Monitor, stop_and_join};
pub use orchestrator::{Orchestrator, Outcome};
pub use process::{ManagedProcess, ProcessHandle, ProcessSpec};
pub use service::ServiceLogMonitor;
pub use signal::{Signal, WeakSignal};
pub use types::{CaptureState, RunId, ServiceState};
pub use waiter::CompositeWaiter;
