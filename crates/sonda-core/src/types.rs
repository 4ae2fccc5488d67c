//! Core types for the diagnostic monitors.
//!
//! Explicit state machines, no implicit transitions. Failure is tracked
//! orthogonally to the lifecycle state via the monitors' `failed` signals.

use serde::{Deserialize, Serialize};

/// Unique identifier for one diagnostic run.
///
/// Stamped into the log output and the packaged archive name so reports
/// from repeated runs on the same host stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(uuid::Uuid);

impl RunId {
    /// Creates a new random run ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a run ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of the capture monitor.
///
/// ```text
/// Idle → Detecting → Recording → Stopped
/// ```
///
/// A stop request collapses any state to `Stopped`; the `failed` signal is
/// set alongside the transition when the cause was an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    /// Created, not yet started.
    Idle,
    /// The detect-mode process is running and its output is being scanned.
    Detecting,
    /// The record-mode process is writing the rotating capture file set.
    Recording,
    /// Terminal: all owned processes terminated, drained, and reaped.
    Stopped,
}

impl CaptureState {
    /// Returns true if the monitor has finished for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::Recording => "recording",
            Self::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Lifecycle state of the service log monitor.
///
/// ```text
/// Idle → Running → Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    /// Created, not yet started.
    Idle,
    /// The managed service is up and its log stream is being recorded.
    Running,
    /// Terminal: the service process is reaped and the log file is closed.
    Stopped,
}

impl ServiceState {
    /// Returns true if the monitor has finished for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}
