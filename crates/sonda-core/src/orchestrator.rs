//! Sequences the two monitors and produces the run outcome.
//!
//! The orchestrator blocks on composite waits ("data found OR failed"),
//! never on a single signal, so a monitor failure can never wedge a
//! detection window. Whatever branch is taken, both monitors are stopped
//! and joined before `run` returns.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureMonitor;
use crate::config::RunConfig;
use crate::monitor::stop_and_join;
use crate::service::ServiceLogMonitor;
use crate::waiter::CompositeWaiter;

/// Final outcome of a diagnostic run.
///
/// Always a plain value: timeouts are first-class informational outcomes,
/// distinguishing "nothing observed" from "observed and failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// No matching traffic appeared within the detection window.
    NoSignalDetected,
    /// The capture monitor failed.
    CaptureFailure,
    /// The service ran out the detection window without logging an error.
    NoErrorObserved,
    /// The service log monitor failed.
    ServiceMonitorFailure,
    /// An error was observed and recorded for the monitor window.
    ErrorCaptured,
}

impl Outcome {
    /// Returns true for monitor failures, as opposed to quiet runs.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::CaptureFailure | Self::ServiceMonitorFailure)
    }

    /// Process exit code for this outcome.
    ///
    /// A run that could not even see traffic exits non-zero so scripted
    /// callers notice; a quiet service is a success.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::NoErrorObserved | Self::ErrorCaptured => 0,
            Self::NoSignalDetected | Self::CaptureFailure | Self::ServiceMonitorFailure => 1,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoSignalDetected => "no signal detected",
            Self::CaptureFailure => "capture failure",
            Self::NoErrorObserved => "no error observed",
            Self::ServiceMonitorFailure => "service monitor failure",
            Self::ErrorCaptured => "error captured",
        };
        write!(f, "{name}")
    }
}

/// Drives the capture and service monitors through one diagnostic run.
pub struct Orchestrator {
    capture: CaptureMonitor,
    service: ServiceLogMonitor,
    detect_window: Duration,
    monitor_window: Duration,
}

impl Orchestrator {
    /// Builds the monitors from configuration; artifacts are written under
    /// `work_dir`.
    #[must_use]
    pub fn new(config: &RunConfig, work_dir: &Path) -> Self {
        let capture_path = work_dir.join(&config.capture.file_name);
        let log_path = work_dir.join(&config.service.file_name);

        let capture = CaptureMonitor::new(config.detect_spec(), config.record_spec(&capture_path));
        let service = ServiceLogMonitor::new(
            config.service_stop_spec(),
            config.service_up_spec(),
            log_path,
        )
        .with_markers(&config.service.error_marker, &config.service.attach_marker)
        .with_attach_timeout(config.service.attach_timeout);

        Self {
            capture,
            service,
            detect_window: config.detect_window,
            monitor_window: config.monitor_window,
        }
    }

    /// Builds an orchestrator from already-constructed monitors.
    #[must_use]
    pub fn from_parts(
        capture: CaptureMonitor,
        service: ServiceLogMonitor,
        detect_window: Duration,
        monitor_window: Duration,
    ) -> Self {
        Self {
            capture,
            service,
            detect_window,
            monitor_window,
        }
    }

    /// Returns the capture monitor.
    #[must_use]
    pub fn capture(&self) -> &CaptureMonitor {
        &self.capture
    }

    /// Returns the service log monitor.
    #[must_use]
    pub fn service(&self) -> &ServiceLogMonitor {
        &self.service
    }

    /// Runs the full sequence and reports the outcome.
    ///
    /// Both monitors are stopped and joined before this returns, on every
    /// branch.
    pub async fn run(&mut self) -> Outcome {
        let outcome = self.drive().await;
        self.shutdown().await;
        tracing::info!(%outcome, "diagnostic run complete");
        outcome
    }

    async fn drive(&mut self) -> Outcome {
        tracing::info!(window = ?self.detect_window, "starting traffic detection");
        self.capture.start();
        let detection = CompositeWaiter::new([
            self.capture.data_found().clone(),
            self.capture.failed().clone(),
        ]);
        if !detection.wait(self.detect_window).await {
            return Outcome::NoSignalDetected;
        }
        if self.capture.failed().is_set() {
            return Outcome::CaptureFailure;
        }

        tracing::info!(window = ?self.detect_window, "restarting service and watching its log");
        self.service.start();
        let errors = CompositeWaiter::new([
            self.service.error_found().clone(),
            self.service.failed().clone(),
        ]);
        if !errors.wait(self.detect_window).await {
            return Outcome::NoErrorObserved;
        }
        if self.service.failed().is_set() {
            return Outcome::ServiceMonitorFailure;
        }

        tracing::info!(window = ?self.monitor_window, "error observed; recording continues");
        tokio::time::sleep(self.monitor_window).await;
        Outcome::ErrorCaptured
    }

    /// Stops and joins both monitors. Idempotent; called from `run` on
    /// every branch and usable directly after an interrupted run.
    pub async fn shutdown(&mut self) {
        stop_and_join(&mut self.capture).await;
        stop_and_join(&mut self.service).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(Outcome::NoErrorObserved.exit_code(), 0);
        assert_eq!(Outcome::ErrorCaptured.exit_code(), 0);
        assert_eq!(Outcome::NoSignalDetected.exit_code(), 1);
        assert_eq!(Outcome::CaptureFailure.exit_code(), 1);
        assert_eq!(Outcome::ServiceMonitorFailure.exit_code(), 1);
    }

    #[test]
    fn test_outcome_failures() {
        assert!(Outcome::CaptureFailure.is_failure());
        assert!(Outcome::ServiceMonitorFailure.is_failure());
        assert!(!Outcome::NoSignalDetected.is_failure());
        assert!(!Outcome::NoErrorObserved.is_failure());
        assert!(!Outcome::ErrorCaptured.is_failure());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::ErrorCaptured.to_string(), "error captured");
        assert_eq!(Outcome::NoSignalDetected.to_string(), "no signal detected");
    }
}
