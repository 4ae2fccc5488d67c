//! Two-phase traffic capture monitor.
//!
//! Detect-then-record: a line-buffered capture process is scanned for the
//! first line matching the traffic marker, then torn down and replaced by a
//! second process that records to a rotating capture file set. The phases
//! are strictly ordered: the record process is never spawned before the
//! detect process has been terminated, drained, and reaped.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::{MonitorError, Result};
use crate::monitor::Monitor;
use crate::process::{ManagedProcess, ProcessHandle, ProcessSpec, next_owned_line};
use crate::signal::Signal;
use crate::types::CaptureState;

/// Substring identifying a matching packet in the detect process's output.
pub const DETECT_MARKER: &str = "UDP";

/// Watches live traffic for a marker, then records it.
///
/// Public surface per the teardown contract: `start`, `stop`, `join`, plus
/// the `data_found` and `failed` signals the orchestrator waits on.
pub struct CaptureMonitor {
    data_found: Signal,
    failed: Signal,
    stop_requested: Signal,
    state: Arc<Mutex<CaptureState>>,
    owned: Arc<Mutex<Option<ProcessHandle>>>,
    detect_spec: ProcessSpec,
    record_spec: ProcessSpec,
    marker: String,
    task: Option<JoinHandle<()>>,
}

impl CaptureMonitor {
    /// Creates a monitor from the two phase invocations.
    #[must_use]
    pub fn new(detect_spec: ProcessSpec, record_spec: ProcessSpec) -> Self {
        Self {
            data_found: Signal::new(),
            failed: Signal::new(),
            stop_requested: Signal::new(),
            state: Arc::new(Mutex::new(CaptureState::Idle)),
            owned: Arc::new(Mutex::new(None)),
            detect_spec,
            record_spec,
            marker: DETECT_MARKER.to_string(),
            task: None,
        }
    }

    /// Overrides the detection marker.
    #[must_use]
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Set once a matching line has been seen on the wire.
    #[must_use]
    pub fn data_found(&self) -> &Signal {
        &self.data_found
    }

    /// Set when the monitor has failed; terminal together with `Stopped`.
    #[must_use]
    pub fn failed(&self) -> &Signal {
        &self.failed
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    /// Starts the monitor task. A second call is a no-op.
    pub fn start(&mut self) {
        if self.task.is_some() {
            tracing::warn!("capture monitor already started");
            return;
        }
        let worker = Worker {
            data_found: self.data_found.clone(),
            failed: self.failed.clone(),
            stop_requested: self.stop_requested.clone(),
            state: Arc::clone(&self.state),
            owned: Arc::clone(&self.owned),
            detect_spec: self.detect_spec.clone(),
            record_spec: self.record_spec.clone(),
            marker: self.marker.clone(),
            current: None,
        };
        self.task = Some(tokio::spawn(worker.run()));
    }

    /// Requests a stop. Idempotent and safe to call at any time.
    ///
    /// The owned process group is terminated first so a blocked pipe read
    /// in the monitor task unblocks, then the stop flag is raised.
    pub fn stop(&self) {
        let handle = *self.owned.lock();
        if let Some(handle) = handle {
            handle.terminate();
        }
        self.stop_requested.set();
    }

    /// Waits for the monitor task to finish.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(%err, "capture monitor task did not shut down cleanly");
                self.failed.set();
            }
        }
    }
}

#[async_trait]
impl Monitor for CaptureMonitor {
    fn failed(&self) -> &Signal {
        &self.failed
    }

    async fn stop(&self) {
        Self::stop(self);
    }

    async fn join(&mut self) {
        Self::join(self).await;
    }
}

/// Task-side state; owns the current process outright.
struct Worker {
    data_found: Signal,
    failed: Signal,
    stop_requested: Signal,
    state: Arc<Mutex<CaptureState>>,
    owned: Arc<Mutex<Option<ProcessHandle>>>,
    detect_spec: ProcessSpec,
    record_spec: ProcessSpec,
    marker: String,
    current: Option<ManagedProcess>,
}

impl Worker {
    async fn run(mut self) {
        let result = self.execute().await;
        match &result {
            Ok(()) => {}
            Err(err) if err.is_stop() => {
                tracing::debug!("capture monitor stopped during phase transition");
            }
            Err(err) => {
                tracing::error!(%err, "capture monitor failed");
                self.failed.set();
            }
        }

        // Teardown on every exit path: flag the stop, then terminate,
        // drain, and reap whatever process is still owned.
        if !self.stop_requested.is_set() {
            self.stop_requested.set();
        }
        if let Some(process) = self.current.take() {
            process.terminate();
            if let Err(err) = process.drain_and_join().await {
                tracing::warn!(%err, "failed to reap capture process");
            }
        }
        self.owned.lock().take();
        *self.state.lock() = CaptureState::Stopped;
    }

    async fn execute(&mut self) -> Result<()> {
        self.check_stop()?;
        let process = ManagedProcess::spawn(&self.detect_spec)?;
        *self.owned.lock() = Some(process.handle());
        self.current = Some(process);
        *self.state.lock() = CaptureState::Detecting;
        // A stop that raced the spawn saw an empty handle slot and could
        // not terminate; the teardown owns the kill in that case.
        self.check_stop()?;
        tracing::info!(command = %self.detect_spec, "watching for traffic");

        let mut matched = false;
        while let Some(line) = next_owned_line(&mut self.current).await? {
            if line.contains(&self.marker) {
                tracing::info!(%line, "traffic detected");
                self.data_found.set();
                matched = true;
                break;
            }
        }

        // A stop may have landed while the read was blocked; it wins over
        // whatever the loop concluded.
        self.check_stop()?;
        if !matched {
            return Err(MonitorError::early_exit(self.detect_spec.command_line()));
        }

        // Hand off detect → record. The detect process's group is torn down
        // and fully reaped before the record process exists, and the stop
        // flag is re-checked after each blocking step.
        if let Some(process) = self.current.take() {
            process.terminate();
            process.drain_and_join().await?;
        }
        self.owned.lock().take();
        self.check_stop()?;

        let process = ManagedProcess::spawn(&self.record_spec)?;
        *self.owned.lock() = Some(process.handle());
        self.current = Some(process);
        *self.state.lock() = CaptureState::Recording;
        tracing::info!(command = %self.record_spec, "recording traffic");

        // Nothing to scan while recording; block until a stop is requested.
        self.stop_requested.wait_set().await;
        Ok(())
    }

    fn check_stop(&self) -> Result<()> {
        if self.stop_requested.is_set() {
            Err(MonitorError::Stopped)
        } else {
            Ok(())
        }
    }
}
