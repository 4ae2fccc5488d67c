//! Managed-service restart and log monitor.
//!
//! Restarts the managed service, records its log stream verbatim, and
//! scans it for two markers: the error marker the orchestrator waits on,
//! and the attach marker gating termination. The service only honors a
//! group termination signal cleanly after its attach line has been seen,
//! so `stop` waits for that handshake before signaling.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;

use crate::error::{MonitorError, Result};
use crate::monitor::Monitor;
use crate::process::{ManagedProcess, ProcessHandle, ProcessSpec, next_owned_line, run_silent};
use crate::signal::Signal;
use crate::types::ServiceState;

/// Restarts a managed service and scans its log for an error marker.
pub struct ServiceLogMonitor {
    error_found: Signal,
    failed: Signal,
    attached: Signal,
    stop_requested: Signal,
    state: Arc<Mutex<ServiceState>>,
    owned: Arc<Mutex<Option<ProcessHandle>>>,
    stop_spec: ProcessSpec,
    up_spec: ProcessSpec,
    log_path: PathBuf,
    error_marker: String,
    attach_marker: String,
    attach_timeout: Option<Duration>,
    task: Option<JoinHandle<()>>,
}

impl ServiceLogMonitor {
    /// Creates a monitor from the service's stop and start invocations and
    /// the path the log stream is recorded to.
    #[must_use]
    pub fn new(stop_spec: ProcessSpec, up_spec: ProcessSpec, log_path: impl Into<PathBuf>) -> Self {
        Self {
            error_found: Signal::new(),
            failed: Signal::new(),
            attached: Signal::new(),
            stop_requested: Signal::new(),
            state: Arc::new(Mutex::new(ServiceState::Idle)),
            owned: Arc::new(Mutex::new(None)),
            stop_spec,
            up_spec,
            log_path: log_path.into(),
            error_marker: "ERR".to_string(),
            attach_marker: "Attaching".to_string(),
            attach_timeout: None,
            task: None,
        }
    }

    /// Overrides the error and attach markers.
    #[must_use]
    pub fn with_markers(
        mut self,
        error_marker: impl Into<String>,
        attach_marker: impl Into<String>,
    ) -> Self {
        self.error_marker = error_marker.into();
        self.attach_marker = attach_marker.into();
        self
    }

    /// Bounds the attach handshake wait during stop. The default (`None`)
    /// waits without bound.
    #[must_use]
    pub fn with_attach_timeout(mut self, attach_timeout: Option<Duration>) -> Self {
        self.attach_timeout = attach_timeout;
        self
    }

    /// Set the first time the error marker is seen in the log stream.
    #[must_use]
    pub fn error_found(&self) -> &Signal {
        &self.error_found
    }

    /// Set when the monitor has failed; terminal together with `Stopped`.
    #[must_use]
    pub fn failed(&self) -> &Signal {
        &self.failed
    }

    /// Set once the service has attached its dependents and can be
    /// terminated cleanly.
    #[must_use]
    pub fn attached(&self) -> &Signal {
        &self.attached
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// Starts the monitor task. A second call is a no-op.
    pub fn start(&mut self) {
        if self.task.is_some() {
            tracing::warn!("service log monitor already started");
            return;
        }
        let worker = Worker {
            error_found: self.error_found.clone(),
            attached: self.attached.clone(),
            failed: self.failed.clone(),
            stop_requested: self.stop_requested.clone(),
            state: Arc::clone(&self.state),
            owned: Arc::clone(&self.owned),
            stop_spec: self.stop_spec.clone(),
            up_spec: self.up_spec.clone(),
            log_path: self.log_path.clone(),
            error_marker: self.error_marker.clone(),
            attach_marker: self.attach_marker.clone(),
            attach_timeout: self.attach_timeout,
            current: None,
            log: None,
        };
        self.task = Some(tokio::spawn(worker.run()));
    }

    /// Requests a stop. Idempotent and safe to call at any time.
    ///
    /// If a service process is currently owned, the call first waits for
    /// the attach handshake: signaling the group before attach leaves the
    /// managed service in an inconsistent running state.
    pub async fn stop(&self) {
        let handle = *self.owned.lock();
        if let Some(handle) = handle {
            match self.attach_timeout {
                None => self.attached.wait_set().await,
                Some(limit) => {
                    if !self.attached.wait(limit).await {
                        tracing::warn!(
                            timeout = ?limit,
                            "attach marker not observed in time; terminating anyway"
                        );
                    }
                }
            }
            handle.terminate();
        }
        self.stop_requested.set();
    }

    /// Waits for the monitor task to finish.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(%err, "service log monitor task did not shut down cleanly");
                self.failed.set();
            }
        }
    }
}

#[async_trait]
impl Monitor for ServiceLogMonitor {
    fn failed(&self) -> &Signal {
        &self.failed
    }

    async fn stop(&self) {
        Self::stop(self).await;
    }

    async fn join(&mut self) {
        Self::join(self).await;
    }
}

/// Task-side state; owns the service process and the log writer outright.
struct Worker {
    error_found: Signal,
    attached: Signal,
    failed: Signal,
    stop_requested: Signal,
    state: Arc<Mutex<ServiceState>>,
    owned: Arc<Mutex<Option<ProcessHandle>>>,
    stop_spec: ProcessSpec,
    up_spec: ProcessSpec,
    log_path: PathBuf,
    error_marker: String,
    attach_marker: String,
    attach_timeout: Option<Duration>,
    current: Option<ManagedProcess>,
    log: Option<BufWriter<tokio::fs::File>>,
}

impl Worker {
    async fn run(mut self) {
        let result = self.execute().await;
        match &result {
            Ok(()) => {}
            Err(err) if err.is_stop() => {
                tracing::debug!("service log monitor stopped during startup");
            }
            Err(err) => {
                tracing::error!(%err, "service log monitor failed");
                self.failed.set();
            }
        }

        // Teardown on every exit path: flag the stop; terminate, drain, and
        // reap any owned process; flush and close the log file.
        if !self.stop_requested.is_set() {
            self.stop_requested.set();
        }
        if let Some(mut process) = self.current.take() {
            // The attach handshake gates the signal on failure paths too.
            // The main loop is gone by now, so scan the stream for the
            // marker here rather than waiting on a signal nobody sets.
            self.scan_for_attach(&mut process).await;
            process.terminate();
            if let Err(err) = process.drain_and_join().await {
                tracing::warn!(%err, "failed to reap service process");
            }
        }
        self.owned.lock().take();
        if let Some(mut log) = self.log.take() {
            if let Err(err) = log.flush().await {
                tracing::warn!(%err, "failed to flush service log");
            }
        }
        *self.state.lock() = ServiceState::Stopped;
    }

    async fn execute(&mut self) -> Result<()> {
        self.check_stop()?;
        let file = tokio::fs::File::create(&self.log_path)
            .await
            .map_err(|err| MonitorError::log_open(&self.log_path, err))?;
        self.log = Some(BufWriter::new(file));

        // Best-effort stop before the restart; the service may simply not
        // be running yet, so failures are ignored.
        match run_silent(&self.stop_spec).await {
            Ok(status) if !status.success() => {
                tracing::debug!(command = %self.stop_spec, %status, "service stop command failed (ignored)");
            }
            Err(err) => {
                tracing::debug!(command = %self.stop_spec, %err, "service stop command failed (ignored)");
            }
            Ok(_) => {}
        }
        self.check_stop()?;

        let process = ManagedProcess::spawn(&self.up_spec)?;
        *self.owned.lock() = Some(process.handle());
        self.current = Some(process);
        *self.state.lock() = ServiceState::Running;
        // A stop that raced the spawn saw an empty handle slot; hand the
        // kill to the teardown, which honors the attach handshake.
        self.check_stop()?;
        tracing::info!(command = %self.up_spec, log = %self.log_path.display(), "service restarted; recording log");

        while let Some(line) = next_owned_line(&mut self.current).await? {
            if line.contains(&self.error_marker) && !self.error_found.is_set() {
                tracing::info!(%line, "error marker observed");
                self.error_found.set();
            }
            if line.contains(&self.attach_marker) && !self.attached.is_set() {
                tracing::debug!(%line, "service attached");
                self.attached.set();
            }
            if let Some(log) = self.log.as_mut() {
                log.write_all(line.as_bytes()).await?;
                log.write_all(b"\n").await?;
            }
        }

        // EOF: the service exited or its group was signaled. Reap it here;
        // the teardown handles the log flush.
        if let Some(process) = self.current.take() {
            process.drain_and_join().await?;
        }
        self.owned.lock().take();
        Ok(())
    }

    fn check_stop(&self) -> Result<()> {
        if self.stop_requested.is_set() {
            Err(MonitorError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Reads the process's output until the attach marker, EOF, or the
    /// configured bound, setting `attached` if the marker turns up.
    async fn scan_for_attach(&self, process: &mut ManagedProcess) {
        if self.attached.is_set() {
            return;
        }
        let scan = async {
            loop {
                match process.next_line().await {
                    Ok(Some(line)) => {
                        if line.contains(&self.attach_marker) {
                            self.attached.set();
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        };
        match self.attach_timeout {
            None => scan.await,
            Some(limit) => {
                if tokio::time::timeout(limit, scan).await.is_err() {
                    tracing::warn!(
                        timeout = ?limit,
                        "attach marker not observed in time; terminating anyway"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::tests::mocks::{sh, true_spec, wait_until};

    #[tokio::test]
    async fn test_log_recorded_verbatim_and_error_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("service.log");
        let mut monitor = ServiceLogMonitor::new(
            true_spec(),
            sh("echo 'Attaching to flowpipe_converter_1'; \
                echo 'time=12:00 level=ERR msg=\"lookup failed\"'; \
                echo 'time=12:01 level=info msg=ok'; \
                sleep 30"),
            &log_path,
        );

        monitor.start();
        assert!(monitor.error_found().wait(Duration::from_secs(10)).await);
        assert!(monitor.attached().is_set());

        monitor.stop().await;
        monitor.join().await;

        assert_eq!(monitor.state(), ServiceState::Stopped);
        assert!(!monitor.failed().is_set());

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("Attaching to flowpipe_converter_1"));
        assert!(log.contains("level=ERR"));
        assert!(log.contains("msg=ok"));
    }

    #[tokio::test]
    async fn test_stop_blocks_until_attach_observed() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = ServiceLogMonitor::new(
            true_spec(),
            sh("sleep 1; echo 'Attaching to services'; sleep 30"),
            dir.path().join("service.log"),
        );

        monitor.start();
        assert!(
            wait_until(Duration::from_secs(10), || {
                monitor.state() == ServiceState::Running
            })
            .await
        );

        // No attach line has been emitted yet, so the stop must still be
        // pending after a generous poll.
        {
            let stop = monitor.stop();
            tokio::pin!(stop);
            assert!(
                tokio::time::timeout(Duration::from_millis(300), &mut stop)
                    .await
                    .is_err(),
                "stop completed before the attach marker was observed"
            );
            assert!(!monitor.attached().is_set());

            // Once the service attaches, the same stop call completes.
            stop.await;
            assert!(monitor.attached().is_set());
        }

        monitor.join().await;
        assert_eq!(monitor.state(), ServiceState::Stopped);
        assert!(!monitor.failed().is_set());
    }

    #[tokio::test]
    async fn test_bounded_attach_wait() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = ServiceLogMonitor::new(
            true_spec(),
            sh("echo started; sleep 30"),
            dir.path().join("service.log"),
        )
        .with_attach_timeout(Some(Duration::from_millis(100)));

        monitor.start();
        assert!(
            wait_until(Duration::from_secs(10), || {
                monitor.state() == ServiceState::Running
            })
            .await
        );

        // The attach marker never appears; the bounded wait elapses and the
        // stop proceeds anyway.
        monitor.stop().await;
        monitor.join().await;
        assert_eq!(monitor.state(), ServiceState::Stopped);
        assert!(!monitor.attached().is_set());
    }

    #[tokio::test]
    async fn test_failing_stop_command_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = ServiceLogMonitor::new(
            sh("exit 7"),
            sh("echo Attaching; echo 'level=ERR'; sleep 30"),
            dir.path().join("service.log"),
        );

        monitor.start();
        assert!(monitor.error_found().wait(Duration::from_secs(10)).await);
        monitor.stop().await;
        monitor.join().await;
        assert!(!monitor.failed().is_set());
    }

    #[tokio::test]
    async fn test_unwritable_log_path_sets_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = ServiceLogMonitor::new(
            true_spec(),
            sh("sleep 30"),
            dir.path().join("missing").join("service.log"),
        );

        monitor.start();
        assert!(monitor.failed().wait(Duration::from_secs(10)).await);
        monitor.join().await;
        assert_eq!(monitor.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_service_exiting_quietly_is_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("service.log");
        let mut monitor = ServiceLogMonitor::new(
            true_spec(),
            sh("echo 'Attaching'; echo done"),
            &log_path,
        );

        monitor.start();
        assert!(
            wait_until(Duration::from_secs(10), || {
                monitor.state() == ServiceState::Stopped
            })
            .await
        );
        monitor.stop().await;
        monitor.join().await;

        assert!(!monitor.failed().is_set());
        assert!(!monitor.error_found().is_set());
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("done"));
    }

    #[tokio::test]
    async fn test_stop_before_start_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let started_file = dir.path().join("started");
        let mut monitor = ServiceLogMonitor::new(
            true_spec(),
            sh(&format!("touch '{}'; sleep 30", started_file.display())),
            dir.path().join("service.log"),
        );

        monitor.stop().await;
        monitor.start();
        monitor.join().await;

        assert_eq!(monitor.state(), ServiceState::Stopped);
        assert!(!monitor.failed().is_set());
        assert!(!started_file.exists());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = ServiceLogMonitor::new(
            true_spec(),
            sh("echo Attaching; sleep 30"),
            dir.path().join("service.log"),
        );

        monitor.start();
        assert!(
            wait_until(Duration::from_secs(10), || {
                monitor.state() == ServiceState::Running
            })
            .await
        );
        monitor.stop().await;
        monitor.stop().await;
        monitor.join().await;
        assert_eq!(monitor.state(), ServiceState::Stopped);
        assert!(!monitor.failed().is_set());
    }
}
