//! Subprocess ownership with process-group signaling.
//!
//! The capture and service tools may spawn dependents of their own, so
//! termination must target the whole process group: signaling only the
//! leader risks orphans that keep the output pipe open. Each child is
//! spawned as the leader of a fresh group, and [`ProcessHandle::terminate`]
//! signals the group via `killpg`.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use crate::error::{MonitorError, Result};

/// Command template for a monitor-owned subprocess.
///
/// Configuration produces the real tool invocations; tests substitute
/// shell scripts with the same shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
}

impl ProcessSpec {
    /// Creates a spec with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Renders the full command line for log and error messages.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl std::fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command_line())
    }
}

/// Copyable handle for signaling a process group from another task.
///
/// Carries only the group ID; the [`ManagedProcess`] keeps exclusive
/// ownership of the child itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pgid: i32,
}

impl ProcessHandle {
    /// Returns the process group ID.
    #[must_use]
    pub const fn pgid(&self) -> i32 {
        self.pgid
    }

    /// Sends SIGTERM to the whole process group.
    ///
    /// ESRCH means the group is already gone, which is a normal outcome on
    /// every stop path and is not reported.
    pub fn terminate(&self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal as NixSignal, killpg};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(self.pgid), NixSignal::SIGTERM) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(err) => {
                    tracing::warn!(pgid = self.pgid, %err, "failed to signal process group");
                }
            }
        }
    }
}

/// A child process exclusively owned by one monitor task.
///
/// Spawned with stdout piped and the child as leader of its own process
/// group. Exactly one monitor owns a process at a time; ownership transfers
/// only by tearing the old process down and spawning a new one.
pub struct ManagedProcess {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    handle: ProcessHandle,
    command: String,
}

impl ManagedProcess {
    /// Spawns the process described by `spec`.
    ///
    /// # Errors
    /// Returns [`MonitorError::Spawn`] if the process cannot be created.
    pub fn spawn(spec: &ProcessSpec) -> Result<Self> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|err| MonitorError::spawn(spec.command_line(), err))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MonitorError::spawn(
                spec.command_line(),
                std::io::Error::other("stdout pipe missing"),
            )
        })?;
        let pid = child.id().ok_or_else(|| {
            MonitorError::spawn(
                spec.command_line(),
                std::io::Error::other("child exited before its pid could be read"),
            )
        })?;

        let command_line = spec.command_line();
        tracing::debug!(command = %command_line, pid, "spawned process group");

        #[allow(clippy::cast_possible_wrap)] // PID always fits in i32 on Unix
        let handle = ProcessHandle { pgid: pid as i32 };

        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
            handle,
            command: command_line,
        })
    }

    /// Returns the signaling handle for this process's group.
    #[must_use]
    pub fn handle(&self) -> ProcessHandle {
        self.handle
    }

    /// Returns the rendered command line.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Reads the next stdout line; `None` once the pipe closes.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        self.lines.next_line().await.map_err(MonitorError::from)
    }

    /// Sends SIGTERM to the process group.
    pub fn terminate(&self) {
        self.handle.terminate();
    }

    /// Drains remaining output to EOF, then reaps the child.
    ///
    /// A pipe with unread output can block the child's exit, so the drain
    /// is mandatory before the wait.
    pub async fn drain_and_join(mut self) -> Result<()> {
        while self.lines.next_line().await?.is_some() {}
        let status = self.child.wait().await?;
        tracing::debug!(command = %self.command, %status, "reaped process group");
        Ok(())
    }
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("command", &self.command)
            .field("pgid", &self.handle.pgid)
            .finish()
    }
}

/// Reads the next line from an optionally-owned process.
///
/// Monitors keep their current process in an `Option` so teardown can take
/// it on any exit path; this helper keeps the read loops borrow-friendly.
pub(crate) async fn next_owned_line(
    current: &mut Option<ManagedProcess>,
) -> Result<Option<String>> {
    match current.as_mut() {
        Some(process) => process.next_line().await,
        None => Ok(None),
    }
}

/// Runs a short-lived command to completion with all stdio discarded.
///
/// Used for the best-effort service "stop" command; the caller decides
/// whether a failure matters.
pub async fn run_silent(spec: &ProcessSpec) -> std::io::Result<std::process::ExitStatus> {
    Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("/bin/sh").arg("-c").arg(script)
    }

    #[test]
    fn test_spec_builder_and_command_line() {
        let spec = ProcessSpec::new("tcpdump")
            .arg("-l")
            .args(["-i", "eth0"])
            .arg("udp port 2055");
        assert_eq!(spec.command_line(), "tcpdump -l -i eth0 udp port 2055");
        assert_eq!(spec.to_string(), spec.command_line());
    }

    #[tokio::test]
    async fn test_spawn_and_read_lines() {
        let mut process = ManagedProcess::spawn(&sh("echo one; echo two")).unwrap();
        assert_eq!(process.next_line().await.unwrap(), Some("one".to_string()));
        assert_eq!(process.next_line().await.unwrap(), Some("two".to_string()));
        assert_eq!(process.next_line().await.unwrap(), None);
        process.drain_and_join().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_unblocks_drain() {
        let process = ManagedProcess::spawn(&sh("echo ready; sleep 30")).unwrap();
        process.terminate();
        // The group signal ends the sleep, the pipe closes, and the child
        // can be reaped without waiting out the sleep.
        process.drain_and_join().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_twice_is_harmless() {
        let process = ManagedProcess::spawn(&sh("sleep 30")).unwrap();
        let handle = process.handle();
        handle.terminate();
        handle.terminate();
        process.drain_and_join().await.unwrap();
        // The group is gone by now; a further terminate must not error.
        handle.terminate();
    }

    #[tokio::test]
    async fn test_spawn_failure_is_spawn_error() {
        let spec = ProcessSpec::new("/nonexistent/sonda-test-binary");
        let err = ManagedProcess::spawn(&spec).unwrap_err();
        assert!(matches!(err, MonitorError::Spawn { .. }));
        assert!(err.to_string().contains("sonda-test-binary"));
    }

    #[tokio::test]
    async fn test_run_silent_ignores_output() {
        let status = run_silent(&sh("echo noisy; exit 3")).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }
}
