//! Error types for sonda-core.
//!
//! Monitor-internal errors never cross the task boundary: every variant
//! except [`MonitorError::Stopped`] is converted into the monitor's `failed`
//! signal before the task exits.

use std::path::PathBuf;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Error type covering every monitor failure mode.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// A subprocess could not be created. Fatal to the monitor.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// The command line that was attempted.
        command: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A stop was requested while a phase transition was in flight.
    /// Recovered locally and treated as a clean exit, never as a failure.
    #[error("stop requested during phase transition")]
    Stopped,

    /// The detect-mode process exited before producing a matching line.
    #[error("`{command}` exited before producing any matching output")]
    EarlyExit {
        /// The command line of the process that exited.
        command: String,
    },

    /// The log file could not be opened for writing.
    #[error("could not open log file {}: {source}", path.display())]
    LogOpen {
        /// The path that failed to open.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// I/O failure while consuming process output or writing the log.
    #[error("I/O error while consuming process output: {0}")]
    Read(#[from] std::io::Error),

    /// Configuration error detected at load time.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MonitorError {
    /// Creates a spawn error.
    #[must_use]
    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            source,
        }
    }

    /// Creates an early-exit error.
    #[must_use]
    pub fn early_exit(command: impl Into<String>) -> Self {
        Self::EarlyExit {
            command: command.into(),
        }
    }

    /// Creates a log-open error.
    #[must_use]
    pub fn log_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LogOpen {
            path: path.into(),
            source,
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if this is the clean stopped-during-transition exit.
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}
