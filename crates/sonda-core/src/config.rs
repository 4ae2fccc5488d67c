//! Run configuration.
//!
//! Configuration is validated at load time, with sensible defaults and
//! clear error messages. Durations are written in human-readable form
//! ("5m", "90s") in the TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MonitorError, Result};
use crate::process::ProcessSpec;

/// Top-level configuration for one diagnostic run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Network interface the capture tool listens on.
    pub interface: String,

    /// UDP port carrying the traffic of interest.
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long to wait for a detection (first for traffic, then for an
    /// error in the service log).
    #[serde(default = "default_detect_window")]
    #[serde(with = "humantime_serde")]
    pub detect_window: Duration,

    /// How long to keep recording after an error has been observed.
    #[serde(default = "default_monitor_window")]
    #[serde(with = "humantime_serde")]
    pub monitor_window: Duration,

    /// Capture tool settings.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Managed service settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Directory the artifacts are collected in. Defaults to a fresh
    /// temporary directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Base name for the collected directory and packaged archive.
    #[serde(default = "default_archive_name")]
    pub archive_name: String,
}

fn default_port() -> u16 {
    2055
}

fn default_detect_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_monitor_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_archive_name() -> String {
    "sonda-diagnostics".to_string()
}

impl RunConfig {
    /// Creates a configuration with required fields and defaults elsewhere.
    #[must_use]
    pub fn new(interface: impl Into<String>, service_program: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            port: default_port(),
            detect_window: default_detect_window(),
            monitor_window: default_monitor_window(),
            capture: CaptureConfig::default(),
            service: ServiceConfig {
                program: service_program.into(),
                ..ServiceConfig::default()
            },
            output_dir: None,
            archive_name: default_archive_name(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            return Err(MonitorError::config("interface cannot be empty"));
        }
        if self.detect_window.is_zero() {
            return Err(MonitorError::config("detect_window must be non-zero"));
        }
        if self.archive_name.is_empty() {
            return Err(MonitorError::config("archive_name cannot be empty"));
        }
        self.capture.validate()?;
        self.service.validate()?;
        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|err| MonitorError::config(format!("failed to read config: {err}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|err| MonitorError::config(format!("failed to parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// BPF-style filter expression selecting the traffic of interest.
    #[must_use]
    pub fn filter(&self) -> String {
        format!("udp port {}", self.port)
    }

    /// Detect-mode invocation: line-buffered text output on stdout.
    #[must_use]
    pub fn detect_spec(&self) -> ProcessSpec {
        ProcessSpec::new(&self.capture.program)
            .arg("-l")
            .args(["-i", self.interface.as_str()])
            .arg(self.filter())
    }

    /// Record-mode invocation: write to a size-rotated capture file set.
    #[must_use]
    pub fn record_spec(&self, capture_path: &Path) -> ProcessSpec {
        ProcessSpec::new(&self.capture.program)
            .args(["-i", self.interface.as_str()])
            .args(["-C", &self.capture.rotate_file_mb.to_string()])
            .arg("-w")
            .arg(capture_path.to_string_lossy())
            .args(["-s", &self.capture.snaplen.to_string()])
            .arg(self.filter())
    }

    /// Best-effort service stop invocation.
    #[must_use]
    pub fn service_stop_spec(&self) -> ProcessSpec {
        ProcessSpec::new(&self.service.program).arg(&self.service.stop_command)
    }

    /// Long-running service start invocation.
    #[must_use]
    pub fn service_up_spec(&self) -> ProcessSpec {
        ProcessSpec::new(&self.service.program).arg(&self.service.up_command)
    }
}

/// Capture tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture program.
    #[serde(default = "default_capture_program")]
    pub program: String,

    /// Size at which the capture file rotates, in megabytes.
    #[serde(default = "default_rotate_file_mb")]
    pub rotate_file_mb: u32,

    /// Bytes captured per packet; 0 records full packets.
    #[serde(default)]
    pub snaplen: u32,

    /// File name of the capture inside the collected directory.
    #[serde(default = "default_capture_file_name")]
    pub file_name: String,
}

fn default_capture_program() -> String {
    "tcpdump".to_string()
}

fn default_rotate_file_mb() -> u32 {
    50
}

fn default_capture_file_name() -> String {
    "traffic.pcap".to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: default_capture_program(),
            rotate_file_mb: default_rotate_file_mb(),
            snaplen: 0,
            file_name: default_capture_file_name(),
        }
    }
}

impl CaptureConfig {
    /// Validates capture settings.
    ///
    /// # Errors
    /// Returns an error if the settings are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.program.is_empty() {
            return Err(MonitorError::config("capture.program cannot be empty"));
        }
        if self.rotate_file_mb == 0 {
            return Err(MonitorError::config(
                "capture.rotate_file_mb must be greater than 0",
            ));
        }
        if self.file_name.is_empty() {
            return Err(MonitorError::config("capture.file_name cannot be empty"));
        }
        Ok(())
    }
}

/// Managed service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service control program (runs `<program> <stop_command>` and
    /// `<program> <up_command>`).
    #[serde(default)]
    pub program: String,

    /// Subcommand that stops the service; failures are ignored since the
    /// service may not be running yet.
    #[serde(default = "default_stop_command")]
    pub stop_command: String,

    /// Subcommand that starts the service in the foreground.
    #[serde(default = "default_up_command")]
    pub up_command: String,

    /// Substring marking an application-level error in the log stream.
    #[serde(default = "default_error_marker")]
    pub error_marker: String,

    /// Substring marking that the service has attached its dependents and
    /// will honor a termination signal cleanly.
    #[serde(default = "default_attach_marker")]
    pub attach_marker: String,

    /// Bound on the attach handshake wait during stop. `None` preserves
    /// the unbounded wait.
    #[serde(default)]
    #[serde(with = "humantime_serde::optional")]
    pub attach_timeout: Option<Duration>,

    /// File name of the recorded log inside the collected directory.
    #[serde(default = "default_log_file_name")]
    pub file_name: String,
}

fn default_stop_command() -> String {
    "stop".to_string()
}

fn default_up_command() -> String {
    "up".to_string()
}

fn default_error_marker() -> String {
    "ERR".to_string()
}

fn default_attach_marker() -> String {
    "Attaching".to_string()
}

fn default_log_file_name() -> String {
    "service.log".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            stop_command: default_stop_command(),
            up_command: default_up_command(),
            error_marker: default_error_marker(),
            attach_marker: default_attach_marker(),
            attach_timeout: None,
            file_name: default_log_file_name(),
        }
    }
}

impl ServiceConfig {
    /// Validates service settings.
    ///
    /// # Errors
    /// Returns an error if the settings are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.program.is_empty() {
            return Err(MonitorError::config("service.program cannot be empty"));
        }
        if self.error_marker.is_empty() {
            return Err(MonitorError::config("service.error_marker cannot be empty"));
        }
        if self.attach_marker.is_empty() {
            return Err(MonitorError::config(
                "service.attach_marker cannot be empty",
            ));
        }
        if self.file_name.is_empty() {
            return Err(MonitorError::config("service.file_name cannot be empty"));
        }
        Ok(())
    }
}

/// Serde helper for humantime durations.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes a duration as a human-readable string.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    /// Deserializes a duration from a human-readable string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Same as the parent module, for optional durations.
    pub mod optional {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        /// Serializes an optional duration as a human-readable string.
        ///
        /// # Errors
        /// Returns an error if serialization fails.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(duration) => {
                    serializer.serialize_some(&humantime::format_duration(*duration).to_string())
                }
                None => serializer.serialize_none(),
            }
        }

        /// Deserializes an optional duration from a human-readable string.
        ///
        /// # Errors
        /// Returns an error if the string cannot be parsed.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s: Option<String> = Option::deserialize(deserializer)?;
            s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_defaults() {
        let config = RunConfig::new("eth0", "flowpipe");
        assert_eq!(config.port, 2055);
        assert_eq!(config.detect_window, Duration::from_secs(300));
        assert_eq!(config.monitor_window, Duration::from_secs(300));
        assert_eq!(config.capture.program, "tcpdump");
        assert_eq!(config.capture.rotate_file_mb, 50);
        assert_eq!(config.service.program, "flowpipe");
        assert_eq!(config.service.error_marker, "ERR");
        assert_eq!(config.service.attach_marker, "Attaching");
        assert!(config.service.attach_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_interface() {
        let config = RunConfig::new("", "flowpipe");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_service_program() {
        let config = RunConfig::new("eth0", "");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_rotate_size() {
        let mut config = RunConfig::new("eth0", "flowpipe");
        config.capture.rotate_file_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            interface = "ens3"
            port = 4739
            detect_window = "90s"
            monitor_window = "2m"

            [service]
            program = "flowpipe"
            attach_timeout = "30s"
        "#;
        let config: RunConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.interface, "ens3");
        assert_eq!(config.port, 4739);
        assert_eq!(config.detect_window, Duration::from_secs(90));
        assert_eq!(config.monitor_window, Duration::from_secs(120));
        assert_eq!(config.service.attach_timeout, Some(Duration::from_secs(30)));
        // Unspecified sections fall back wholesale.
        assert_eq!(config.capture.program, "tcpdump");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_detect_spec_shape() {
        let config = RunConfig::new("eth0", "flowpipe");
        let spec = config.detect_spec();
        assert_eq!(
            spec.command_line(),
            "tcpdump -l -i eth0 udp port 2055"
        );
    }

    #[test]
    fn test_record_spec_shape() {
        let config = RunConfig::new("eth0", "flowpipe");
        let spec = config.record_spec(Path::new("/tmp/out/traffic.pcap"));
        assert_eq!(
            spec.command_line(),
            "tcpdump -i eth0 -C 50 -w /tmp/out/traffic.pcap -s 0 udp port 2055"
        );
    }

    #[test]
    fn test_service_specs() {
        let config = RunConfig::new("eth0", "flowpipe");
        assert_eq!(config.service_stop_spec().command_line(), "flowpipe stop");
        assert_eq!(config.service_up_spec().command_line(), "flowpipe up");
    }
}
