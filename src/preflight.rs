//! Environment checks before a run.
//!
//! Fail fast on misconfiguration: a run that cannot capture packets or
//! reach the service control command should refuse to start rather than
//! fail minutes into a detection window.

use anyhow::Context;

use sonda_core::RunConfig;

/// Verifies privileges and tool presence for the configured run.
pub fn check(config: &RunConfig) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        if !nix::unistd::Uid::effective().is_root() {
            anyhow::bail!(
                "packet capture requires administrator privileges; re-run with sudo"
            );
        }
    }

    which::which(&config.capture.program)
        .with_context(|| format!("{} is not installed", config.capture.program))?;
    which::which(&config.service.program)
        .with_context(|| format!("{} is not installed", config.service.program))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool_is_rejected() {
        let mut config = RunConfig::new("eth0", "sh");
        config.capture.program = "/nonexistent/sonda-capture-tool".to_string();

        // Rejected either on the missing tool or, for unprivileged test
        // runs, on the root check; both are refusals to start.
        let err = check(&config).unwrap_err();
        let message = format!("{err:#}");
        assert!(
            message.contains("privileges") || message.contains("not installed"),
            "unexpected preflight error: {message}"
        );
    }
}
