//! Artifact packaging.
//!
//! The collected directory is handed to the system `tar` rather than
//! re-implementing archive writing; the capture and log files it contains
//! can be large, and tar's streaming compression handles that fine.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use tokio::process::Command;

use sonda_core::RunId;

/// Packages `<scratch>/<archive_name>/` into `<dest>/<archive_name>-<run id>.tgz`.
pub async fn package(
    scratch: &Path,
    archive_name: &str,
    run_id: &RunId,
    dest: &Path,
) -> anyhow::Result<PathBuf> {
    let output = dest.join(format!("{archive_name}-{run_id}.tgz"));
    let status = Command::new("tar")
        .arg("-C")
        .arg(scratch)
        .arg("-czf")
        .arg(&output)
        .arg(archive_name)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .status()
        .await
        .context("running tar")?;

    if !status.success() {
        anyhow::bail!("tar exited with {status}");
    }
    tracing::info!(archive = %output.display(), "packaged diagnostic artifacts");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_package_produces_archive() {
        let scratch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let collected = scratch.path().join("report");
        std::fs::create_dir(&collected).unwrap();
        std::fs::write(collected.join("service.log"), "line one\n").unwrap();

        let run_id = RunId::new();
        let archive = package(scratch.path(), "report", &run_id, dest.path())
            .await
            .unwrap();

        assert!(archive.exists());
        assert!(archive.file_name().is_some());
        assert!(
            archive
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("report-") && name.ends_with(".tgz"))
        );
    }

    #[tokio::test]
    async fn test_package_fails_on_missing_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let run_id = RunId::new();

        let result = package(scratch.path(), "absent", &run_id, dest.path()).await;
        assert!(result.is_err());
    }
}
