//! Git checkout for builds

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::PlatformError;

/// Shallow-clone a single branch into `target_dir`.
///
/// Prompts are disabled so an unreachable or private remote fails instead of
/// waiting on a terminal that does not exist.
pub async fn clone_repository(
    git_binary: &str,
    repo_url: &str,
    branch: &str,
    target_dir: &Path,
) -> Result<(), PlatformError> {
    info!(
        "Cloning {} (branch: {}) into {}",
        repo_url,
        branch,
        target_dir.display()
    );

    let output = Command::new(git_binary)
        .args(["clone", "--depth", "1", "--single-branch", "--branch", branch, "--"])
        .arg(repo_url)
        .arg(target_dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PlatformError::CloneError(format!("Failed to run git clone: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("git clone stderr: {}", stderr);
        return Err(PlatformError::CloneError(format!(
            "git clone of {} ({}) exited with {}: {}",
            repo_url,
            branch,
            output.status,
            stderr.trim()
        )));
    }

    info!("Successfully cloned {}", repo_url);
    Ok(())
}
