//! Shell-command operation
//!
//! The `gd run` surface injects this into the pool: run the user's command
//! through `sh -c` in each package directory, with the package identified
//! through environment variables. Stderr rides along in the failure
//! message so transient patterns in tool output classify correctly.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use eyre::{Context, Result, bail, eyre};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{Package, PackageResult};
use crate::pool::PackageOperation;

/// Runs one shell command per package
pub struct ShellOperation {
    command: String,
}

impl ShellOperation {
    /// Operation for the given shell command
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

/// Last `max` characters of a string, for error messages
fn tail_of(text: &str, max: usize) -> &str {
    let trimmed = text.trim_end();
    match trimmed.char_indices().nth_back(max.saturating_sub(1)) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}

#[async_trait]
impl PackageOperation for ShellOperation {
    async fn run(&self, package: &Package, cancel: CancellationToken) -> Result<PackageResult> {
        let started = Instant::now();
        let cwd = if package.path.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            package.path.clone()
        };

        debug!(package = %package.name, command = %self.command, cwd = %cwd.display(), "Spawning command");

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&cwd)
            .env("GD_PACKAGE_NAME", &package.name)
            .env("GD_PACKAGE_VERSION", &package.version)
            .env("GD_PACKAGE_PATH", &package.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(format!("Failed to spawn command for {}", package.name))?;

        let mut stdout_pipe = child.stdout.take().ok_or_else(|| eyre!("stdout was not captured"))?;
        let mut stderr_pipe = child.stderr.take().ok_or_else(|| eyre!("stderr was not captured"))?;

        // Drain pipes concurrently so a chatty command cannot deadlock
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                warn!(package = %package.name, "Cancelled, killing command");
                let _ = child.kill().await;
                bail!("operation cancelled for {}", package.name);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as u64;

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            let stderr_text = String::from_utf8_lossy(&stderr);
            bail!(
                "command exited with code {} for {}: {}",
                code,
                package.name,
                tail_of(&stderr_text, 500)
            );
        }

        Ok(PackageResult {
            success: true,
            published_version: None,
            duration_ms: Some(duration_ms),
            metadata: serde_json::json!({
                "exit_code": 0,
                "stdout_bytes": stdout.len(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn package_in(dir: &std::path::Path) -> Package {
        Package::new("pkg").with_version("1.0.0").with_path(dir)
    }

    #[tokio::test]
    async fn test_successful_command() {
        let temp = tempdir().unwrap();
        let op = ShellOperation::new("echo ok");

        let result = op
            .run(&package_in(temp.path()), CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.duration_ms.is_some());
        assert_eq!(result.metadata["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_failure_carries_exit_code_and_stderr() {
        let temp = tempdir().unwrap();
        let op = ShellOperation::new("echo 'broken pipe to registry' >&2; exit 3");

        let error = op
            .run(&package_in(temp.path()), CancellationToken::new())
            .await
            .unwrap_err();

        let message = error.to_string();
        assert!(message.contains("code 3"));
        assert!(message.contains("broken pipe to registry"));
    }

    #[tokio::test]
    async fn test_package_env_is_exported() {
        let temp = tempdir().unwrap();
        let op = ShellOperation::new(r#"test "$GD_PACKAGE_NAME" = pkg && test "$GD_PACKAGE_VERSION" = 1.0.0"#);

        let result = op.run(&package_in(temp.path()), CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_kills_promptly() {
        let temp = tempdir().unwrap();
        let op = ShellOperation::new("sleep 30");
        let cancel = CancellationToken::new();

        let killer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            killer.cancel();
        });

        let started = Instant::now();
        let result = op.run(&package_in(temp.path()), cancel).await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_tail_of_truncates_long_text() {
        let text = "x".repeat(1_000);
        assert_eq!(tail_of(&text, 500).len(), 500);
        assert_eq!(tail_of("short", 500), "short");
    }
}
