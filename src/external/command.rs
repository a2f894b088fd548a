//! Checked execution of external commands.

use crate::error::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args...` and fail unless it exits with status 0 within
/// `timeout`. The child is killed when the timeout elapses.
pub async fn run_checked(
    program: &Path,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput> {
    let command_line = format!("{} {}", program.display(), args.join(" "))
        .trim_end()
        .to_string();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!(command = %command_line, "Running command");

    let child = cmd.spawn().map_err(|e| Error::CommandSpawn {
        command: command_line.clone(),
        source: e,
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| Error::CommandTimeout {
            command: command_line.clone(),
            timeout,
        })??;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: command_line,
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(CommandOutput { stdout, stderr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let output = run_checked(
            Path::new("sh"),
            &["-c", "echo hello"],
            None,
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_failure_is_error() {
        let result = run_checked(
            Path::new("sh"),
            &["-c", "echo broken >&2; exit 3"],
            None,
            Duration::from_secs(10),
        )
        .await;

        match result {
            Err(Error::CommandFailed {
                command, stderr, ..
            }) => {
                assert_eq!(command, "sh -c echo broken >&2; exit 3");
                assert_eq!(stderr, "broken");
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let result = run_checked(
            Path::new("sleep"),
            &["5"],
            None,
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(result, Err(Error::CommandTimeout { .. })));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let result = run_checked(
            Path::new("/nonexistent/gantry-test-binary"),
            &[],
            None,
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(Error::CommandSpawn { .. })));
    }

    #[tokio::test]
    async fn test_runs_in_cwd() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = run_checked(Path::new("pwd"), &[], Some(dir.path()), Duration::from_secs(10))
            .await
            .unwrap();
        let reported = std::fs::canonicalize(output.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }
}
