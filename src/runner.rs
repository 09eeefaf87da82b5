//! Subprocess runner (C3).
//!
//! Spawns a child process, relays its stdout and stderr concurrently to a
//! channel as they arrive, and resolves with its exit code. No line
//! buffering is performed and no stream-merging order is guaranteed between
//! stdout and stderr — only the per-stream arrival order is preserved.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn {executable:?}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error waiting on child: {0}")]
    Io(#[from] std::io::Error),
    #[error("process ended with an unexpected status")]
    UnexpectedStatus,
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited normally with this code.
    Exited(i32),
    /// Killed by a signal; no exit code is meaningful.
    Terminated,
}

impl ExitOutcome {
    /// Collapse to a single integer for the exit-code vector, per the
    /// `TERMINATED_EXIT_CODE` sentinel.
    pub fn as_code(self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => code,
            ExitOutcome::Terminated => crate::constants::TERMINATED_EXIT_CODE,
        }
    }
}

const RELAY_CHUNK_SIZE: usize = 8192;

/// Run `executable argv...` in `cwd`, forwarding every non-empty chunk of
/// stdout/stderr output to `output_tx` as it is read. Resolves once the
/// child has exited and all of its output has been forwarded.
///
/// Dropping the returned future before it resolves kills the child: the
/// command is configured with `kill_on_drop`, so cancellation never leaks a
/// process.
pub async fn run(
    cwd: &Path,
    executable: &str,
    argv: &[String],
    output_tx: UnboundedSender<Vec<u8>>,
) -> Result<ExitOutcome> {
    let mut command = Command::new(executable);
    command
        .args(argv)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
        executable: executable.to_string(),
        source,
    })?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let stdout_relay = tokio::spawn(relay_stdout(stdout, output_tx.clone()));
    let stderr_relay = tokio::spawn(relay_stderr(stderr, output_tx));

    let status = child.wait().await?;
    // Wait for both relays to drain fully before reporting completion, so
    // the caller's "finish" signal is strictly after the last output chunk.
    let _ = stdout_relay.await;
    let _ = stderr_relay.await;

    if let Some(code) = status.code() {
        return Ok(ExitOutcome::Exited(code));
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal().is_some() {
            return Ok(ExitOutcome::Terminated);
        }
    }

    Err(RunnerError::UnexpectedStatus)
}

async fn relay_stdout(mut stdout: ChildStdout, tx: UnboundedSender<Vec<u8>>) {
    let mut buf = vec![0u8; RELAY_CHUNK_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

async fn relay_stderr(mut stderr: ChildStderr, tx: UnboundedSender<Vec<u8>>) {
    let mut buf = vec![0u8; RELAY_CHUNK_SIZE];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn collect(mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend(chunk);
        }
        out
    }

    #[tokio::test]
    async fn reports_normal_exit_code() {
        let (tx, rx) = mpsc::unbounded_channel();
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(dir.path(), "sh", &["-c".into(), "exit 3".into()], tx)
            .await
            .unwrap();
        drop(collect(rx).await);
        assert_eq!(outcome, ExitOutcome::Exited(3));
    }

    #[tokio::test]
    async fn relays_stdout_and_stderr_chunks() {
        let (tx, rx) = mpsc::unbounded_channel();
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(
            dir.path(),
            "sh",
            &["-c".into(), "echo out; echo err 1>&2".into()],
            tx,
        )
        .await
        .unwrap();
        let bytes = collect(rx).await;
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("out"));
        assert!(text.contains("err"));
        assert_eq!(outcome, ExitOutcome::Exited(0));
    }

    #[tokio::test]
    async fn fails_to_spawn_missing_executable() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path(), "no-such-executable-xyz", &[], tx)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn runs_in_the_given_working_directory() {
        let (tx, rx) = mpsc::unbounded_channel();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), b"present").unwrap();
        let outcome = run(dir.path(), "sh", &["-c".into(), "cat marker.txt".into()], tx)
            .await
            .unwrap();
        let bytes = collect(rx).await;
        assert_eq!(bytes, b"present");
        assert_eq!(outcome, ExitOutcome::Exited(0));
    }
}
