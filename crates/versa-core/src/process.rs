//! Bounded external tool invocation.
//!
//! Every subprocess the release pipeline starts goes through [`run`], which
//! enforces a wall-clock timeout. Output is captured into temp files so a
//! chatty child never blocks on a full pipe while we poll it.

use std::io::{Read, Seek, SeekFrom};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use camino::Utf8Path;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default timeout for external tools.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Errors from running an external tool.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The tool could not be started.
    #[error("failed to execute {tool}: {source}")]
    Exec {
        /// Command line.
        tool: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The tool exited unsuccessfully.
    #[error("{tool} failed: {message}")]
    Failed {
        /// Command line.
        tool: String,
        /// Exit code, if the tool exited normally.
        code: Option<i32>,
        /// Captured stderr (or stdout when stderr was empty).
        message: String,
    },

    /// The tool ran past its deadline and was killed.
    #[error("{tool} timed out after {}s", .timeout.as_secs())]
    TimedOut {
        /// Command line.
        tool: String,
        /// Deadline that was exceeded.
        timeout: Duration,
    },
}

/// Result alias for tool invocations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

/// Run `program` with `args` in `cwd`, killing it after `timeout`.
#[instrument(skip(args), fields(args = ?args))]
pub fn run(
    program: &str,
    args: &[&str],
    cwd: &Utf8Path,
    timeout: Duration,
) -> ToolResult<ToolOutput> {
    let tool = command_line(program, args);
    let exec_err = |source| ToolError::Exec {
        tool: tool.clone(),
        source,
    };

    let mut stdout = tempfile::tempfile().map_err(exec_err)?;
    let mut stderr = tempfile::tempfile().map_err(exec_err)?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd.as_std_path())
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout.try_clone().map_err(exec_err)?))
        .stderr(Stdio::from(stderr.try_clone().map_err(exec_err)?))
        .spawn()
        .map_err(exec_err)?;

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().map_err(exec_err)? {
            break status;
        }
        if started.elapsed() >= timeout {
            warn!(%tool, ?timeout, "tool timed out; killing");
            let _ = child.kill();
            let _ = child.wait();
            return Err(ToolError::TimedOut { tool, timeout });
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let output = ToolOutput {
        stdout: read_back(&mut stdout),
        stderr: read_back(&mut stderr),
    };
    debug!(%tool, code = ?status.code(), elapsed = ?started.elapsed(), "tool finished");

    if !status.success() {
        let message = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        return Err(ToolError::Failed {
            tool,
            code: status.code(),
            message,
        });
    }
    Ok(output)
}

fn read_back(file: &mut std::fs::File) -> String {
    let mut buf = Vec::new();
    if file.seek(SeekFrom::Start(0)).is_ok() {
        let _ = file.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn cwd() -> &'static Utf8Path {
        Utf8Path::new(".")
    }

    #[test]
    fn captures_stdout() {
        let out = run("sh", &["-c", "echo hello"], cwd(), DEFAULT_TIMEOUT).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn failure_carries_stderr() {
        let err = run("sh", &["-c", "echo boom >&2; exit 3"], cwd(), DEFAULT_TIMEOUT).unwrap_err();
        match err {
            ToolError::Failed { code, message, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn timeout_kills_the_child() {
        let err = run("sh", &["-c", "sleep 5"], cwd(), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
    }

    #[test]
    fn missing_binary_is_an_exec_error() {
        let err = run("versa-no-such-binary", &[], cwd(), DEFAULT_TIMEOUT).unwrap_err();
        assert!(matches!(err, ToolError::Exec { .. }));
    }
}
