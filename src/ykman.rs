//! ykman invocation and failure classification.
//!
//! [`YkmanRunner`] executes the external `ykman` binary as a child process and
//! captures its full stdout/stderr once it exits. It performs no interpretation
//! of the output — classification of failures lives in [`classify_failure`]
//! and acting on them lives in the [orchestrator](crate::orchestrator).
//!
//! ykman prints free-text diagnostics on stderr with no stability guarantee,
//! so classification is case-insensitive substring matching that falls through
//! to [`FailureKind::GenericFailure`] on anything unrecognized.

use std::path::PathBuf;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Captured output of one ykman invocation. Created fresh per invocation and
/// never reused across retries.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Failure to run ykman at all (as opposed to ykman running and failing).
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The executable could not be located. Always terminal, never retried.
    #[error("ykman not found. Please install yubikey-manager")]
    ToolMissing,
    #[error("failed to run ykman: {0}")]
    Io(#[from] std::io::Error),
}

/// Seam for executing ykman. Tool handlers and the orchestrator are generic
/// over this so tests can script invocation outcomes without a real binary.
#[allow(async_fn_in_trait)]
pub trait ToolRunner {
    async fn run(&self, args: &[String]) -> Result<Invocation, InvokeError>;
}

/// Runs the real ykman binary.
pub struct YkmanRunner {
    program: PathBuf,
}

impl YkmanRunner {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl ToolRunner for YkmanRunner {
    /// Spawn ykman with `args`, wait for it to exit, and capture both streams.
    ///
    /// Blocks the calling flow until the child terminates — no timeout is
    /// imposed on ykman itself.
    async fn run(&self, args: &[String]) -> Result<Invocation, InvokeError> {
        debug!("running {} {}", self.program.display(), args.join(" "));

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    InvokeError::ToolMissing
                } else {
                    InvokeError::Io(e)
                }
            })?;

        Ok(Invocation {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        })
    }
}

/// What went wrong with an invocation, derived from its diagnostic text.
///
/// A plain value: it is matched on and converted into a response envelope at
/// the tool boundary, never raised through the call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// ykman is not installed or not on PATH.
    ToolMissing,
    /// More than one YubiKey matches the (absent) target selector.
    AmbiguousTarget,
    /// No device was found, or connecting to it failed.
    NoMatchingDevice,
    /// Anything else — diagnostic text is surfaced verbatim.
    GenericFailure,
}

/// Classify a failed invocation's stderr text.
///
/// Best-effort heuristic over free-text diagnostics; unrecognized text falls
/// through to [`FailureKind::GenericFailure`].
pub fn classify_failure(stderr: &str) -> FailureKind {
    let text = stderr.to_lowercase();
    if text.contains("multiple") && text.contains("device") {
        FailureKind::AmbiguousTarget
    } else if text.contains("no device found") || text.contains("failed connecting") {
        FailureKind::NoMatchingDevice
    } else {
        FailureKind::GenericFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_multiple_devices() {
        assert_eq!(
            classify_failure("ERROR: Multiple YubiKeys detected. Use --device SERIAL to specify which one to use."),
            FailureKind::AmbiguousTarget
        );
    }

    #[test]
    fn classify_multiple_devices_case_insensitive() {
        assert_eq!(
            classify_failure("MULTIPLE DEVICES FOUND"),
            FailureKind::AmbiguousTarget
        );
    }

    #[test]
    fn classify_no_device_found() {
        assert_eq!(
            classify_failure("ERROR: No device found with serial number 123456"),
            FailureKind::NoMatchingDevice
        );
    }

    #[test]
    fn classify_failed_connecting() {
        assert_eq!(
            classify_failure("Failed connecting to the YubiKey"),
            FailureKind::NoMatchingDevice
        );
    }

    #[test]
    fn classify_unknown_text() {
        assert_eq!(
            classify_failure("Traceback (most recent call last): ..."),
            FailureKind::GenericFailure
        );
    }

    #[test]
    fn classify_empty_text() {
        assert_eq!(classify_failure(""), FailureKind::GenericFailure);
    }

    #[test]
    fn classify_device_without_multiple_is_not_ambiguous() {
        assert_eq!(
            classify_failure("device is busy"),
            FailureKind::GenericFailure
        );
    }
}
