//! Command orchestration with a hard two-invocation bound.
//!
//! An operation against a specific YubiKey goes through two entry points:
//!
//! 1. [`run`] — the first attempt. Builds the argument vector (optionally
//!    prefixed with `--device <serial>`), invokes ykman, and classifies any
//!    failure. When the failure is an ambiguous target it enumerates the
//!    attached devices and returns [`RunOutcome::NeedsChoice`] — a suspension
//!    state the MCP layer turns into an interactive elicitation.
//! 2. [`resume`] — the second and final attempt, called with the serial the
//!    operator selected. Any failure here, including a repeated ambiguity,
//!    is propagated as-is. [`ResumeOutcome`] has no suspension variant, so a
//!    third invocation is unreachable by construction.

use tracing::{debug, warn};

use crate::devices::{self, DeviceDescriptor};
use crate::ykman::{classify_failure, FailureKind, Invocation, InvokeError, ToolRunner};

/// Outcome of the first attempt at a device command.
#[derive(Debug)]
pub enum RunOutcome {
    Success(Invocation),
    Failure { kind: FailureKind, stderr: String },
    /// The request was ambiguous and these devices are attached; the caller
    /// must obtain a selection from the operator and call [`resume`].
    NeedsChoice { devices: Vec<DeviceDescriptor> },
    /// The request was ambiguous but enumeration found nothing attached.
    NoDevices,
}

/// Outcome of the disambiguation-driven retry. Deliberately has no
/// `NeedsChoice` variant.
#[derive(Debug)]
pub enum ResumeOutcome {
    Success(Invocation),
    Failure { kind: FailureKind, stderr: String },
}

/// Prefix the sub-command argument vector with a target selector.
pub fn build_args(args: &[String], serial: Option<u64>) -> Vec<String> {
    let mut full = Vec::with_capacity(args.len() + 2);
    if let Some(serial) = serial {
        full.push("--device".to_string());
        full.push(serial.to_string());
    }
    full.extend(args.iter().cloned());
    full
}

/// First attempt: invoke, classify, and on ambiguity prepare disambiguation.
pub async fn run<R: ToolRunner>(
    runner: &R,
    args: &[String],
    serial: Option<u64>,
) -> RunOutcome {
    let inv = match invoke(runner, args, serial).await {
        Ok(inv) => inv,
        Err((kind, stderr)) => return RunOutcome::Failure { kind, stderr },
    };
    if inv.success {
        return RunOutcome::Success(inv);
    }

    match classify_failure(&inv.stderr) {
        FailureKind::AmbiguousTarget => {
            debug!("ambiguous target for `ykman {}`, enumerating devices", args.join(" "));
            match devices::list_devices(runner).await {
                Ok(devs) if devs.is_empty() => RunOutcome::NoDevices,
                Ok(devs) => RunOutcome::NeedsChoice { devices: devs },
                Err(e) => {
                    warn!("device enumeration failed during disambiguation: {e}");
                    let kind = match &e {
                        devices::ListError::Invoke(InvokeError::ToolMissing) => {
                            FailureKind::ToolMissing
                        }
                        _ => FailureKind::GenericFailure,
                    };
                    RunOutcome::Failure {
                        kind,
                        stderr: e.to_string(),
                    }
                }
            }
        }
        kind => RunOutcome::Failure {
            kind,
            stderr: inv.stderr,
        },
    }
}

/// Final attempt with the operator-selected serial. A second ambiguous-target
/// classification is propagated as a failure rather than re-prompting.
pub async fn resume<R: ToolRunner>(runner: &R, args: &[String], serial: u64) -> ResumeOutcome {
    let inv = match invoke(runner, args, Some(serial)).await {
        Ok(inv) => inv,
        Err((kind, stderr)) => return ResumeOutcome::Failure { kind, stderr },
    };
    if inv.success {
        ResumeOutcome::Success(inv)
    } else {
        let kind = classify_failure(&inv.stderr);
        if kind == FailureKind::AmbiguousTarget {
            warn!("ykman still reports multiple devices after targeting serial {serial}");
        }
        ResumeOutcome::Failure {
            kind,
            stderr: inv.stderr,
        }
    }
}

async fn invoke<R: ToolRunner>(
    runner: &R,
    args: &[String],
    serial: Option<u64>,
) -> Result<Invocation, (FailureKind, String)> {
    let full = build_args(args, serial);
    match runner.run(&full).await {
        Ok(inv) => Ok(inv),
        Err(e @ InvokeError::ToolMissing) => Err((FailureKind::ToolMissing, e.to_string())),
        Err(e) => Err((FailureKind::GenericFailure, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Scripted runner: pops one pre-canned result per invocation and records
    /// every argument vector it was called with.
    struct ScriptedRunner {
        script: RefCell<VecDeque<Result<Invocation, InvokeError>>>,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new(script: Vec<Result<Invocation, InvokeError>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.borrow().clone()
        }
    }

    impl ToolRunner for ScriptedRunner {
        async fn run(&self, args: &[String]) -> Result<Invocation, InvokeError> {
            self.calls.borrow_mut().push(args.to_vec());
            self.script
                .borrow_mut()
                .pop_front()
                .expect("runner invoked more times than scripted")
        }
    }

    fn ok(stdout: &str) -> Result<Invocation, InvokeError> {
        Ok(Invocation {
            stdout: stdout.to_string(),
            stderr: String::new(),
            success: true,
        })
    }

    fn failed(stderr: &str) -> Result<Invocation, InvokeError> {
        Ok(Invocation {
            stdout: String::new(),
            stderr: stderr.to_string(),
            success: false,
        })
    }

    const AMBIGUOUS: &str = "ERROR: Multiple YubiKeys detected. Use --device SERIAL.";

    #[test]
    fn build_args_without_serial() {
        let args = vec!["info".to_string()];
        assert_eq!(build_args(&args, None), vec!["info"]);
    }

    #[test]
    fn build_args_prefixes_device_selector() {
        let args = vec!["config".to_string(), "usb".to_string()];
        assert_eq!(
            build_args(&args, Some(222)),
            vec!["--device", "222", "config", "usb"]
        );
    }

    #[tokio::test]
    async fn success_returns_immediately() {
        let runner = ScriptedRunner::new(vec![ok("Device info here")]);
        let outcome = run(&runner, &["info".to_string()], None).await;
        assert!(matches!(outcome, RunOutcome::Success(inv) if inv.stdout == "Device info here"));
        // No enumeration, no second invocation
        assert_eq!(runner.calls(), vec![vec!["info"]]);
    }

    #[tokio::test]
    async fn tool_missing_is_terminal() {
        let runner = ScriptedRunner::new(vec![Err(InvokeError::ToolMissing)]);
        let outcome = run(&runner, &["info".to_string()], Some(999)).await;
        match outcome {
            RunOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::ToolMissing),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn ambiguous_lists_devices_and_suspends() {
        let runner = ScriptedRunner::new(vec![
            failed(AMBIGUOUS),
            ok("Model A (1.0) [X] Serial: 111\nModel A (1.0) [X] Serial: 222\n"),
        ]);
        let outcome = run(&runner, &["info".to_string()], None).await;
        match outcome {
            RunOutcome::NeedsChoice { devices } => {
                assert_eq!(devices.len(), 2);
                assert_eq!(devices[1].serial(), Some(222));
            }
            other => panic!("expected NeedsChoice, got {other:?}"),
        }
        assert_eq!(runner.calls(), vec![vec!["info"], vec!["list"]]);
    }

    #[tokio::test]
    async fn ambiguous_with_no_devices_does_not_suspend() {
        let runner = ScriptedRunner::new(vec![failed(AMBIGUOUS), ok("")]);
        let outcome = run(&runner, &["info".to_string()], None).await;
        assert!(matches!(outcome, RunOutcome::NoDevices));
    }

    #[tokio::test]
    async fn ambiguous_with_failed_enumeration_degrades_to_generic() {
        let runner = ScriptedRunner::new(vec![failed(AMBIGUOUS), failed("usb error")]);
        let outcome = run(&runner, &["info".to_string()], None).await;
        match outcome {
            RunOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::GenericFailure),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_matching_device_is_not_retried() {
        let runner = ScriptedRunner::new(vec![failed("ERROR: No device found with serial 5")]);
        let outcome = run(&runner, &["info".to_string()], Some(5)).await;
        match outcome {
            RunOutcome::Failure { kind, stderr } => {
                assert_eq!(kind, FailureKind::NoMatchingDevice);
                assert!(stderr.contains("No device found"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn resume_prefixes_selected_serial() {
        let runner = ScriptedRunner::new(vec![ok("done")]);
        let outcome = resume(&runner, &["info".to_string()], 222).await;
        assert!(matches!(outcome, ResumeOutcome::Success(_)));
        assert_eq!(runner.calls(), vec![vec!["--device", "222", "info"]]);
    }

    #[tokio::test]
    async fn persistent_ambiguity_stops_after_two_command_invocations() {
        // First attempt ambiguous, enumeration succeeds, operator picks a
        // device, retry is ambiguous again: the second ambiguity must be
        // propagated, never re-prompted. Exactly two command invocations.
        let runner = ScriptedRunner::new(vec![
            failed(AMBIGUOUS),
            ok("Model A Serial: 111\nModel B Serial: 222\n"),
        ]);
        let outcome = run(&runner, &["info".to_string()], None).await;
        let devices = match outcome {
            RunOutcome::NeedsChoice { devices } => devices,
            other => panic!("expected NeedsChoice, got {other:?}"),
        };
        let serial = devices[0].serial().unwrap();

        let retry_runner = ScriptedRunner::new(vec![failed(AMBIGUOUS)]);
        let outcome = resume(&retry_runner, &["info".to_string()], serial).await;
        match outcome {
            ResumeOutcome::Failure { kind, .. } => {
                assert_eq!(kind, FailureKind::AmbiguousTarget);
            }
            other => panic!("expected propagated failure, got {other:?}"),
        }
        // One command invocation per entry point and nothing further.
        assert_eq!(runner.calls().len(), 2); // command + list
        assert_eq!(retry_runner.calls().len(), 1); // retried command only
    }
}
