//! MCP tool definitions and handlers.
//!
//! Each tool is defined as a JSON schema (returned by [`all_tool_definitions`])
//! and handled by an async function dispatched from [`handle_tool_call`].
//!
//! ## Tools
//!
//! - `list_yubikeys` — enumerate attached keys
//! - `get_yubikey_info` — `ykman info` for one key
//! - `ykman_version` — availability / version check
//! - `enable_application` / `disable_application` — `ykman config <transport>`
//! - `set_openpgp_touch_policy` — `ykman openpgp keys set-touch`
//! - `set_piv_pin_retries` — `ykman piv access set-retries`
//!
//! Device-scoped tools accept an optional `serial`. When ykman reports that
//! multiple keys are attached, the handler does not fail: it returns
//! [`ToolOutcome::Elicit`] and the MCP layer asks the operator which key to
//! use, then completes the call via [`resume_tool_call`].
//!
//! Parameter validation (transport names, application names, key slots,
//! touch policies, retry ranges) happens before any invocation; a rejected
//! parameter never reaches ykman.

use serde_json::{json, Value};

use crate::elicit::{DisambiguationSession, ElicitReply, Resolution};
use crate::envelope::{Envelope, Status};
use crate::orchestrator::{self, ResumeOutcome, RunOutcome};
use crate::ykman::{classify_failure, FailureKind, Invocation, InvokeError, ToolRunner};

const TRANSPORTS: &[&str] = &["usb", "nfc"];
const APPLICATIONS: &[&str] = &["OTP", "U2F", "FIDO2", "OATH", "PIV", "OPENPGP", "HSMAUTH"];
const OPENPGP_KEY_SLOTS: &[&str] = &["sig", "enc", "aut", "att"];
const TOUCH_POLICIES: &[&str] = &["on", "off", "fixed", "cached", "cached-fixed"];

/// Returns all tool definitions.
pub fn all_tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "list_yubikeys",
            "description": "List all connected YubiKeys with model, firmware version, enabled applications, and serial number.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        }),
        json!({
            "name": "get_yubikey_info",
            "description": "Get detailed information about a YubiKey: firmware version, form factor, enabled applications, and USB interfaces. If several keys are attached and no serial is given, you will be asked which one to use.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "serial": {
                        "type": "integer",
                        "description": "Serial number of the YubiKey to query. Omit when only one key is attached."
                    }
                },
                "additionalProperties": false
            }
        }),
        json!({
            "name": "ykman_version",
            "description": "Check that the ykman executable is installed and report its version.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        }),
        json!({
            "name": "enable_application",
            "description": "Enable a YubiKey application over a transport (runs 'ykman config <transport> --enable <application> --force').",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "transport": {
                        "type": "string",
                        "description": "Transport to configure.",
                        "enum": TRANSPORTS
                    },
                    "application": {
                        "type": "string",
                        "description": "Application to enable.",
                        "enum": APPLICATIONS
                    },
                    "serial": {
                        "type": "integer",
                        "description": "Serial number of the YubiKey to configure. Omit when only one key is attached."
                    }
                },
                "required": ["transport", "application"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "disable_application",
            "description": "Disable a YubiKey application over a transport (runs 'ykman config <transport> --disable <application> --force').",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "transport": {
                        "type": "string",
                        "description": "Transport to configure.",
                        "enum": TRANSPORTS
                    },
                    "application": {
                        "type": "string",
                        "description": "Application to disable.",
                        "enum": APPLICATIONS
                    },
                    "serial": {
                        "type": "integer",
                        "description": "Serial number of the YubiKey to configure. Omit when only one key is attached."
                    }
                },
                "required": ["transport", "application"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "set_openpgp_touch_policy",
            "description": "Set the touch policy for an OpenPGP key slot (runs 'ykman openpgp keys set-touch <slot> <policy> --force'). Requires the OpenPGP admin PIN to be cached or default.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "key_slot": {
                        "type": "string",
                        "description": "OpenPGP key slot: sig (signature), enc (encryption), aut (authentication), att (attestation).",
                        "enum": OPENPGP_KEY_SLOTS
                    },
                    "policy": {
                        "type": "string",
                        "description": "Touch policy to apply.",
                        "enum": TOUCH_POLICIES
                    },
                    "serial": {
                        "type": "integer",
                        "description": "Serial number of the YubiKey to configure. Omit when only one key is attached."
                    }
                },
                "required": ["key_slot", "policy"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "set_piv_pin_retries",
            "description": "Set the number of PIN and PUK retry attempts for the PIV application (runs 'ykman piv access set-retries <pin> <puk> --force'). WARNING: this resets the PIN and PUK to their defaults.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "pin_retries": {
                        "type": "integer",
                        "description": "Allowed PIN attempts, 1-255.",
                        "minimum": 1,
                        "maximum": 255
                    },
                    "puk_retries": {
                        "type": "integer",
                        "description": "Allowed PUK attempts, 1-255.",
                        "minimum": 1,
                        "maximum": 255
                    },
                    "serial": {
                        "type": "integer",
                        "description": "Serial number of the YubiKey to configure. Omit when only one key is attached."
                    }
                },
                "required": ["pin_retries", "puk_retries"],
                "additionalProperties": false
            }
        }),
    ]
}

/// Result of an MCP tool call, ready to be serialized into a JSON-RPC response.
pub struct ToolResult {
    /// MCP content blocks (a single `{"type":"text","text":"..."}` entry).
    pub content: Vec<Value>,
    /// Whether the tool call failed (maps to `isError` in the MCP response).
    pub is_error: bool,
}

impl ToolResult {
    fn from_envelope(envelope: Envelope) -> Self {
        let is_error = envelope.status() == Status::Error;
        let text = serde_json::to_string_pretty(&envelope.into_value()).unwrap_or_default();
        Self {
            content: vec![json!({ "type": "text", "text": text })],
            is_error,
        }
    }

    fn invalid(message: String) -> Self {
        Self::from_envelope(Envelope::error(message))
    }
}

/// Outcome of dispatching a tool call: either a finished result, or a
/// suspension awaiting the operator's device choice.
pub enum ToolOutcome {
    Done(ToolResult),
    Elicit(DisambiguationSession),
}

/// Handle a tool call. May suspend for disambiguation.
pub async fn handle_tool_call<R: ToolRunner>(name: &str, args: &Value, runner: &R) -> ToolOutcome {
    match name {
        "list_yubikeys" => ToolOutcome::Done(handle_list_yubikeys(runner).await),
        "get_yubikey_info" => handle_get_yubikey_info(args, runner).await,
        "ykman_version" => ToolOutcome::Done(handle_ykman_version(runner).await),
        "enable_application" => handle_application_toggle(args, runner, true).await,
        "disable_application" => handle_application_toggle(args, runner, false).await,
        "set_openpgp_touch_policy" => handle_set_touch_policy(args, runner).await,
        "set_piv_pin_retries" => handle_set_pin_retries(args, runner).await,
        _ => ToolOutcome::Done(ToolResult::invalid(format!("Unknown tool: {}", name))),
    }
}

/// Complete a suspended tool call with the operator's elicitation reply.
///
/// This is the only retry path: one invocation, no further suspension.
pub async fn resume_tool_call<R: ToolRunner>(
    runner: &R,
    session: &DisambiguationSession,
    reply: ElicitReply,
) -> ToolResult {
    let serial = match session.resolve(reply) {
        Resolution::Serial(serial) => serial,
        Resolution::Cancelled => {
            return ToolResult::from_envelope(Envelope::error(format!(
                "Device selection cancelled; `{}` was not run",
                session.command_line()
            )))
        }
    };

    match orchestrator::resume(runner, &session.args, serial).await {
        ResumeOutcome::Success(inv) => {
            finish(&session.tool, &session.success_message, &inv, Some(serial))
        }
        ResumeOutcome::Failure { kind, stderr } => failure_result(kind, &stderr, Some(serial)),
    }
}

// --- Handlers ---

async fn handle_list_yubikeys<R: ToolRunner>(runner: &R) -> ToolResult {
    let inv = match runner.run(&["list".to_string()]).await {
        Ok(inv) => inv,
        Err(InvokeError::ToolMissing) => return tool_missing_result(),
        Err(e) => return ToolResult::from_envelope(Envelope::error(e.to_string())),
    };
    if !inv.success {
        return failure_result(classify_failure(&inv.stderr), &inv.stderr, None);
    }

    let devices = crate::devices::parse_device_list(&inv.stdout);
    if devices.is_empty() {
        return ToolResult::from_envelope(
            Envelope::no_devices("No YubiKeys detected").field("devices", json!([])),
        );
    }

    let labels: Vec<&str> = devices.iter().map(|d| d.label.as_str()).collect();
    ToolResult::from_envelope(
        Envelope::success(format!("Found {} YubiKey(s)", devices.len()))
            .field("devices", json!(labels)),
    )
}

async fn handle_get_yubikey_info<R: ToolRunner>(args: &Value, runner: &R) -> ToolOutcome {
    let serial = optional_serial(args);
    run_device_tool(
        runner,
        "get_yubikey_info",
        vec!["info".to_string()],
        "Successfully retrieved YubiKey information".to_string(),
        serial,
    )
    .await
}

async fn handle_ykman_version<R: ToolRunner>(runner: &R) -> ToolResult {
    let inv = match runner.run(&["--version".to_string()]).await {
        Ok(inv) => inv,
        Err(InvokeError::ToolMissing) => return tool_missing_result(),
        Err(e) => return ToolResult::from_envelope(Envelope::error(e.to_string())),
    };
    if !inv.success {
        return failure_result(classify_failure(&inv.stderr), &inv.stderr, None);
    }
    ToolResult::from_envelope(
        Envelope::success("ykman is available").field("version", json!(inv.stdout.trim())),
    )
}

async fn handle_application_toggle<R: ToolRunner>(
    args: &Value,
    runner: &R,
    enable: bool,
) -> ToolOutcome {
    let transport = match require_choice(args, "transport", TRANSPORTS, Case::Lower) {
        Ok(v) => v,
        Err(r) => return ToolOutcome::Done(r),
    };
    let application = match require_choice(args, "application", APPLICATIONS, Case::Upper) {
        Ok(v) => v,
        Err(r) => return ToolOutcome::Done(r),
    };
    let serial = optional_serial(args);

    let (flag, verb, tool) = if enable {
        ("--enable", "Enabled", "enable_application")
    } else {
        ("--disable", "Disabled", "disable_application")
    };
    let cmd = vec![
        "config".to_string(),
        transport.clone(),
        flag.to_string(),
        application.clone(),
        "--force".to_string(),
    ];
    let message = format!("{} {} over {}", verb, application, transport);
    run_device_tool(runner, tool, cmd, message, serial).await
}

async fn handle_set_touch_policy<R: ToolRunner>(args: &Value, runner: &R) -> ToolOutcome {
    let key_slot = match require_choice(args, "key_slot", OPENPGP_KEY_SLOTS, Case::Lower) {
        Ok(v) => v,
        Err(r) => return ToolOutcome::Done(r),
    };
    let policy = match require_choice(args, "policy", TOUCH_POLICIES, Case::Lower) {
        Ok(v) => v,
        Err(r) => return ToolOutcome::Done(r),
    };
    let serial = optional_serial(args);

    let cmd = vec![
        "openpgp".to_string(),
        "keys".to_string(),
        "set-touch".to_string(),
        key_slot.clone(),
        policy.clone(),
        "--force".to_string(),
    ];
    let message = format!("Set OpenPGP touch policy for slot '{}' to '{}'", key_slot, policy);
    run_device_tool(runner, "set_openpgp_touch_policy", cmd, message, serial).await
}

async fn handle_set_pin_retries<R: ToolRunner>(args: &Value, runner: &R) -> ToolOutcome {
    let pin_retries = match require_retries(args, "pin_retries") {
        Ok(v) => v,
        Err(r) => return ToolOutcome::Done(r),
    };
    let puk_retries = match require_retries(args, "puk_retries") {
        Ok(v) => v,
        Err(r) => return ToolOutcome::Done(r),
    };
    let serial = optional_serial(args);

    let cmd = vec![
        "piv".to_string(),
        "access".to_string(),
        "set-retries".to_string(),
        pin_retries.to_string(),
        puk_retries.to_string(),
        "--force".to_string(),
    ];
    let message = format!(
        "Set PIV retry counts: {} PIN attempts, {} PUK attempts",
        pin_retries, puk_retries
    );
    run_device_tool(runner, "set_piv_pin_retries", cmd, message, serial).await
}

/// Run a device-scoped command through the orchestrator, turning an ambiguous
/// target into a suspension.
async fn run_device_tool<R: ToolRunner>(
    runner: &R,
    tool: &str,
    args: Vec<String>,
    success_message: String,
    serial: Option<u64>,
) -> ToolOutcome {
    match orchestrator::run(runner, &args, serial).await {
        RunOutcome::Success(inv) => {
            ToolOutcome::Done(finish(tool, &success_message, &inv, serial))
        }
        RunOutcome::Failure { kind, stderr } => {
            ToolOutcome::Done(failure_result(kind, &stderr, serial))
        }
        RunOutcome::NoDevices => ToolOutcome::Done(ToolResult::from_envelope(
            Envelope::no_devices("No YubiKeys detected").field("devices", json!([])),
        )),
        RunOutcome::NeedsChoice { devices } => ToolOutcome::Elicit(DisambiguationSession {
            tool: tool.to_string(),
            args,
            success_message,
            devices,
        }),
    }
}

/// Build the success envelope for a completed device command.
fn finish(tool: &str, message: &str, inv: &Invocation, serial: Option<u64>) -> ToolResult {
    let info = inv.stdout.trim();
    if tool == "get_yubikey_info" && info.is_empty() {
        return ToolResult::from_envelope(Envelope::no_devices(
            "No YubiKey information returned",
        ));
    }

    let mut envelope = Envelope::success(message);
    if tool == "get_yubikey_info" {
        envelope = envelope.field("info", json!(info));
    }
    if let Some(serial) = serial {
        envelope = envelope.field("serial", json!(serial));
    }
    ToolResult::from_envelope(envelope)
}

fn tool_missing_result() -> ToolResult {
    ToolResult::from_envelope(
        Envelope::error("ykman not found. Please install yubikey-manager").suggest(
            "Install yubikey-manager (e.g. 'pip install yubikey-manager' or your OS package manager) and retry",
        ),
    )
}

/// Map a classified failure to its envelope.
fn failure_result(kind: FailureKind, stderr: &str, serial: Option<u64>) -> ToolResult {
    match kind {
        FailureKind::ToolMissing => tool_missing_result(),
        FailureKind::NoMatchingDevice => {
            let message = match serial {
                Some(serial) => format!("No YubiKey found with serial number {}", serial),
                None => "No YubiKey found".to_string(),
            };
            ToolResult::from_envelope(Envelope::no_devices(message))
        }
        FailureKind::AmbiguousTarget => ToolResult::from_envelope(
            Envelope::error(format!("Multiple YubiKeys detected: {}", stderr.trim()))
                .suggest("Call list_yubikeys and pass an explicit serial"),
        ),
        FailureKind::GenericFailure => ToolResult::from_envelope(Envelope::error(format!(
            "Error running ykman: {}",
            stderr.trim()
        ))),
    }
}

// --- Parameter validation ---

enum Case {
    Lower,
    Upper,
}

fn optional_serial(args: &Value) -> Option<u64> {
    args.get("serial").and_then(Value::as_u64)
}

/// Require a string parameter matching one of `allowed` (case-insensitive;
/// normalized to the canonical case ykman expects).
fn require_choice(
    args: &Value,
    key: &str,
    allowed: &[&str],
    case: Case,
) -> Result<String, ToolResult> {
    let raw = args
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolResult::invalid(format!("Missing required parameter: {}", key)))?;
    let normalized = match case {
        Case::Lower => raw.to_lowercase(),
        Case::Upper => raw.to_uppercase(),
    };
    if allowed.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(ToolResult::invalid(format!(
            "Invalid {}: '{}' (expected one of: {})",
            key,
            raw,
            allowed.join(", ")
        )))
    }
}

/// Require an integer retry count in [1, 255].
fn require_retries(args: &Value, key: &str) -> Result<u64, ToolResult> {
    let value = args
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| ToolResult::invalid(format!("Missing required parameter: {}", key)))?;
    if (1..=255).contains(&value) {
        Ok(value as u64)
    } else {
        Err(ToolResult::invalid(format!(
            "Invalid {}: {} (must be between 1 and 255)",
            key, value
        )))
    }
}
