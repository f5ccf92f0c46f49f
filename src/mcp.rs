//! MCP (Model Context Protocol) JSON-RPC handler.
//!
//! Implements the [MCP specification](https://spec.modelcontextprotocol.io/)
//! over stdio — reads JSON-RPC 2.0 messages from stdin (one per line) and
//! writes responses to stdout.
//!
//! ## Supported methods
//!
//! | Method              | Description                      |
//! |---------------------|----------------------------------|
//! | `initialize`        | Handshake, returns capabilities  |
//! | `tools/list`        | List available tool definitions  |
//! | `tools/call`        | Execute a tool and return result |
//! | `ping`              | Liveness check                   |
//!
//! Notifications (`notifications/initialized`, `notifications/cancelled`) are
//! acknowledged silently.
//!
//! ## Elicitation
//!
//! When a tool call needs the operator to pick one of several attached
//! YubiKeys, the server does not answer the `tools/call` immediately. It sends
//! an `elicitation/create` request to the client (with its own id, drawn from
//! a server-side counter) and parks the suspended call in a pending map. The
//! loop keeps serving other requests; when the client's response arrives — a
//! message carrying an id but no method — the matching call is resumed and its
//! original `tools/call` response is finally written. An error response or a
//! decline resumes the call as cancelled. Pending calls still suspended at
//! stdin EOF are simply dropped.

use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::elicit::{self, DisambiguationSession, ElicitReply};
use crate::tools::{self, ToolOutcome, ToolResult};
use crate::ykman::ToolRunner;

const SERVER_NAME: &str = "mcp-ykman";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2025-06-18";

/// A tool call suspended on an operator device choice.
struct PendingCall {
    /// The original `tools/call` request id, answered on resume.
    request_id: Value,
    session: DisambiguationSession,
}

/// Run the MCP server on stdio, processing JSON-RPC messages until EOF.
pub async fn run_stdio<R: ToolRunner>(runner: R) {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    // Suspended tool calls, keyed by the id of the outbound elicitation request.
    let mut pending: HashMap<u64, PendingCall> = HashMap::new();
    let mut next_elicitation_id: u64 = 1;

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                warn!("stdin read error: {}", e);
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {
                        "code": -32700,
                        "message": format!("Parse error: {}", e)
                    }
                });
                write_message(&mut stdout, &response).await;
                continue;
            }
        };

        let id = message.get("id").cloned();
        let method = message.get("method").and_then(Value::as_str);

        // A message with an id but no method is a response to one of our
        // elicitation requests.
        if method.is_none() {
            if let Some(id) = id {
                handle_elicitation_response(&message, id, &mut pending, &runner, &mut stdout)
                    .await;
            }
            continue;
        }
        let method = method.unwrap_or("");

        // Notifications (no id) — acknowledge silently
        if id.is_none() {
            match method {
                "notifications/initialized" | "notifications/cancelled" => {}
                _ => {
                    warn!("unknown notification: {}", method);
                }
            }
            continue;
        }

        let response = match method {
            "initialize" => handle_initialize(),
            "tools/list" => json!({
                "jsonrpc": "2.0",
                "result": { "tools": tools::all_tool_definitions() }
            }),
            "tools/call" => {
                match handle_tools_call(&message, &runner).await {
                    CallDisposition::Respond(response) => response,
                    CallDisposition::Suspend(session) => {
                        // Park the call and ask the operator instead of replying.
                        let elicitation_id = next_elicitation_id;
                        next_elicitation_id += 1;

                        let request = json!({
                            "jsonrpc": "2.0",
                            "id": elicitation_id,
                            "method": "elicitation/create",
                            "params": {
                                "message": session.prompt(),
                                "requestedSchema": session.requested_schema()
                            }
                        });
                        pending.insert(
                            elicitation_id,
                            PendingCall {
                                request_id: id.clone().unwrap_or(Value::Null),
                                session,
                            },
                        );
                        write_message(&mut stdout, &request).await;
                        continue;
                    }
                }
            }
            "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": -32601,
                    "message": format!("Method not found: {}", method)
                }
            }),
        };

        let response = inject_id(response, id);
        write_message(&mut stdout, &response).await;
    }
}

/// Handle `initialize` — return protocol version, capabilities, and server info.
fn handle_initialize() -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION
            }
        }
    })
}

/// Whether a `tools/call` finished or suspended on an elicitation.
enum CallDisposition {
    Respond(Value),
    Suspend(DisambiguationSession),
}

/// Handle `tools/call` — dispatch to the appropriate tool handler.
async fn handle_tools_call<R: ToolRunner>(message: &Value, runner: &R) -> CallDisposition {
    let params = message.get("params").cloned().unwrap_or(json!({}));
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or(json!({}));

    match tools::handle_tool_call(name, &args, runner).await {
        ToolOutcome::Done(result) => CallDisposition::Respond(tool_response(result)),
        ToolOutcome::Elicit(session) => CallDisposition::Suspend(session),
    }
}

/// Resume a suspended call with the client's elicitation response.
async fn handle_elicitation_response<R: ToolRunner>(
    message: &Value,
    id: Value,
    pending: &mut HashMap<u64, PendingCall>,
    runner: &R,
    stdout: &mut tokio::io::Stdout,
) {
    let call = match id.as_u64().and_then(|n| pending.remove(&n)) {
        Some(call) => call,
        None => {
            warn!("response with unknown id: {}", id);
            return;
        }
    };

    // An error response (client cannot elicit) counts as a decline.
    let reply = match message.get("result") {
        Some(result) => elicit::parse_reply(result),
        None => ElicitReply::Declined,
    };

    let result = tools::resume_tool_call(runner, &call.session, reply).await;
    let response = inject_id(tool_response(result), Some(call.request_id));
    write_message(stdout, &response).await;
}

/// Wrap a tool result into a `tools/call` JSON-RPC response (without id).
fn tool_response(result: ToolResult) -> Value {
    let mut response_result = json!({
        "content": result.content
    });
    if result.is_error {
        response_result["isError"] = json!(true);
    }
    json!({
        "jsonrpc": "2.0",
        "result": response_result
    })
}

/// Inject the request `id` into a response object.
fn inject_id(mut response: Value, id: Option<Value>) -> Value {
    if let Some(id) = id {
        response["id"] = id;
    }
    response
}

/// Write a JSON-RPC message to stdout (one line, flushed immediately).
async fn write_message(stdout: &mut tokio::io::Stdout, message: &Value) {
    let mut output = serde_json::to_string(message).unwrap_or_default();
    output.push('\n');
    if let Err(e) = stdout.write_all(output.as_bytes()).await {
        warn!("stdout write error: {}", e);
    }
    if let Err(e) = stdout.flush().await {
        warn!("stdout flush error: {}", e);
    }
}
