//! Disambiguation sessions backed by MCP elicitation.
//!
//! When a device command is ambiguous, the server suspends the tool call and
//! asks the operator which attached YubiKey to use. The suspension is a
//! first-class value: [`DisambiguationSession`] carries everything needed to
//! render the prompt, validate the single structured reply, and retry the
//! original command with the selected serial.
//!
//! The protocol is single-round. A decline, a missing reply, an out-of-range
//! selection, or a selected device with no parseable serial all resolve to
//! [`Resolution::Cancelled`] — there is no re-prompt loop.

use serde_json::{json, Value};

use crate::devices::{self, DeviceDescriptor};

/// Ephemeral state spanning one suspend/resume cycle. Discarded whether the
/// reply is accepted, invalid, or never returns.
#[derive(Debug)]
pub struct DisambiguationSession {
    /// The tool that triggered disambiguation, for response formatting.
    pub tool: String,
    /// Sub-command argument vector to retry with the resolved serial.
    pub args: Vec<String>,
    /// Message for the envelope when the retried command succeeds.
    pub success_message: String,
    /// Selectable descriptors, in enumeration order.
    pub devices: Vec<DeviceDescriptor>,
}

/// Parsed elicitation response from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElicitReply {
    Accepted { selection: i64 },
    Declined,
}

/// What a reply resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Serial(u64),
    Cancelled,
}

impl DisambiguationSession {
    /// The menu text presented to the operator.
    pub fn prompt(&self) -> String {
        devices::render_menu(&self.devices)
    }

    /// JSON schema for the expected reply: a single 1-based integer selection.
    pub fn requested_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "selection": {
                    "type": "integer",
                    "description": "Number of the chosen YubiKey from the menu",
                    "minimum": 1,
                    "maximum": self.devices.len()
                }
            },
            "required": ["selection"]
        })
    }

    /// The original command line, for cancellation diagnostics.
    pub fn command_line(&self) -> String {
        format!("ykman {}", self.args.join(" "))
    }

    /// Resolve the operator's reply to a target serial or a cancellation.
    pub fn resolve(&self, reply: ElicitReply) -> Resolution {
        let selection = match reply {
            ElicitReply::Accepted { selection } => selection,
            ElicitReply::Declined => return Resolution::Cancelled,
        };
        if selection < 1 || selection as usize > self.devices.len() {
            return Resolution::Cancelled;
        }
        match self.devices[selection as usize - 1].serial() {
            Some(serial) => Resolution::Serial(serial),
            None => Resolution::Cancelled,
        }
    }
}

/// Parse the `result` object of an `elicitation/create` response.
///
/// Anything other than an explicit accept with an integer `selection` is a
/// decline: the action may be `decline` or `cancel`, the content may be
/// absent, or the client may not support elicitation at all.
pub fn parse_reply(result: &Value) -> ElicitReply {
    let accepted = result.get("action").and_then(Value::as_str) == Some("accept");
    if !accepted {
        return ElicitReply::Declined;
    }
    match result
        .get("content")
        .and_then(|c| c.get("selection"))
        .and_then(Value::as_i64)
    {
        Some(selection) => ElicitReply::Accepted { selection },
        None => ElicitReply::Declined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::parse_device_list;

    fn session() -> DisambiguationSession {
        DisambiguationSession {
            tool: "get_yubikey_info".into(),
            args: vec!["info".into()],
            success_message: "ok".into(),
            devices: parse_device_list(
                "Model A (1.0) [X] Serial: 111\nModel A (1.0) [X] Serial: 222\n",
            ),
        }
    }

    #[test]
    fn resolve_in_range_selection() {
        assert_eq!(
            session().resolve(ElicitReply::Accepted { selection: 2 }),
            Resolution::Serial(222)
        );
    }

    #[test]
    fn resolve_out_of_range_is_cancelled() {
        let s = session();
        assert_eq!(
            s.resolve(ElicitReply::Accepted { selection: 5 }),
            Resolution::Cancelled
        );
        assert_eq!(
            s.resolve(ElicitReply::Accepted { selection: 0 }),
            Resolution::Cancelled
        );
        assert_eq!(
            s.resolve(ElicitReply::Accepted { selection: -1 }),
            Resolution::Cancelled
        );
    }

    #[test]
    fn resolve_decline_is_cancelled() {
        assert_eq!(session().resolve(ElicitReply::Declined), Resolution::Cancelled);
    }

    #[test]
    fn resolve_unparseable_serial_is_cancelled() {
        let s = DisambiguationSession {
            devices: parse_device_list("YubiKey NEO [OTP]\n"),
            ..session()
        };
        assert_eq!(
            s.resolve(ElicitReply::Accepted { selection: 1 }),
            Resolution::Cancelled
        );
    }

    #[test]
    fn parse_accept_with_selection() {
        let result = serde_json::json!({ "action": "accept", "content": { "selection": 2 } });
        assert_eq!(parse_reply(&result), ElicitReply::Accepted { selection: 2 });
    }

    #[test]
    fn parse_decline() {
        let result = serde_json::json!({ "action": "decline" });
        assert_eq!(parse_reply(&result), ElicitReply::Declined);
    }

    #[test]
    fn parse_cancel() {
        let result = serde_json::json!({ "action": "cancel" });
        assert_eq!(parse_reply(&result), ElicitReply::Declined);
    }

    #[test]
    fn parse_accept_without_content_is_declined() {
        let result = serde_json::json!({ "action": "accept" });
        assert_eq!(parse_reply(&result), ElicitReply::Declined);
    }

    #[test]
    fn schema_bounds_match_device_count() {
        let schema = session().requested_schema();
        assert_eq!(schema["properties"]["selection"]["maximum"], 2);
    }

    #[test]
    fn command_line_names_subcommand() {
        assert_eq!(session().command_line(), "ykman info");
    }
}
