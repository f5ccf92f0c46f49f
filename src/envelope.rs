//! Uniform response envelopes.
//!
//! Every tool outcome — success, classified failure, or cancellation — is
//! normalized into the same structure before it reaches the MCP boundary:
//!
//! ```json
//! { "status": "success", "message": "...", "suggested_next_action": "...", ... }
//! ```
//!
//! `no_devices` is a distinct status so callers can branch on a well-formed
//! empty result without inspecting message text.

use serde_json::{Map, Value};

/// Terminal status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    NoDevices,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Error => "error",
            Status::NoDevices => "no_devices",
        }
    }
}

/// Builder for the structured result returned to the caller. Constructed once
/// per request; assembly only, no failure modes.
#[derive(Debug)]
pub struct Envelope {
    status: Status,
    message: String,
    suggested_next_action: Option<String>,
    fields: Map<String, Value>,
}

impl Envelope {
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Status::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error, message)
    }

    pub fn no_devices(message: impl Into<String>) -> Self {
        Self::new(Status::NoDevices, message)
    }

    fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            suggested_next_action: None,
            fields: Map::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Attach a suggested follow-up action for the caller.
    pub fn suggest(mut self, action: impl Into<String>) -> Self {
        self.suggested_next_action = Some(action.into());
        self
    }

    /// Attach an operation-specific payload field.
    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn into_value(self) -> Value {
        let mut map = Map::new();
        map.insert("status".into(), Value::String(self.status.as_str().into()));
        map.insert("message".into(), Value::String(self.message));
        if let Some(action) = self.suggested_next_action {
            map.insert("suggested_next_action".into(), Value::String(action));
        }
        map.extend(self.fields);
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_shape() {
        let v = Envelope::success("Found 2 YubiKey(s)")
            .field("devices", json!(["a", "b"]))
            .into_value();
        assert_eq!(v["status"], "success");
        assert_eq!(v["message"], "Found 2 YubiKey(s)");
        assert_eq!(v["devices"], json!(["a", "b"]));
        assert!(v.get("suggested_next_action").is_none());
    }

    #[test]
    fn error_with_suggestion() {
        let v = Envelope::error("ykman not found")
            .suggest("Install yubikey-manager")
            .into_value();
        assert_eq!(v["status"], "error");
        assert_eq!(v["suggested_next_action"], "Install yubikey-manager");
    }

    #[test]
    fn no_devices_is_distinct_from_error() {
        let v = Envelope::no_devices("No YubiKeys detected").into_value();
        assert_eq!(v["status"], "no_devices");
    }
}
