// Wire messages sent from the hub to connected clients

use serde::{Deserialize, Serialize};

/// Reply text sent to a client whose payload could not be evaluated
pub const INVALID_EXPRESSION: &str = "invalid expression";

/// A payload delivered to a client
///
/// Serialized as `{"error": bool, "msg": string}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Whether this message reports a failure to the sender
    #[serde(rename = "error")]
    pub failed: bool,
    /// Message content
    #[serde(rename = "msg")]
    pub text: String,
}

impl Message {
    /// A successful broadcast payload
    pub fn broadcast(text: impl Into<String>) -> Self {
        Self {
            failed: false,
            text: text.into(),
        }
    }

    /// A failure reply, only ever sent to the originating client
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            failed: true,
            text: text.into(),
        }
    }

    /// Serialize to a JSON string for a text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON text frame
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let json = Message::broadcast("1+1 = 2").to_json().unwrap();
        assert_eq!(json, r#"{"error":false,"msg":"1+1 = 2"}"#);

        let json = Message::failure(INVALID_EXPRESSION).to_json().unwrap();
        assert_eq!(json, r#"{"error":true,"msg":"invalid expression"}"#);
    }

    #[test]
    fn test_parse_wire_message() {
        let msg = Message::from_json(r#"{"error":true,"msg":"nope"}"#).unwrap();
        assert!(msg.failed);
        assert_eq!(msg.text, "nope");
    }
}
