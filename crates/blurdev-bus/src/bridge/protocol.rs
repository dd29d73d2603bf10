//! Wire protocol types for parent/child communication.
//!
//! A single channel per child: the child's stdin carries parent frames and its
//! stdout carries child frames. The first child frame is always `ready`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::Command;

/// Identifies one spawn of a child process.
///
/// Minted by the parent and echoed back in the child's ready frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Child is up and listening (child to parent, first frame).
    Ready {
        session: SessionId,
        pid: u32,
        app_name: String,
    },

    /// Free-form payload, either direction. See [`Payload::classify`].
    Payload { payload: serde_json::Value },

    /// Parent asks the child to shut down.
    Shutdown,
}

impl Frame {
    pub fn payload(payload: impl Into<serde_json::Value>) -> Self {
        Self::Payload {
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Payload { .. } => "payload",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Payload was neither a command nor an error.
    InvalidHandler,
    /// A handler failed on the other side.
    HandlerFailed,
    Other,
}

impl RemoteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidHandler => "invalid_handler",
            Self::HandlerFailed => "handler_failed",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carried across the channel. Re-raised by the receiving dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_handler(payload: &serde_json::Value) -> Self {
        Self::new(
            RemoteErrorKind::InvalidHandler,
            format!("Invalid handler: {payload}"),
        )
    }

    pub fn handler_failed(error: &dyn std::error::Error) -> Self {
        Self::new(RemoteErrorKind::HandlerFailed, error.to_string())
    }

    /// `{"error": {"kind": ..., "message": ...}}`
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "error": self })
    }

    /// Recognise an error-shaped payload: an object whose only key is `error`.
    ///
    /// A structured `{kind, message}` body is taken as-is; any other body is
    /// wrapped as [`RemoteErrorKind::Other`].
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        let map = payload.as_object()?;
        if map.len() != 1 {
            return None;
        }
        let body = map.get("error")?;
        if let Ok(err) = serde_json::from_value::<RemoteError>(body.clone()) {
            return Some(err);
        }
        let message = match body {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(Self::new(RemoteErrorKind::Other, message))
    }
}

/// An inbound payload sorted by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Command(Command),
    Error(RemoteError),
    Invalid(serde_json::Value),
}

impl Payload {
    /// Errors are recognised first, then `[name, command, params?]`.
    pub fn classify(value: serde_json::Value) -> Self {
        if let Some(err) = RemoteError::from_payload(&value) {
            return Self::Error(err);
        }
        match Command::from_payload(&value) {
            Some(command) => Self::Command(command),
            None => Self::Invalid(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::Params;

    fn session() -> SessionId {
        SessionId::parse("6f1c2f4e-8d0b-4a55-9a53-0d6f3c2b1a90").unwrap()
    }

    #[test]
    fn ready_frame_wire_shape() {
        let frame = Frame::Ready {
            session: session(),
            pid: 4242,
            app_name: "external".to_string(),
        };
        insta::assert_json_snapshot!(frame, @r#"
        {
          "type": "ready",
          "session": "6f1c2f4e-8d0b-4a55-9a53-0d6f3c2b1a90",
          "pid": 4242,
          "app_name": "external"
        }
        "#);
    }

    #[test]
    fn payload_frame_wire_shape() {
        let mut params = Params::new();
        params.insert("a".into(), "b".into());
        params.insert("key".into(), vec!["value".to_string(), "case".to_string()].into());
        let command = Command::new("treegrunt", "wtf", params);
        let frame = Frame::payload(command.to_payload());
        insta::assert_json_snapshot!(frame, @r#"
        {
          "type": "payload",
          "payload": [
            "treegrunt",
            "wtf",
            {
              "a": "b",
              "key": [
                "value",
                "case"
              ]
            }
          ]
        }
        "#);
    }

    #[test]
    fn shutdown_frame_wire_shape() {
        insta::assert_json_snapshot!(Frame::Shutdown, @r#"
        {
          "type": "shutdown"
        }
        "#);
    }

    #[test]
    fn remote_error_wire_shape() {
        let err = RemoteError::invalid_handler(&json!([1, 2, 3]));
        insta::assert_json_snapshot!(err.to_payload(), @r#"
        {
          "error": {
            "kind": "invalid_handler",
            "message": "Invalid handler: [1,2,3]"
          }
        }
        "#);
        assert_eq!(err.to_string(), "invalid_handler: Invalid handler: [1,2,3]");
    }

    #[test]
    fn classify_commands() {
        let payload = Payload::classify(json!(["treegrunt", "wtf"]));
        let Payload::Command(command) = payload else {
            panic!("expected command, got {payload:?}");
        };
        assert_eq!(command.handler_name(), "treegrunt");
        assert_eq!(command.command(), "wtf");
        assert!(command.params().is_empty());

        assert!(matches!(
            Payload::classify(json!(["blurdev", "showLogger", {"x": "1"}])),
            Payload::Command(_)
        ));
    }

    #[test]
    fn classify_errors() {
        let structured = RemoteError::new(RemoteErrorKind::HandlerFailed, "boom");
        assert_eq!(
            Payload::classify(structured.to_payload()),
            Payload::Error(structured)
        );
        assert_eq!(
            Payload::classify(json!({"error": "plain text"})),
            Payload::Error(RemoteError::new(RemoteErrorKind::Other, "plain text"))
        );
    }

    #[test]
    fn classify_invalid_shapes() {
        for value in [
            json!("treegrunt"),
            json!(["treegrunt"]),
            json!(["treegrunt", "wtf", {}, "extra"]),
            json!(["treegrunt", 5]),
            json!(["treegrunt", "wtf", ["not", "a", "map"]]),
            json!({"error": "x", "other": 1}),
            json!(null),
        ] {
            assert_eq!(Payload::classify(value.clone()), Payload::Invalid(value));
        }
    }

    #[test]
    fn session_id_roundtrip() {
        let id = SessionId::new();
        assert_eq!(SessionId::parse(&id.to_string()).unwrap(), id);
        assert!(SessionId::parse("not-a-uuid").is_err());
    }
}
