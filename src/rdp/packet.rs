//! Inbound packet envelope.

use crate::error::{ActorError, Error, Result};
use serde_json::{Map, Value};

/// One JSON packet received from the browser. Every inbound packet names its
/// sending actor in `from`; the rest of the shape depends on the actor.
#[derive(Debug, Clone)]
pub struct Packet {
    pub from: String,
    pub body: Map<String, Value>,
}

impl Packet {
    pub fn parse(bytes: &[u8]) -> Result<Packet> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut body) = value else {
            return Err(Error::Truncated);
        };
        let Some(Value::String(from)) = body.remove("from") else {
            return Err(Error::Truncated);
        };
        Ok(Packet { from, body })
    }

    /// The `type` field, present on events and on a few legacy responses.
    pub fn kind(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Interpret this packet as an error response if it carries `error`.
    pub fn to_actor_error(&self) -> Option<ActorError> {
        let code = self.body.get("error").and_then(Value::as_str)?;
        let message = self
            .body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(ActorError::from_packet(code, message))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}
