//! Named-event envelope carried in a single text frame.
//!
//! An event is a JSON array whose first element is the event name and whose
//! optional second element is the payload:
//!
//! ```text
//! ["deviceData",{"gpsLocation":"...","engineRunning":true}]
//! ["ping"]
//! ```

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// A decoded inbound or outbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event: String,
    /// `Value::Null` when the event was sent without a payload.
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// An event without payload.
    pub fn empty(event: impl Into<String>) -> Self {
        Self::new(event, Value::Null)
    }

    /// Serialize `payload` under `event` straight to envelope text.
    ///
    /// # Errors
    ///
    /// `Error::InvalidEnvelope` if the payload fails to serialize.
    pub fn encode_with<T: Serialize + ?Sized>(event: &str, payload: &T) -> Result<String> {
        let payload =
            serde_json::to_value(payload).map_err(|err| Error::InvalidEnvelope(err.to_string()))?;
        Ok(Self::new(event, payload).encode())
    }

    pub fn encode(&self) -> String {
        let array = if self.payload.is_null() {
            Value::Array(vec![Value::String(self.event.clone())])
        } else {
            Value::Array(vec![
                Value::String(self.event.clone()),
                self.payload.clone(),
            ])
        };
        array.to_string()
    }

    /// Parse envelope text.
    ///
    /// # Errors
    ///
    /// `Error::InvalidEnvelope` unless the text is a JSON array of one or two
    /// elements starting with a non-empty string.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| Error::InvalidEnvelope(err.to_string()))?;
        let Value::Array(mut items) = value else {
            return Err(Error::InvalidEnvelope("expected a JSON array".into()));
        };
        if items.is_empty() || items.len() > 2 {
            return Err(Error::InvalidEnvelope(format!(
                "expected 1 or 2 elements, got {}",
                items.len()
            )));
        }

        let payload = if items.len() == 2 {
            items.pop().unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        match items.pop() {
            Some(Value::String(event)) if !event.is_empty() => Ok(Self { event, payload }),
            _ => Err(Error::InvalidEnvelope(
                "first element must be a non-empty event name".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_with_payload() {
        let text = Envelope::encode_with("testMessage", &json!({"message": "hi"})).unwrap();
        assert_eq!(text, r#"["testMessage",{"message":"hi"}]"#);
    }

    #[test]
    fn test_encode_empty_payload() {
        assert_eq!(Envelope::empty("ping").encode(), r#"["ping"]"#);
    }

    #[test]
    fn test_decode_command() {
        let env = Envelope::decode(r#"["deviceCommand",{"command":"PARK"}]"#).unwrap();
        assert_eq!(env.event, "deviceCommand");
        assert_eq!(env.payload, json!({"command": "PARK"}));
    }

    #[test]
    fn test_decode_without_payload() {
        let env = Envelope::decode(r#"["pingResponse"]"#).unwrap();
        assert_eq!(env, Envelope::empty("pingResponse"));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for text in [
            "not json",
            r#"{"event":"x"}"#,
            "[]",
            r#"[1, {}]"#,
            r#"["", {}]"#,
            r#"["a", 1, 2]"#,
        ] {
            assert!(
                matches!(Envelope::decode(text), Err(Error::InvalidEnvelope(_))),
                "accepted {text}"
            );
        }
    }
}
