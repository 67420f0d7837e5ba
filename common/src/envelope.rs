use alloc::string::String;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An addressed message. The relay forwards `payload` to the device whose
/// identity equals `target_id`.
///
/// Only outbound traffic is wrapped this way; inbound frames reach the
/// application as whatever JSON value the relay delivered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "targetId")]
    pub target_id: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(target_id: impl Into<String>, payload: Value) -> Self {
        Self {
            target_id: target_id.into(),
            payload,
        }
    }

    /// Build an envelope whose payload is a JSON object filled in by `build`.
    pub fn addressed<F>(target_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut payload = Map::new();
        build(&mut payload);
        Self::new(target_id, Value::Object(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_addressed_builder() {
        let envelope = Envelope::addressed("dev42", |payload| {
            payload.insert("x".into(), json!(1));
        });

        assert_eq!(envelope.target_id, "dev42");
        assert_eq!(envelope.payload, json!({ "x": 1 }));
    }

    #[test]
    fn test_target_id_field_name() {
        let envelope = Envelope::new("lamp", json!({ "on": true }));
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value, json!({ "targetId": "lamp", "payload": { "on": true } }));
    }

    #[test]
    fn test_empty_builder_still_has_object_payload() {
        let envelope = Envelope::addressed("dev", |_| {});
        assert_eq!(envelope.payload, json!({}));
    }
}
