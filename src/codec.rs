use common::Envelope;
use serde_json::{Map, Value};

use crate::error::CodecError;

/// Wrap whatever `build` writes into the payload object, addressed to
/// `target_id`.
pub fn encode_addressed<F>(target_id: impl Into<String>, build: F) -> Envelope
where
    F: FnOnce(&mut Map<String, Value>),
{
    Envelope::addressed(target_id, build)
}

pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(CodecError::Serialize)
}

pub fn encode_value(value: &Value) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(CodecError::Serialize)
}

/// Parse an inbound frame. No envelope shape is enforced: whatever JSON the
/// relay delivered is passed through as-is.
pub fn decode(raw: &[u8]) -> Result<Value, CodecError> {
    serde_json::from_slice(raw).map_err(CodecError::Malformed)
}
