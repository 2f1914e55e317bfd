// ABOUTME: Sequence-numbered log messages and their unmarshalling from event payloads

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UnmarshalError {
    #[error("Malformed log payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Log payload is not a JSON object")]
    NotAnObject,
    #[error("Log payload has no 'line' key")]
    MissingLine,
}

/// One line of remote output together with its position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub sequence_number: u64,
    pub text: String,
}

impl LogMessage {
    pub fn new(sequence_number: u64, text: impl Into<String>) -> Self {
        Self {
            sequence_number,
            text: text.into(),
        }
    }

    /// Decode a `{"num": n, "line": "..."}` payload.
    ///
    /// A missing or non-numeric `num` decodes as 0, which the reassembler
    /// always treats as already printed. A `null` line is empty text; any other
    /// non-string `line` (number, bool, array, object) is kept as its compact
    /// JSON rendering, so `{"line": 5}` prints `5`.
    pub fn from_value(value: &Value) -> Result<Self, UnmarshalError> {
        let object = value.as_object().ok_or(UnmarshalError::NotAnObject)?;

        let text = match object.get("line") {
            Some(Value::String(line)) => line.clone(),
            Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
            None => return Err(UnmarshalError::MissingLine),
        };

        let sequence_number = object.get("num").and_then(Value::as_u64).unwrap_or(0);

        Ok(Self {
            sequence_number,
            text,
        })
    }

    /// Decode a raw JSON text payload
    pub fn parse(payload: &str) -> Result<Self, UnmarshalError> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(&value)
    }
}
