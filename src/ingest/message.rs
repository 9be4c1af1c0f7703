use serde::Serialize;
use serde_json::{Map, Value};

/// A subscription payload decoded into a JSON object.
///
/// Only objects qualify; arrays, scalars and malformed JSON are decode
/// failures. Never mutated after decoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DecodedMessage(Map<String, Value>);

impl DecodedMessage {
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<Map<String, Value>>(raw).map(Self)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl From<Map<String, Value>> for DecodedMessage {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}
