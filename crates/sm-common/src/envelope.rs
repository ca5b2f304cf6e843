use serde::{Deserialize, Serialize};

use crate::error::SmartMessageError;
use crate::header::Header;

/// `{ header, payload }` pair, typed on the subscriber/publisher side before
/// encoding and after decoding. The envelope is the unit handed to handlers;
/// only the payload goes through the configured serializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub header: Header,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(header: Header, payload: T) -> Self {
        Self { header, payload }
    }
}

/// The envelope as it crosses a transport boundary: header plus the
/// serializer's output bytes for the payload. Transports, the DLQ, and the
/// dispatcher's inbound decode path all operate on this form; only
/// `Message::publish`/handler invocation deal in the fully typed `Envelope<T>`.
#[derive(Debug, Clone)]
pub struct EncodedEnvelope {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl EncodedEnvelope {
    pub fn new(header: Header, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Wire form per the envelope wire format: a single UTF-8 JSON object
    /// with `_sm_header` and `_sm_payload` keys. The payload is embedded as
    /// a nested JSON value when it parses as one (true of the default JSON
    /// serializer); otherwise it falls back to a JSON string of the raw
    /// bytes so the wrapper always round-trips.
    pub fn to_wire_bytes(&self) -> Result<Vec<u8>, SmartMessageError> {
        let payload_value: serde_json::Value = match serde_json::from_slice(&self.payload) {
            Ok(v) => v,
            Err(_) => serde_json::Value::String(String::from_utf8_lossy(&self.payload).into_owned()),
        };
        let wrapper = serde_json::json!({
            "_sm_header": self.header,
            "_sm_payload": payload_value,
        });
        serde_json::to_vec(&wrapper)
            .map_err(|e| SmartMessageError::Other(format!("envelope encode failed: {e}")))
    }

    /// Parses the wire wrapper back into a header and raw payload bytes.
    /// The payload bytes are the serializer's input for `decode`; when the
    /// embedded payload is not a JSON string we re-serialize the nested
    /// value to bytes so the default JSON serializer can decode it.
    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Self, SmartMessageError> {
        let wrapper: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| SmartMessageError::Other(format!("malformed envelope wrapper: {e}")))?;
        let header_value = wrapper
            .get("_sm_header")
            .ok_or_else(|| SmartMessageError::Other("envelope missing _sm_header".to_string()))?;
        let header: Header = serde_json::from_value(header_value.clone())
            .map_err(|e| SmartMessageError::Other(format!("malformed header: {e}")))?;
        let payload_value = wrapper
            .get("_sm_payload")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let payload = match payload_value {
            serde_json::Value::String(s) => s.into_bytes(),
            other => serde_json::to_vec(&other)
                .map_err(|e| SmartMessageError::Other(format!("malformed payload: {e}")))?,
        };
        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_preserves_header_and_payload() {
        let header = Header::new("OrderCreated", 1, "orders-service");
        let payload = serde_json::to_vec(&serde_json::json!({"order_id": "O1"})).unwrap();
        let encoded = EncodedEnvelope::new(header.clone(), payload.clone());

        let wire = encoded.to_wire_bytes().unwrap();
        let decoded = EncodedEnvelope::from_wire_bytes(&wire).unwrap();

        assert_eq!(decoded.header.uuid, header.uuid);
        let original: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        let round_tripped: serde_json::Value = serde_json::from_slice(&decoded.payload).unwrap();
        assert_eq!(original, round_tripped);
    }
}
