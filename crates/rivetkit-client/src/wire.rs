//! One-shot HTTP request/response encoding for the queue sender and actor handle (§4.5/§4.6).
//!
//! Distinct from `rivetkit_protocol`'s message wire, which frames a multiplexed stream of
//! tagged messages: this is a single opaque payload in, a single opaque payload (or error) out.
//! Text carries the decoded JSON value directly; binary wraps the CBOR-encoded payload in a
//! one-field BARE envelope, mirroring the embedding the socket wire uses for `args`/`output`.

use bytes::Bytes;
use rivetkit_protocol::{Encoding, ErrorShape, Payload, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::errors::ClientError;

#[derive(Serialize, Deserialize)]
struct BinaryEnvelope {
	data: ByteBuf,
}

pub fn content_type(encoding: Encoding) -> &'static str {
	match encoding {
		Encoding::Text => "application/json",
		Encoding::Binary => "application/octet-stream",
	}
}

pub fn encode_payload(encoding: Encoding, payload: &Payload) -> Result<Bytes, ClientError> {
	match encoding {
		Encoding::Text => {
			let value = payload.decode().map_err(protocol_err)?;
			serde_json::to_vec(&value)
				.map(Bytes::from)
				.map_err(|err| ClientError::Internal(err.to_string()))
		}
		Encoding::Binary => {
			let envelope = BinaryEnvelope {
				data: ByteBuf::from(payload.to_cbor_bytes().map_err(protocol_err)?.to_vec()),
			};
			let mut buf = Vec::new();
			serde_bare::to_writer(&mut buf, &envelope)
				.map_err(|err| ClientError::Internal(err.to_string()))?;
			Ok(Bytes::from(buf))
		}
	}
}

pub fn decode_payload(encoding: Encoding, bytes: &[u8]) -> Result<Payload, ClientError> {
	match encoding {
		Encoding::Text => {
			let value: serde_json::Value = serde_json::from_slice(bytes)
				.map_err(|err| ClientError::Internal(err.to_string()))?;
			Ok(Payload::from_value(value))
		}
		Encoding::Binary => {
			let envelope: BinaryEnvelope = serde_bare::from_slice(bytes)
				.map_err(|err| ClientError::Internal(err.to_string()))?;
			Ok(Payload::from_cbor_bytes(envelope.data.into_vec().into()))
		}
	}
}

fn protocol_err(err: ProtocolError) -> ClientError {
	ClientError::Internal(err.to_string())
}

/// Parses a non-2xx response body into the uniform error shape. The error wire is always JSON
/// regardless of the connection's data encoding, since it carries no user payload of its own.
pub fn decode_error_body(status: http::StatusCode, bytes: &[u8]) -> ClientError {
	match serde_json::from_slice::<ErrorShape>(bytes) {
		Ok(shape) => ClientError::from_shape(shape),
		Err(_) => ClientError::from_shape(ErrorShape::new(
			"transport",
			"http_error",
			format!("actor returned HTTP {status} with an unparseable error body"),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rivetkit_protocol::ApiError;

	#[test]
	fn text_payload_round_trips() {
		let payload = Payload::from_value(serde_json::json!([1, "two", 3.0]));
		let bytes = encode_payload(Encoding::Text, &payload).unwrap();
		let decoded = decode_payload(Encoding::Text, &bytes).unwrap();
		assert_eq!(payload, decoded);
	}

	#[test]
	fn binary_payload_round_trips_through_bare_envelope() {
		let payload = Payload::from_value(serde_json::json!({"a": 1}));
		let bytes = encode_payload(Encoding::Binary, &payload).unwrap();
		let decoded = decode_payload(Encoding::Binary, &bytes).unwrap();
		assert_eq!(payload, decoded);
	}

	#[test]
	fn malformed_error_body_falls_back_to_generic_transport_error() {
		let err = decode_error_body(http::StatusCode::BAD_GATEWAY, b"not json");
		assert_eq!(err.code(), "http_error");
	}
}
