use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A user payload (`args`, `output`, event `args`, error `metadata`) as it travels through the
/// core. Opaque by design: the protocol layer never interprets these beyond byte length in the
/// binary wire, and never re-encodes an already-decoded value in the text wire.
#[derive(Debug, Clone)]
pub enum Payload {
	/// Decoded dynamic value, the text wire's native representation, and also what a caller
	/// hands us before we serialize an outbound message.
	Value(serde_json::Value),
	/// CBOR-encoded bytes, still opaque, the binary wire's native representation for a payload
	/// that hasn't been decoded yet.
	Cbor(bytes::Bytes),
}

impl Payload {
	pub fn null() -> Self {
		Payload::Value(serde_json::Value::Null)
	}

	pub fn from_value(value: serde_json::Value) -> Self {
		Payload::Value(value)
	}

	pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, ProtocolError> {
		serde_json::to_value(value)
			.map(Payload::Value)
			.map_err(|err| ProtocolError::InvalidPayload(err.to_string()))
	}

	/// Decode to the dynamic value representation regardless of wire origin.
	pub fn decode(&self) -> Result<serde_json::Value, ProtocolError> {
		match self {
			Payload::Value(value) => Ok(value.clone()),
			Payload::Cbor(bytes) => ciborium::de::from_reader(bytes.as_ref())
				.map_err(|err| ProtocolError::InvalidPayload(err.to_string())),
		}
	}

	pub fn decode_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ProtocolError> {
		match self {
			Payload::Value(value) => serde_json::from_value(value.clone())
				.map_err(|err| ProtocolError::InvalidPayload(err.to_string())),
			Payload::Cbor(bytes) => ciborium::de::from_reader(bytes.as_ref())
				.map_err(|err| ProtocolError::InvalidPayload(err.to_string())),
		}
	}

	/// Force this payload into its CBOR byte representation, encoding if it's currently a
	/// decoded value. Used when writing the binary wire.
	pub fn to_cbor_bytes(&self) -> Result<bytes::Bytes, ProtocolError> {
		match self {
			Payload::Cbor(bytes) => Ok(bytes.clone()),
			Payload::Value(value) => {
				let mut buf = Vec::new();
				ciborium::ser::into_writer(value, &mut buf)
					.map_err(|err| ProtocolError::InvalidPayload(err.to_string()))?;
				Ok(buf.into())
			}
		}
	}

	pub fn from_cbor_bytes(bytes: bytes::Bytes) -> Self {
		Payload::Cbor(bytes)
	}
}

/// Serializes as the decoded JSON value, the text wire's native shape, and also how a payload
/// is carried inside structs that travel over plain JSON rather than through `encoding.rs`
/// directly (e.g. `ActorQuery::GetOrCreateForKey.input` on the manager HTTP API, §6.1).
impl Serialize for Payload {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			Payload::Value(value) => value.serialize(serializer),
			Payload::Cbor(_) => self
				.decode()
				.map_err(serde::ser::Error::custom)?
				.serialize(serializer),
		}
	}
}

impl<'de> Deserialize<'de> for Payload {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		serde_json::Value::deserialize(deserializer).map(Payload::Value)
	}
}

impl PartialEq for Payload {
	fn eq(&self, other: &Self) -> bool {
		// Compare by decoded value so a round-tripped CBOR payload equals the JSON value it
		// encodes, which is what every test in this workspace actually cares about.
		match (self.decode(), other.decode()) {
			(Ok(a), Ok(b)) => a == b,
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn value_round_trips_through_cbor() {
		let original = Payload::from_value(serde_json::json!({"a": 1, "b": [1, 2, 3]}));
		let cbor = original.to_cbor_bytes().unwrap();
		let restored = Payload::from_cbor_bytes(cbor);
		assert_eq!(original.decode().unwrap(), restored.decode().unwrap());
	}

	#[test]
	fn decode_as_typed() {
		#[derive(Deserialize, PartialEq, Debug)]
		struct Args {
			x: u32,
		}

		let payload = Payload::from_value(serde_json::json!({"x": 42}));
		let args: Args = payload.decode_as().unwrap();
		assert_eq!(args, Args { x: 42 });
	}
}
