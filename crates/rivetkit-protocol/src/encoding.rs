//! Symmetric serialize/deserialize over the two wire shapes (§4.1).
//!
//! Text uses a JSON shape validated against the current schema version; binary uses a
//! BARE-framed envelope (`serde_bare`) with a leading version byte, embedding CBOR-encoded user
//! payloads as opaque byte strings. Both directions dispatch on [`PROTOCOL_VERSION`] so mixed
//! version peers can coexist, an unknown version is a hard `UnsupportedVersion` error, never a
//! silent downcast.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::{
	error::ProtocolError,
	message::{ClientMessage, ServerMessage},
	payload::Payload,
};

/// Current protocol version, embedded as the first byte of every binary message.
pub const PROTOCOL_VERSION: u8 = 1;

/// The closed set of wire shapes a connection is parameterized by (§3 "Encoding").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
	Text,
	Binary,
}

impl Encoding {
	pub fn as_str(&self) -> &'static str {
		match self {
			Encoding::Text => "text",
			Encoding::Binary => "binary",
		}
	}

	pub fn serialize_client(&self, msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
		match self {
			Encoding::Text => serialize_text_client(msg).map(String::into_bytes),
			Encoding::Binary => serialize_binary_client(msg),
		}
	}

	pub fn deserialize_client(&self, bytes: &[u8]) -> Result<ClientMessage, ProtocolError> {
		match self {
			Encoding::Text => {
				let text = std::str::from_utf8(bytes)
					.map_err(|err| ProtocolError::Deserialize(err.to_string()))?;
				deserialize_text_client(text)
			}
			Encoding::Binary => deserialize_binary_client(bytes),
		}
	}

	pub fn serialize_server(&self, msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
		match self {
			Encoding::Text => serialize_text_server(msg).map(String::into_bytes),
			Encoding::Binary => serialize_binary_server(msg),
		}
	}

	pub fn deserialize_server(&self, bytes: &[u8]) -> Result<ServerMessage, ProtocolError> {
		match self {
			Encoding::Text => {
				let text = std::str::from_utf8(bytes)
					.map_err(|err| ProtocolError::Deserialize(err.to_string()))?;
				deserialize_text_server(text)
			}
			Encoding::Binary => deserialize_binary_server(bytes),
		}
	}
}

impl std::str::FromStr for Encoding {
	type Err = ProtocolError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"text" => Ok(Encoding::Text),
			"binary" => Ok(Encoding::Binary),
			other => Err(ProtocolError::SchemaInvalid(format!("unknown encoding: {other}"))),
		}
	}
}

// ---- text wire ----------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
#[serde(tag = "b", rename_all = "snake_case")]
enum TextClientMessage {
	ActionRequest {
		i: u64,
		n: String,
		a: serde_json::Value,
	},
	SubscriptionRequest {
		e: String,
		s: bool,
	},
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "b", rename_all = "snake_case")]
enum TextServerMessage {
	Init {
		ai: String,
		ci: String,
	},
	ActionResponse {
		i: u64,
		o: serde_json::Value,
	},
	Event {
		n: String,
		a: serde_json::Value,
	},
	Error {
		g: String,
		c: String,
		m: String,
		#[serde(skip_serializing_if = "Option::is_none")]
		md: Option<serde_json::Value>,
		#[serde(skip_serializing_if = "Option::is_none")]
		ai: Option<u64>,
	},
}

/// Reject payloads that don't look like the closed schema we expect, rather than letting an
/// unrecognized shape silently deserialize into the wrong variant. This is the "validated by
/// schema" step referenced in §4.1, kept as an explicit pre-check because `serde(tag = "b")`
/// alone would accept any object containing the field `b`.
fn validate_text_shape(value: &serde_json::Value) -> Result<(), ProtocolError> {
	let obj = value
		.as_object()
		.ok_or_else(|| ProtocolError::SchemaInvalid("message must be a JSON object".into()))?;
	if !obj.contains_key("b") {
		return Err(ProtocolError::SchemaInvalid(
			"message missing discriminant field `b`".into(),
		));
	}
	Ok(())
}

pub fn serialize_text_client(msg: &ClientMessage) -> Result<String, ProtocolError> {
	let wire = match msg {
		ClientMessage::ActionRequest { id, name, args } => TextClientMessage::ActionRequest {
			i: *id,
			n: name.clone(),
			a: args.decode()?,
		},
		ClientMessage::SubscriptionRequest {
			event_name,
			subscribe,
		} => TextClientMessage::SubscriptionRequest {
			e: event_name.clone(),
			s: *subscribe,
		},
	};
	serde_json::to_string(&wire).map_err(|err| ProtocolError::Serialize(err.to_string()))
}

pub fn deserialize_text_client(raw: &str) -> Result<ClientMessage, ProtocolError> {
	let value: serde_json::Value =
		serde_json::from_str(raw).map_err(|err| ProtocolError::Deserialize(err.to_string()))?;
	validate_text_shape(&value)?;
	let wire: TextClientMessage = serde_json::from_value(value)
		.map_err(|err| ProtocolError::Deserialize(err.to_string()))?;
	Ok(match wire {
		TextClientMessage::ActionRequest { i, n, a } => ClientMessage::ActionRequest {
			id: i,
			name: n,
			args: Payload::from_value(a),
		},
		TextClientMessage::SubscriptionRequest { e, s } => ClientMessage::SubscriptionRequest {
			event_name: e,
			subscribe: s,
		},
	})
}

pub fn serialize_text_server(msg: &ServerMessage) -> Result<String, ProtocolError> {
	let wire = match msg {
		ServerMessage::Init {
			actor_id,
			connection_id,
		} => TextServerMessage::Init {
			ai: actor_id.clone(),
			ci: connection_id.clone(),
		},
		ServerMessage::ActionResponse { id, output } => TextServerMessage::ActionResponse {
			i: *id,
			o: output.decode()?,
		},
		ServerMessage::Event { name, args } => TextServerMessage::Event {
			n: name.clone(),
			a: args.decode()?,
		},
		ServerMessage::Error {
			group,
			code,
			message,
			metadata,
			action_id,
		} => TextServerMessage::Error {
			g: group.clone(),
			c: code.clone(),
			m: message.clone(),
			md: metadata.as_ref().map(|m| m.decode()).transpose()?,
			ai: *action_id,
		},
	};
	serde_json::to_string(&wire).map_err(|err| ProtocolError::Serialize(err.to_string()))
}

pub fn deserialize_text_server(raw: &str) -> Result<ServerMessage, ProtocolError> {
	let value: serde_json::Value =
		serde_json::from_str(raw).map_err(|err| ProtocolError::Deserialize(err.to_string()))?;
	validate_text_shape(&value)?;
	let wire: TextServerMessage = serde_json::from_value(value)
		.map_err(|err| ProtocolError::Deserialize(err.to_string()))?;
	Ok(match wire {
		TextServerMessage::Init { ai, ci } => ServerMessage::Init {
			actor_id: ai,
			connection_id: ci,
		},
		TextServerMessage::ActionResponse { i, o } => ServerMessage::ActionResponse {
			id: i,
			output: Payload::from_value(o),
		},
		TextServerMessage::Event { n, a } => ServerMessage::Event {
			name: n,
			args: Payload::from_value(a),
		},
		TextServerMessage::Error { g, c, m, md, ai } => ServerMessage::Error {
			group: g,
			code: c,
			message: m,
			metadata: md.map(Payload::from_value),
			action_id: ai,
		},
	})
}

// ---- binary wire ---------------------------------------------------------------------------
//
// BARE union layout per version. `ByteBuf` carries the opaque CBOR-encoded user payload as a
// BARE `data` type rather than an array of integers.

#[derive(Serialize, Deserialize)]
enum BinaryClientMessageV1 {
	ActionRequest {
		id: u64,
		name: String,
		args: ByteBuf,
	},
	SubscriptionRequest {
		event_name: String,
		subscribe: bool,
	},
}

#[derive(Serialize, Deserialize)]
enum BinaryServerMessageV1 {
	Init {
		actor_id: String,
		connection_id: String,
	},
	ActionResponse {
		id: u64,
		output: ByteBuf,
	},
	Event {
		name: String,
		args: ByteBuf,
	},
	Error {
		group: String,
		code: String,
		message: String,
		metadata: Option<ByteBuf>,
		action_id: Option<u64>,
	},
}

pub fn serialize_binary_client(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
	let wire = match msg {
		ClientMessage::ActionRequest { id, name, args } => BinaryClientMessageV1::ActionRequest {
			id: *id,
			name: name.clone(),
			args: ByteBuf::from(args.to_cbor_bytes()?.to_vec()),
		},
		ClientMessage::SubscriptionRequest {
			event_name,
			subscribe,
		} => BinaryClientMessageV1::SubscriptionRequest {
			event_name: event_name.clone(),
			subscribe: *subscribe,
		},
	};
	let mut buf = vec![PROTOCOL_VERSION];
	serde_bare::to_writer(&mut buf, &wire).map_err(|err| ProtocolError::Serialize(err.to_string()))?;
	Ok(buf)
}

pub fn deserialize_binary_client(bytes: &[u8]) -> Result<ClientMessage, ProtocolError> {
	let (version, rest) = bytes.split_first().ok_or(ProtocolError::Truncated)?;
	match version {
		1 => {
			let wire: BinaryClientMessageV1 =
				serde_bare::from_slice(rest).map_err(|err| ProtocolError::Deserialize(err.to_string()))?;
			Ok(match wire {
				BinaryClientMessageV1::ActionRequest { id, name, args } => {
					ClientMessage::ActionRequest {
						id,
						name,
						args: Payload::from_cbor_bytes(args.into_vec().into()),
					}
				}
				BinaryClientMessageV1::SubscriptionRequest {
					event_name,
					subscribe,
				} => ClientMessage::SubscriptionRequest {
					event_name,
					subscribe,
				},
			})
		}
		v => Err(ProtocolError::UnsupportedVersion(*v)),
	}
}

pub fn serialize_binary_server(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
	let wire = match msg {
		ServerMessage::Init {
			actor_id,
			connection_id,
		} => BinaryServerMessageV1::Init {
			actor_id: actor_id.clone(),
			connection_id: connection_id.clone(),
		},
		ServerMessage::ActionResponse { id, output } => BinaryServerMessageV1::ActionResponse {
			id: *id,
			output: ByteBuf::from(output.to_cbor_bytes()?.to_vec()),
		},
		ServerMessage::Event { name, args } => BinaryServerMessageV1::Event {
			name: name.clone(),
			args: ByteBuf::from(args.to_cbor_bytes()?.to_vec()),
		},
		ServerMessage::Error {
			group,
			code,
			message,
			metadata,
			action_id,
		} => BinaryServerMessageV1::Error {
			group: group.clone(),
			code: code.clone(),
			message: message.clone(),
			metadata: metadata
				.as_ref()
				.map(|m| Ok::<_, ProtocolError>(ByteBuf::from(m.to_cbor_bytes()?.to_vec())))
				.transpose()?,
			action_id: *action_id,
		},
	};
	let mut buf = vec![PROTOCOL_VERSION];
	serde_bare::to_writer(&mut buf, &wire).map_err(|err| ProtocolError::Serialize(err.to_string()))?;
	Ok(buf)
}

pub fn deserialize_binary_server(bytes: &[u8]) -> Result<ServerMessage, ProtocolError> {
	let (version, rest) = bytes.split_first().ok_or(ProtocolError::Truncated)?;
	match version {
		1 => {
			let wire: BinaryServerMessageV1 =
				serde_bare::from_slice(rest).map_err(|err| ProtocolError::Deserialize(err.to_string()))?;
			Ok(match wire {
				BinaryServerMessageV1::Init {
					actor_id,
					connection_id,
				} => ServerMessage::Init {
					actor_id,
					connection_id,
				},
				BinaryServerMessageV1::ActionResponse { id, output } => {
					ServerMessage::ActionResponse {
						id,
						output: Payload::from_cbor_bytes(output.into_vec().into()),
					}
				}
				BinaryServerMessageV1::Event { name, args } => ServerMessage::Event {
					name,
					args: Payload::from_cbor_bytes(args.into_vec().into()),
				},
				BinaryServerMessageV1::Error {
					group,
					code,
					message,
					metadata,
					action_id,
				} => ServerMessage::Error {
					group,
					code,
					message,
					metadata: metadata.map(|m| Payload::from_cbor_bytes(m.into_vec().into())),
					action_id,
				},
			})
		}
		v => Err(ProtocolError::UnsupportedVersion(*v)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_client_messages() -> Vec<ClientMessage> {
		vec![
			ClientMessage::ActionRequest {
				id: 7,
				name: "echo".into(),
				args: Payload::from_value(serde_json::json!([42, "hi"])),
			},
			ClientMessage::SubscriptionRequest {
				event_name: "tick".into(),
				subscribe: true,
			},
		]
	}

	fn sample_server_messages() -> Vec<ServerMessage> {
		vec![
			ServerMessage::Init {
				actor_id: "A".into(),
				connection_id: "C".into(),
			},
			ServerMessage::ActionResponse {
				id: 7,
				output: Payload::from_value(serde_json::json!(42)),
			},
			ServerMessage::Event {
				name: "tick".into(),
				args: Payload::from_value(serde_json::json!({"n": 1})),
			},
			ServerMessage::Error {
				group: "actor".into(),
				code: "destroyed".into(),
				message: "actor destroyed".into(),
				metadata: Some(Payload::from_value(serde_json::json!({"reason": "oom"}))),
				action_id: Some(7),
			},
		]
	}

	#[test]
	fn text_round_trip_client() {
		for msg in sample_client_messages() {
			let encoded = serialize_text_client(&msg).unwrap();
			let decoded = deserialize_text_client(&encoded).unwrap();
			assert_eq!(serialize_text_client(&decoded).unwrap(), encoded);
		}
	}

	#[test]
	fn text_round_trip_server() {
		for msg in sample_server_messages() {
			let encoded = serialize_text_server(&msg).unwrap();
			let decoded = deserialize_text_server(&encoded).unwrap();
			assert_eq!(serialize_text_server(&decoded).unwrap(), encoded);
		}
	}

	#[test]
	fn binary_round_trip_client() {
		for msg in sample_client_messages() {
			let encoded = serialize_binary_client(&msg).unwrap();
			assert_eq!(encoded[0], PROTOCOL_VERSION);
			let decoded = deserialize_binary_client(&encoded).unwrap();
			assert_eq!(serialize_binary_client(&decoded).unwrap(), encoded);
		}
	}

	#[test]
	fn binary_round_trip_server() {
		for msg in sample_server_messages() {
			let encoded = serialize_binary_server(&msg).unwrap();
			assert_eq!(encoded[0], PROTOCOL_VERSION);
			let decoded = deserialize_binary_server(&encoded).unwrap();
			assert_eq!(serialize_binary_server(&decoded).unwrap(), encoded);
		}
	}

	#[test]
	fn unknown_binary_version_rejected() {
		let mut encoded = serialize_binary_server(&ServerMessage::Init {
			actor_id: "A".into(),
			connection_id: "C".into(),
		})
		.unwrap();
		encoded[0] = 200;
		let err = deserialize_binary_server(&encoded).unwrap_err();
		assert!(matches!(err, ProtocolError::UnsupportedVersion(200)));
	}

	#[test]
	fn truncated_binary_message_rejected() {
		let err = deserialize_binary_server(&[]).unwrap_err();
		assert!(matches!(err, ProtocolError::Truncated));
	}

	#[test]
	fn encoding_dispatches_to_the_right_wire() {
		let msg = ClientMessage::SubscriptionRequest {
			event_name: "tick".into(),
			subscribe: true,
		};
		for encoding in [Encoding::Text, Encoding::Binary] {
			let bytes = encoding.serialize_client(&msg).unwrap();
			let decoded = encoding.deserialize_client(&bytes).unwrap();
			assert!(decoded.is_ephemeral());
		}
		assert_eq!("binary".parse::<Encoding>().unwrap(), Encoding::Binary);
	}

	#[test]
	fn malformed_text_shape_rejected() {
		let err = deserialize_text_client("{\"not_the_right_field\": 1}").unwrap_err();
		assert!(matches!(err, ProtocolError::SchemaInvalid(_)));
	}
}
