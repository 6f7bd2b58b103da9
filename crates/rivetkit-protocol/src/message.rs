use crate::{error::ErrorShape, payload::Payload};

/// Client→server messages (§3 "Client→server messages").
#[derive(Debug, Clone)]
pub enum ClientMessage {
	ActionRequest {
		id: u64,
		name: String,
		args: Payload,
	},
	SubscriptionRequest {
		event_name: String,
		subscribe: bool,
	},
}

impl ClientMessage {
	/// Subscription (re)send messages are ephemeral: never enqueued while the transport is
	/// down, always re-derived from the subscription table on reconnect.
	pub fn is_ephemeral(&self) -> bool {
		matches!(self, ClientMessage::SubscriptionRequest { .. })
	}
}

/// Server→client messages (§3 "Server→client messages").
#[derive(Debug, Clone)]
pub enum ServerMessage {
	Init {
		actor_id: String,
		connection_id: String,
	},
	ActionResponse {
		id: u64,
		output: Payload,
	},
	Event {
		name: String,
		args: Payload,
	},
	Error {
		group: String,
		code: String,
		message: String,
		metadata: Option<Payload>,
		action_id: Option<u64>,
	},
}

impl ServerMessage {
	pub fn error_from_shape(shape: ErrorShape, action_id: Option<u64>) -> Self {
		ServerMessage::Error {
			group: shape.group,
			code: shape.code,
			message: shape.message,
			metadata: shape.metadata.map(Payload::from_value),
			action_id,
		}
	}

	pub fn as_error_shape(&self) -> Option<ErrorShape> {
		match self {
			ServerMessage::Error {
				group,
				code,
				message,
				metadata,
				..
			} => Some(ErrorShape {
				group: group.clone(),
				code: code.clone(),
				message: message.clone(),
				metadata: metadata.as_ref().and_then(|m| m.decode().ok()),
			}),
			_ => None,
		}
	}

	/// `true` for a connection-level error (no `action_id`), as opposed to one scoped to a
	/// single in-flight action.
	pub fn is_connection_error(&self) -> bool {
		matches!(
			self,
			ServerMessage::Error {
				action_id: None,
				..
			}
		)
	}
}
