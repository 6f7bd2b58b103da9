use rivetkit_driver::{ActorId, DriverError, TerminalError};
use rivetkit_protocol::{ApiError, ErrorShape};

/// The closed set of `(group, code)` pairs meaning "this actor is not currently schedulable"
/// (§7). Whenever one is observed the caller consults the manager for the actor's terminal error
/// and enriches it onto a [`ClientError::Scheduling`].
pub fn is_scheduling_error(shape: &ErrorShape) -> bool {
	shape.is_scheduling_error()
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error("actor not found")]
	ActorNotFound,
	#[error("invalid request: {0}")]
	InvalidRequest(String),
	#[error("server has no websocket upgrade hook")]
	WebSocketsNotEnabled,
	#[error("actor returned an error: {0}")]
	Actor(ErrorShape),
	#[error("actor {actor_id} is not schedulable: {error:?}")]
	Scheduling {
		actor_id: ActorId,
		error: Option<TerminalError>,
	},
	#[error("connection was disposed")]
	ConnectionDisposed,
	#[error("internal invariant violated: {0}")]
	Internal(String),
	#[error("response id {got} did not match request id {expected}")]
	ResponseIdMismatch { expected: u64, got: u64 },
	#[error(transparent)]
	Driver(#[from] DriverError),
}

impl ApiError for ClientError {
	// `Actor`/`Scheduling` carry a dynamic group/code read off the wire rather than one fixed at
	// the Rust type level; `to_shape` is overridden below to report those directly instead of
	// going through this default-impl path, so these two arms are placeholders never read.
	fn group(&self) -> &'static str {
		match self {
			ClientError::ActorNotFound => "actor",
			ClientError::InvalidRequest(_) => "request",
			ClientError::WebSocketsNotEnabled => "connection",
			ClientError::Actor(_) => "actor",
			ClientError::Scheduling { .. } => "actor",
			ClientError::ConnectionDisposed => "connection",
			ClientError::Internal(_) => "internal",
			ClientError::ResponseIdMismatch { .. } => "internal",
			ClientError::Driver(inner) => inner.group(),
		}
	}

	fn code(&self) -> &'static str {
		match self {
			ClientError::ActorNotFound => "not_found",
			ClientError::InvalidRequest(_) => "invalid_request",
			ClientError::WebSocketsNotEnabled => "websockets_not_enabled",
			ClientError::Actor(_) => "actor_error",
			ClientError::Scheduling { .. } => "scheduling_error",
			ClientError::ConnectionDisposed => "disposed",
			ClientError::Internal(_) => "internal_error",
			ClientError::ResponseIdMismatch { .. } => "response_id_mismatch",
			ClientError::Driver(inner) => inner.code(),
		}
	}

	fn metadata(&self) -> Option<serde_json::Value> {
		match self {
			ClientError::Actor(shape) => shape.metadata.clone(),
			ClientError::Scheduling { error, .. } => {
				error.as_ref().and_then(|e| serde_json::to_value(e).ok())
			}
			_ => None,
		}
	}

	fn to_shape(&self) -> ErrorShape {
		match self {
			ClientError::Actor(shape) => shape.clone(),
			ClientError::Scheduling { actor_id, error } => ErrorShape::new(
				"actor",
				"scheduling_error",
				format!("actor {actor_id} is not schedulable"),
			)
			.with_metadata(serde_json::json!({ "actor_id": actor_id.as_str(), "error": error })),
			_ => ErrorShape::new(self.group(), self.code(), self.message()),
		}
	}
}

impl ClientError {
	pub fn from_shape(shape: ErrorShape) -> Self {
		ClientError::Actor(shape)
	}
}
