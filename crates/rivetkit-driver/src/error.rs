use rivetkit_protocol::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
	#[error("actor not found")]
	ActorNotFound,
	#[error("invalid request: {0}")]
	InvalidRequest(String),
	#[error("cannot resolve a create query to an existing actor id")]
	UnresolvableCreateQuery,
	#[error("websockets are not enabled on this driver")]
	WebSocketsNotEnabled,
	#[error("driver transport error: {0}")]
	Transport(String),
	#[error("more than 32 actor ids requested in a single list call")]
	TooManyIds,
}

impl ApiError for DriverError {
	fn group(&self) -> &'static str {
		match self {
			DriverError::ActorNotFound => "actor",
			DriverError::InvalidRequest(_) | DriverError::TooManyIds => "request",
			DriverError::UnresolvableCreateQuery => "query",
			DriverError::WebSocketsNotEnabled => "connection",
			DriverError::Transport(_) => "transport",
		}
	}

	fn code(&self) -> &'static str {
		match self {
			DriverError::ActorNotFound => "not_found",
			DriverError::InvalidRequest(_) => "invalid_request",
			DriverError::TooManyIds => "too_many_ids",
			DriverError::UnresolvableCreateQuery => "unresolvable_create_query",
			DriverError::WebSocketsNotEnabled => "websockets_not_enabled",
			DriverError::Transport(_) => "transport_error",
		}
	}
}
