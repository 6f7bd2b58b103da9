use rivetkit_protocol::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
	#[error("x-rivet-target asserted actor routing but x-rivet-actor was missing")]
	MissingActorHeader,
	#[error("this driver does not support websocket upgrades")]
	WebSocketsNotEnabled,
	#[error(transparent)]
	Driver(#[from] rivetkit_driver::DriverError),
}

impl ApiError for GatewayError {
	fn group(&self) -> &'static str {
		match self {
			GatewayError::MissingActorHeader => "gateway",
			GatewayError::WebSocketsNotEnabled => "connection",
			GatewayError::Driver(inner) => inner.group(),
		}
	}

	fn code(&self) -> &'static str {
		match self {
			GatewayError::MissingActorHeader => "missing_actor_header",
			GatewayError::WebSocketsNotEnabled => "websockets_not_enabled",
			GatewayError::Driver(inner) => inner.code(),
		}
	}
}
