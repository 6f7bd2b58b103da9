use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Gateway routing and transport limits (§6.2). All fields are optional so a deploy only has to
/// override what it cares about; accessor methods supply the defaults.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Gateway {
	/// Prefix stripped from the request path before path-based routing is attempted.
	pub base_path: Option<String>,
	/// Host to bind the HTTP/WebSocket listener to.
	pub host: Option<String>,
	/// Port to bind the HTTP/WebSocket listener to.
	pub port: Option<u16>,
	/// How long a resolved route may be cached before re-resolving against the driver.
	pub route_cache_ttl_ms: Option<u64>,
	/// Max incoming WebSocket message size in bytes.
	pub websocket_max_message_size: Option<usize>,
}

impl Gateway {
	pub fn base_path(&self) -> &str {
		self.base_path
			.as_deref()
			.unwrap_or(crate::defaults::gateway::BASE_PATH)
	}

	pub fn host(&self) -> &str {
		self.host.as_deref().unwrap_or("0.0.0.0")
	}

	pub fn port(&self) -> u16 {
		self.port.unwrap_or(8080)
	}

	pub fn route_cache_ttl_ms(&self) -> u64 {
		self.route_cache_ttl_ms
			.unwrap_or(crate::defaults::gateway::ROUTE_CACHE_TTL_MS)
	}

	pub fn websocket_max_message_size(&self) -> usize {
		self.websocket_max_message_size
			.unwrap_or(crate::defaults::gateway::WEBSOCKET_MAX_MESSAGE_SIZE)
	}
}
