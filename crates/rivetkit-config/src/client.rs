use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Client connection tuning (§4.7 reconnect policy, keep-alive timer).
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Client {
	/// Base delay for the reconnect exponential backoff.
	pub reconnect_backoff_base_ms: Option<u64>,
	/// Ceiling for the reconnect exponential backoff.
	pub reconnect_backoff_max_ms: Option<u64>,
	/// Interval of the no-op keep-alive timer that holds the host runtime open.
	pub keepalive_interval_ms: Option<u64>,
	/// Default timeout applied to an `action` call when the caller doesn't pass one.
	pub action_timeout_ms: Option<u64>,
}

impl Client {
	pub fn reconnect_backoff_base_ms(&self) -> u64 {
		self.reconnect_backoff_base_ms
			.unwrap_or(crate::defaults::client::RECONNECT_BACKOFF_BASE_MS)
	}

	pub fn reconnect_backoff_max_ms(&self) -> u64 {
		self.reconnect_backoff_max_ms
			.unwrap_or(crate::defaults::client::RECONNECT_BACKOFF_MAX_MS)
	}

	pub fn keepalive_interval_ms(&self) -> u64 {
		self.keepalive_interval_ms
			.unwrap_or(crate::defaults::client::KEEPALIVE_INTERVAL_MS)
	}

	pub fn action_timeout_ms(&self) -> u64 {
		self.action_timeout_ms
			.unwrap_or(crate::defaults::client::ACTION_TIMEOUT_MS)
	}
}
