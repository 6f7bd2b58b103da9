//! Bare numeric/time constants referenced by more than one config section's accessor methods,
//! collected here the way `gasoline`/`guard` keep their defaults in one module rather than
//! scattering magic numbers across accessors.

pub mod gateway {
	pub const BASE_PATH: &str = "";
	pub const ROUTE_CACHE_TTL_MS: u64 = 10 * 60 * 1000;
	pub const WEBSOCKET_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;
}

pub mod client {
	pub const RECONNECT_BACKOFF_BASE_MS: u64 = 250;
	pub const RECONNECT_BACKOFF_MAX_MS: u64 = 30_000;
	pub const KEEPALIVE_INTERVAL_MS: u64 = 30_000;
	pub const ACTION_TIMEOUT_MS: u64 = 30_000;
}

pub mod workflow {
	pub const TICK_INTERVAL_MS: u64 = 1_000;
	pub const COMMIT_INTERVAL: u32 = 20;
	pub const HISTORY_EVERY: u32 = 20;
	pub const HISTORY_KEEP: u32 = 2;
	pub const MAX_RETRIES: u32 = 3;
	pub const RETRY_BACKOFF_BASE_MS: u64 = 1_000;
	pub const RETRY_BACKOFF_MAX_MS: u64 = 60_000;
	pub const STEP_TIMEOUT_MS: u64 = 30_000;
	pub const DB_ACTION_RETRY_MS: u64 = 150;
	pub const MAX_DB_ACTION_RETRIES: u32 = 5;
}
