use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Workflow worker and engine defaults (§4.9/§4.10). Per-call overrides (e.g. `step`'s own
/// `maxRetries`) always win over these; these are only the fallbacks.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
	/// How often the worker polls storage for runnable workflows absent a wake-up bump.
	pub tick_interval_ms: Option<u64>,
	/// Default loop commit cadence (`commitInterval`).
	pub commit_interval: Option<u32>,
	/// Default loop GC cadence (`historyEvery`).
	pub history_every: Option<u32>,
	/// Default trailing iterations retained by loop GC (`historyKeep`).
	pub history_keep: Option<u32>,
	/// Default `step` retry ceiling.
	pub max_retries: Option<u32>,
	/// Default `step` retry backoff base.
	pub retry_backoff_base_ms: Option<u64>,
	/// Default `step` retry backoff ceiling.
	pub retry_backoff_max_ms: Option<u64>,
	/// Default `step` execution timeout.
	pub step_timeout_ms: Option<u64>,
	/// Interval between retries of a workflow completion/failure write against storage.
	pub db_action_retry_ms: Option<u64>,
	/// Max number of retries of a workflow completion/failure write before giving up.
	pub max_db_action_retries: Option<u32>,
}

impl Workflow {
	pub fn tick_interval_ms(&self) -> u64 {
		self.tick_interval_ms
			.unwrap_or(crate::defaults::workflow::TICK_INTERVAL_MS)
	}

	pub fn commit_interval(&self) -> u32 {
		self.commit_interval
			.unwrap_or(crate::defaults::workflow::COMMIT_INTERVAL)
	}

	pub fn history_every(&self) -> u32 {
		self.history_every
			.unwrap_or(crate::defaults::workflow::HISTORY_EVERY)
	}

	pub fn history_keep(&self) -> u32 {
		self.history_keep
			.unwrap_or(crate::defaults::workflow::HISTORY_KEEP)
	}

	pub fn max_retries(&self) -> u32 {
		self.max_retries
			.unwrap_or(crate::defaults::workflow::MAX_RETRIES)
	}

	pub fn retry_backoff_base_ms(&self) -> u64 {
		self.retry_backoff_base_ms
			.unwrap_or(crate::defaults::workflow::RETRY_BACKOFF_BASE_MS)
	}

	pub fn retry_backoff_max_ms(&self) -> u64 {
		self.retry_backoff_max_ms
			.unwrap_or(crate::defaults::workflow::RETRY_BACKOFF_MAX_MS)
	}

	pub fn step_timeout_ms(&self) -> u64 {
		self.step_timeout_ms
			.unwrap_or(crate::defaults::workflow::STEP_TIMEOUT_MS)
	}

	pub fn db_action_retry_ms(&self) -> u64 {
		self.db_action_retry_ms
			.unwrap_or(crate::defaults::workflow::DB_ACTION_RETRY_MS)
	}

	pub fn max_db_action_retries(&self) -> u32 {
		self.max_db_action_retries
			.unwrap_or(crate::defaults::workflow::MAX_DB_ACTION_RETRIES)
	}
}
