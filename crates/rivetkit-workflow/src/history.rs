use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a [`EntryKind::Join`]/[`EntryKind::Race`] branch (§3 "Workflow history entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
	Pending,
	Running,
	Completed,
	Failed,
	/// Race only: a non-winning branch that was signaled to cancel.
	Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchRecord {
	pub status: Option<BranchStatus>,
	pub output: Option<Value>,
	pub error: Option<String>,
}

impl BranchRecord {
	pub fn status(&self) -> BranchStatus {
		self.status.unwrap_or(BranchStatus::Pending)
	}
}

/// State of a [`EntryKind::Sleep`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepState {
	Pending,
	Completed,
	Interrupted,
}

/// The tagged variant data carried by a history entry (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
	Step {
		output: Option<Value>,
		error: Option<String>,
	},
	Loop {
		state: Value,
		iteration: u32,
		output: Option<Value>,
	},
	Sleep {
		deadline_ts: i64,
		state: SleepState,
	},
	Message {
		name: String,
		data: Option<Value>,
	},
	/// Also used for `listenN`'s batched count/indexed-message replay (§4.10 "Listen").
	MessageCount {
		count: u32,
	},
	Join {
		branches: HashMap<String, BranchRecord>,
	},
	Race {
		winner: Option<String>,
		branches: HashMap<String, BranchRecord>,
	},
	RollbackCheckpoint,
	Removed {
		original_type: String,
		original_name: String,
	},
	/// Records the version a call site ran at (§4.10 "check_version", supplemented from the
	/// teacher's `WorkflowCtx::check_version`). Lets workflow code evolve across deploys: a
	/// later run recording a lower version than history already has is a divergence.
	VersionCheck {
		version: u32,
	},
}

impl EntryKind {
	pub fn kind_name(&self) -> &'static str {
		match self {
			EntryKind::Step { .. } => "step",
			EntryKind::Loop { .. } => "loop",
			EntryKind::Sleep { .. } => "sleep",
			EntryKind::Message { .. } => "message",
			EntryKind::MessageCount { .. } => "message_count",
			EntryKind::Join { .. } => "join",
			EntryKind::Race { .. } => "race",
			EntryKind::RollbackCheckpoint => "rollback_checkpoint",
			EntryKind::Removed { .. } => "removed",
			EntryKind::VersionCheck { .. } => "version_check",
		}
	}
}

/// A history entry keyed by `locationToKey(location)` (§3). `id` is a monotonic sequence number
/// assigned at creation, used only for tie-breaking iteration order on flush; storage keys off
/// the location key, not `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
	pub id: u64,
	pub location_key: String,
	pub kind: EntryKind,
}

/// Sidecar metadata, keyed by entry id (§3 "Workflow entry metadata").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
	pub status: BranchStatus,
	pub attempts: u32,
	pub last_attempt_at: Option<i64>,
	pub completed_at: Option<i64>,
	pub error: Option<String>,
	pub rollback_completed_at: Option<i64>,
}

impl Default for EntryMetadata {
	fn default() -> Self {
		EntryMetadata {
			status: BranchStatus::Pending,
			attempts: 0,
			last_attempt_at: None,
			completed_at: None,
			error: None,
			rollback_completed_at: None,
		}
	}
}
