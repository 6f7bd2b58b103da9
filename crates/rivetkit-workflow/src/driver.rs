use async_trait::async_trait;
use serde_json::Value;

use crate::error::WorkflowError;
use crate::history::{EntryMetadata, HistoryEntry};

/// What the engine persists in one flush (§4.9 "A flush writes all dirty entries and dirty
/// metadata in a batch"). Kept as a plain struct rather than two separate calls so a driver can
/// implement it as one KV transaction.
#[derive(Debug, Clone, Default)]
pub struct FlushBatch {
	pub entries: Vec<HistoryEntry>,
	pub metadata: Vec<(u64, EntryMetadata)>,
}

/// The pluggable backend the workflow engine delegates durability and scheduling to. The
/// KV-backed SQLite VFS file format itself is out of scope (§1 "Deliberately out of scope") -
/// this trait is the narrow interface the engine actually needs from it.
#[async_trait]
pub trait WorkflowDriver: Send + Sync {
	/// Loads every history entry + its metadata recorded so far for `workflow_id`, in no
	/// particular order, the engine re-derives locations by walking the loaded entries.
	async fn load_history(
		&self,
		workflow_id: &str,
	) -> Result<Vec<(HistoryEntry, EntryMetadata)>, WorkflowError>;

	async fn flush(&self, workflow_id: &str, batch: FlushBatch) -> Result<(), WorkflowError>;

	/// Deletes every entry (and its metadata) whose location key starts with `prefix`, used by
	/// loop GC (§4.9 "forget-old-iterations") and by race's non-winning-branch cleanup.
	async fn delete_prefix(&self, workflow_id: &str, prefix: &str) -> Result<(), WorkflowError>;

	/// Schedules a wake-up alarm for `workflow_id` at `deadline_ts`, the mechanism `sleep`
	/// suspension resumes through (§4.10 "the engine sets an alarm at `deadline`").
	async fn set_alarm(&self, workflow_id: &str, deadline_ts: i64) -> Result<(), WorkflowError>;

	fn now_ts(&self) -> i64;

	/// The worker's poll cadence, `sleep`/`listenUntil` wait in-memory instead of yielding when
	/// the remaining duration is shorter than this (§4.10 "Sleep").
	fn poll_interval_ms(&self) -> i64;

	/// Returns workflows that are due to run right now, newly created, or whose `set_alarm`
	/// deadline has elapsed, or that have a matching message waiting, filtered to `names` (the
	/// set the calling [`crate::worker::Worker`] has a registered runner for). Defaulted to
	/// empty: a driver that never schedules concurrent workflows (e.g. the single-shot
	/// [`crate::execute_workflow`] caller in tests) has no use for it.
	async fn pull_workflows(&self, _names: &[&str]) -> Result<Vec<RunnableWorkflow>, WorkflowError> {
		Ok(Vec::new())
	}
}

/// One workflow the driver reports as ready to run (§5 "[ADDED] ... polls storage ... spawning
/// one Tokio task per runnable workflow").
#[derive(Debug, Clone)]
pub struct RunnableWorkflow {
	pub workflow_id: String,
	pub workflow_name: String,
}

/// One inbound message as the message driver delivers it to `listen*` operations.
#[derive(Debug, Clone)]
pub struct InboundMessage {
	pub name: String,
	pub data: Value,
	/// Opaque token passed back to [`MessageDriver::ack`]. Acking is idempotent, replay re-acks
	/// the same token without error (§4.10 "Listen": "the message driver must tolerate this").
	pub ack_token: String,
}

/// The pluggable backend for `listen`/`listenN`/`listenUntil` (§4.10 "Listen"). Messages are
/// acked only after being durably recorded in history, never before.
#[async_trait]
pub trait MessageDriver: Send + Sync {
	/// Non-blocking poll for up to `limit` currently-available messages matching `names`.
	async fn poll(
		&self,
		workflow_id: &str,
		names: &[String],
		limit: u32,
	) -> Result<Vec<InboundMessage>, WorkflowError>;

	async fn ack(&self, workflow_id: &str, ack_token: &str) -> Result<(), WorkflowError>;
}
