//! The scheduler that actually runs workflows concurrently (§5 "[ADDED] The workflow engine runs
//! on a `Worker` that polls storage on a fixed interval (`tick`)... spawning one Tokio task per
//! runnable workflow and tracking it in a `running_workflows` map"). [`crate::execute_workflow`]
//! itself only knows how to run one workflow to completion/suspension/failure once; this module
//! is what repeatedly calls it for every workflow currently due to run.
//!
//! Modeled on `gasoline::worker::Worker::tick`/`Worker::start`: pull due workflows filtered by a
//! registered-name set, skip any still running from a prior tick, spawn the rest, and retire
//! finished handles on the next tick. This is considerably smaller than its model, no bg GC/ping
//! tasks, no cache layer, no opentelemetry span propagation, because those concerns don't have a
//! counterpart in this spec.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::WorkflowContext;
use crate::driver::{MessageDriver, WorkflowDriver};
use crate::engine::{execute_workflow, WorkflowOutcome};
use crate::error::WorkflowError;
use crate::metrics;

/// A registered workflow body, type-erased to a JSON output so a [`Registry`] can hold many
/// differently-typed workflows in one map (matching `gasoline::registry::RegistryHandle`, which
/// erases the same way at the workflow-name boundary).
pub type WorkflowFn = Arc<
	dyn Fn(&mut WorkflowContext) -> Pin<Box<dyn Future<Output = Result<Value, WorkflowError>> + Send>>
		+ Send
		+ Sync,
>;

/// Maps a workflow's registered name (§3 "Actor identity" names, but for workflows, a closed
/// set chosen at build time) to the body the worker runs when a due workflow of that name is
/// pulled.
#[derive(Clone, Default)]
pub struct Registry {
	workflows: HashMap<String, WorkflowFn>,
}

impl Registry {
	pub fn new() -> Self {
		Registry {
			workflows: HashMap::new(),
		}
	}

	pub fn register(&mut self, name: impl Into<String>, workflow_fn: WorkflowFn) {
		self.workflows.insert(name.into(), workflow_fn);
	}

	fn names(&self) -> Vec<&str> {
		self.workflows.keys().map(|s| s.as_str()).collect()
	}
}

struct RunningWorkflow {
	name: String,
	stop: CancellationToken,
	handle: JoinHandle<()>,
}

/// Polls [`WorkflowDriver::pull_workflows`] on an interval, running each due workflow to
/// completion/suspension/failure on its own Tokio task (§5 "each workflow is pinned to one
/// logical thread while it executes").
pub struct Worker {
	registry: Registry,
	driver: Arc<dyn WorkflowDriver>,
	message_driver: Arc<dyn MessageDriver>,
	tick_interval: Duration,
	running_workflows: HashMap<String, RunningWorkflow>,
}

impl Worker {
	pub fn new(
		registry: Registry,
		driver: Arc<dyn WorkflowDriver>,
		message_driver: Arc<dyn MessageDriver>,
		tick_interval: Duration,
	) -> Self {
		Worker {
			registry,
			driver,
			message_driver,
			tick_interval,
			running_workflows: HashMap::new(),
		}
	}

	/// Runs until `shutdown` is cancelled, ticking on `tick_interval`. Every still-running
	/// workflow is evicted (its [`CancellationToken`] cancelled, §5 "Workflow eviction aborts
	/// the signal synchronously") before returning.
	#[tracing::instrument(skip_all)]
	pub async fn start(mut self, shutdown: CancellationToken) -> Result<(), WorkflowError> {
		let mut interval = tokio::time::interval(self.tick_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		loop {
			tokio::select! {
				_ = interval.tick() => {}
				_ = shutdown.cancelled() => break,
			}

			if let Err(err) = self.tick().await {
				metrics::WORKER_TICK_TOTAL.with_label_values(&["error"]).inc();
				tracing::error!(%err, "worker tick failed");
				continue;
			}
			metrics::WORKER_TICK_TOTAL.with_label_values(&["ok"]).inc();
		}

		self.evict_all();
		Ok(())
	}

	/// One poll-and-spawn cycle. Exposed directly (not just through [`Worker::start`]) so tests
	/// and embedders that drive their own loop can call it without the interval machinery.
	pub async fn tick(&mut self) -> Result<(), WorkflowError> {
		self.running_workflows.retain(|_, wf| !wf.handle.is_finished());

		let names = self.registry.names();
		let due = self.driver.pull_workflows(&names).await?;

		for runnable in due {
			if self.running_workflows.contains_key(&runnable.workflow_id) {
				continue;
			}
			let Some(workflow_fn) = self.registry.workflows.get(&runnable.workflow_name).cloned() else {
				tracing::error!(
					workflow_name = %runnable.workflow_name,
					"pulled a workflow with no registered runner for its name"
				);
				continue;
			};

			let stop = CancellationToken::new();
			let driver = self.driver.clone();
			let message_driver = self.message_driver.clone();
			let workflow_id = runnable.workflow_id.clone();
			let workflow_name = runnable.workflow_name.clone();
			let run_stop = stop.clone();

			let handle = tokio::spawn(async move {
				let result = execute_workflow::<Value, _, _>(
					workflow_id.clone(),
					driver,
					message_driver,
					run_stop,
					move |ctx| workflow_fn(ctx),
				)
				.await;

				match result {
					Ok(WorkflowOutcome::Completed(_)) | Ok(WorkflowOutcome::Suspended(_)) => {}
					Ok(WorkflowOutcome::Failed(err)) => {
						tracing::error!(%workflow_id, %err, "workflow failed");
					}
					Err(err) => {
						tracing::error!(%workflow_id, %err, "unhandled workflow error");
					}
				}
			});

			self.running_workflows.insert(
				runnable.workflow_id,
				RunningWorkflow {
					name: workflow_name,
					stop,
					handle,
				},
			);
		}

		metrics::WORKER_RUNNING_WORKFLOWS.reset();
		for wf in self.running_workflows.values() {
			metrics::WORKER_RUNNING_WORKFLOWS
				.with_label_values(&[wf.name.as_str()])
				.inc();
		}

		Ok(())
	}

	/// Evicts a single running workflow by id (§5 "Cancellation": eviction aborts the signal
	/// synchronously; the next suspension throws `Evicted`). A no-op if the workflow isn't
	/// currently tracked as running.
	pub fn evict(&mut self, workflow_id: &str) {
		if let Some(wf) = self.running_workflows.remove(workflow_id) {
			wf.stop.cancel();
		}
	}

	fn evict_all(&mut self) {
		for (_, wf) in self.running_workflows.drain() {
			wf.stop.cancel();
		}
	}

	pub fn running_count(&self) -> usize {
		self.running_workflows.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::driver::{FlushBatch, InboundMessage, RunnableWorkflow};
	use crate::history::{EntryMetadata, HistoryEntry};
	use async_trait::async_trait;
	use serde_json::json;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::sync::Mutex as StdMutex;

	#[derive(Default)]
	struct MemoryDriver {
		entries: StdMutex<HashMap<String, (HistoryEntry, EntryMetadata)>>,
		pulled: AtomicBool,
	}

	#[async_trait]
	impl WorkflowDriver for MemoryDriver {
		async fn load_history(
			&self,
			_workflow_id: &str,
		) -> Result<Vec<(HistoryEntry, EntryMetadata)>, WorkflowError> {
			Ok(self.entries.lock().unwrap().values().cloned().collect())
		}

		async fn flush(&self, _workflow_id: &str, batch: FlushBatch) -> Result<(), WorkflowError> {
			let mut entries = self.entries.lock().unwrap();
			for entry in batch.entries {
				let meta = entries
					.get(&entry.location_key)
					.map(|(_, m)| m.clone())
					.unwrap_or_default();
				entries.insert(entry.location_key.clone(), (entry, meta));
			}
			Ok(())
		}

		async fn delete_prefix(&self, _workflow_id: &str, _prefix: &str) -> Result<(), WorkflowError> {
			Ok(())
		}

		async fn set_alarm(&self, _workflow_id: &str, _deadline_ts: i64) -> Result<(), WorkflowError> {
			Ok(())
		}

		fn now_ts(&self) -> i64 {
			0
		}

		fn poll_interval_ms(&self) -> i64 {
			1_000
		}

		async fn pull_workflows(&self, names: &[&str]) -> Result<Vec<RunnableWorkflow>, WorkflowError> {
			// Only ever offers one workflow, once, so a test loop can assert it doesn't re-spawn.
			if self.pulled.swap(true, Ordering::SeqCst) || !names.contains(&"greet") {
				return Ok(Vec::new());
			}
			Ok(vec![RunnableWorkflow {
				workflow_id: "wf-1".to_string(),
				workflow_name: "greet".to_string(),
			}])
		}
	}

	struct NoMessages;

	#[async_trait]
	impl MessageDriver for NoMessages {
		async fn poll(
			&self,
			_workflow_id: &str,
			_names: &[String],
			_limit: u32,
		) -> Result<Vec<InboundMessage>, WorkflowError> {
			Ok(Vec::new())
		}

		async fn ack(&self, _workflow_id: &str, _ack_token: &str) -> Result<(), WorkflowError> {
			Ok(())
		}
	}

	fn greet_registry() -> Registry {
		let mut registry = Registry::new();
		registry.register(
			"greet",
			Arc::new(|ctx: &mut WorkflowContext| {
				Box::pin(async move {
					ctx.step(crate::context::Step::new("say_hi", || async {
						Ok::<Value, crate::context::StepRunError>(json!("hi"))
					}))
					.await
				}) as Pin<Box<dyn Future<Output = Result<Value, WorkflowError>> + Send>>
			}),
		);
		registry
	}

	#[tokio::test]
	async fn tick_spawns_a_due_workflow_exactly_once() {
		let driver = Arc::new(MemoryDriver::default());
		let mut worker = Worker::new(
			greet_registry(),
			driver.clone(),
			Arc::new(NoMessages),
			Duration::from_millis(10),
		);

		worker.tick().await.unwrap();
		assert_eq!(worker.running_count(), 1);

		// Give the spawned task a chance to run to completion.
		tokio::time::sleep(Duration::from_millis(20)).await;
		worker.tick().await.unwrap();
		assert_eq!(worker.running_count(), 0, "finished workflow should be retired");
	}

	#[tokio::test]
	async fn evict_cancels_a_running_workflow() {
		let driver = Arc::new(MemoryDriver::default());
		let mut worker = Worker::new(
			greet_registry(),
			driver,
			Arc::new(NoMessages),
			Duration::from_millis(10),
		);

		worker.tick().await.unwrap();
		assert_eq!(worker.running_count(), 1);
		worker.evict("wf-1");
		assert_eq!(worker.running_count(), 0);
	}
}
