//! Drives a single workflow execution around [`WorkflowContext`]'s suspend/resume control flow
//! (§4 "Execution model"): load history, run the workflow body once, and turn whatever it
//! returns into a [`WorkflowOutcome`], completed, suspended pending a wake-up, or failed (after
//! attempting rollback, if the forward run ever reached a `rollbackCheckpoint`).
//!
//! Modeled on `gasoline::ctx::workflow::WorkflowCtx::run`: that function also loads history,
//! runs the registered workflow, and branches on success vs. suspend-for-retry vs. hard failure,
//! retrying its own commit write against the database a bounded number of times. This engine has
//! no database commit step of its own, durability is `HistoryStore::flush`, already retried
//! inside the store itself, so this module is considerably smaller than its model.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::context::{Mode, RollbackAction, WorkflowContext};
use crate::driver::{MessageDriver, WorkflowDriver};
use crate::error::{WorkflowError, Yield};
use crate::metrics;
use crate::storage::HistoryStore;

/// What a single call to [`execute_workflow`] produced.
#[derive(Debug)]
pub enum WorkflowOutcome<T> {
	/// The workflow function returned successfully; its output is final.
	Completed(T),
	/// The workflow yielded control, a step backoff, a sleep, or a message wait. The caller
	/// (typically [`crate::worker::Worker`], via [`crate::driver::WorkflowDriver::pull_workflows`])
	/// is responsible for calling `execute_workflow` again no earlier than `Yield::deadline_ts`,
	/// or when a matching message arrives.
	Suspended(Yield),
	/// The workflow failed fatally. If it had established a rollback checkpoint, rollback
	/// handlers have already run (in reverse) by the time this variant is returned.
	Failed(WorkflowError),
}

/// Runs `workflow_fn` once against `workflow_id`'s history, to completion, suspension, or
/// failure.
///
/// `workflow_fn` must be deterministic and side-effect-free outside of the [`WorkflowContext`]
/// operations it's given, it may run twice in one call (once forward, once in rollback mode) if
/// the forward pass fails after establishing a checkpoint (§7 "Rollback").
pub async fn execute_workflow<T, F, Fut>(
	workflow_id: impl Into<String>,
	driver: Arc<dyn WorkflowDriver>,
	message_driver: Arc<dyn MessageDriver>,
	abort: CancellationToken,
	workflow_fn: F,
) -> Result<WorkflowOutcome<T>, WorkflowError>
where
	T: Serialize + DeserializeOwned,
	F: Fn(&mut WorkflowContext) -> Fut,
	Fut: Future<Output = Result<T, WorkflowError>>,
{
	let workflow_id = workflow_id.into();
	let store = Arc::new(AsyncMutex::new(HistoryStore::load(workflow_id.clone(), driver).await?));

	let mut ctx = WorkflowContext::new(
		workflow_id.clone(),
		store.clone(),
		message_driver.clone(),
		abort.clone(),
		Mode::Forward,
	);
	let result = workflow_fn(&mut ctx).await;

	match result {
		Ok(value) => {
			ctx.assert_scope_complete().await?;
			store.lock().await.flush().await?;
			metrics::WORKFLOW_STEP_TOTAL
				.with_label_values(&[&workflow_id, "completed"])
				.inc();
			Ok(WorkflowOutcome::Completed(value))
		}
		Err(WorkflowError::Yield(yield_)) => {
			if let Some(deadline_ts) = yield_.deadline_ts() {
				store.lock().await.driver().set_alarm(&workflow_id, deadline_ts).await?;
			}
			store.lock().await.flush().await?;
			let kind = if matches!(yield_, Yield::Sleep { .. }) { "sleep" } else { "message_wait" };
			metrics::WORKFLOW_SUSPENDED.with_label_values(&[kind]).inc();
			Ok(WorkflowOutcome::Suspended(yield_))
		}
		Err(err) if err.is_fatal() && ctx.has_rollback_checkpoint() => {
			metrics::WORKFLOW_STEP_TOTAL
				.with_label_values(&[&workflow_id, "failed"])
				.inc();
			run_rollback(&workflow_id, store, message_driver, abort, &workflow_fn).await?;
			Ok(WorkflowOutcome::Failed(err))
		}
		Err(err) => {
			metrics::WORKFLOW_STEP_TOTAL
				.with_label_values(&[&workflow_id, "failed"])
				.inc();
			Ok(WorkflowOutcome::Failed(err))
		}
	}
}

/// Phase 1: re-enter `workflow_fn` in [`Mode::Rollback`]. This re-walks the same deterministic
/// call sequence as the forward pass, without re-running any step body, [`WorkflowContext::step`]
/// in rollback mode only reads back what forward execution already recorded and queues any
/// `rollback` handlers it finds not yet run. The re-walk almost always ends in
/// [`WorkflowError::RollbackStop`] the moment it reaches whichever call site the forward pass
/// never completed; that's the expected, successful end of the dry run, not an error.
///
/// Phase 2: drain the queued actions in reverse and invoke each handler in turn. A handler
/// failure aborts the remaining chain (§7: rollback handlers run in reverse; a handler's own
/// failure stops the rest).
async fn run_rollback<T, F, Fut>(
	workflow_id: &str,
	store: Arc<AsyncMutex<HistoryStore>>,
	message_driver: Arc<dyn MessageDriver>,
	abort: CancellationToken,
	workflow_fn: &F,
) -> Result<(), WorkflowError>
where
	T: Serialize + DeserializeOwned,
	F: Fn(&mut WorkflowContext) -> Fut,
	Fut: Future<Output = Result<T, WorkflowError>>,
{
	let mut rollback_ctx = WorkflowContext::new(
		workflow_id.to_string(),
		store.clone(),
		message_driver.clone(),
		abort.clone(),
		Mode::Rollback,
	);
	if let Err(err) = workflow_fn(&mut rollback_ctx).await {
		if !matches!(err, WorkflowError::RollbackStop(_)) {
			tracing::debug!(%workflow_id, %err, "rollback re-walk ended with an unexpected error, draining queued actions anyway");
		}
	}

	let Some(accumulator) = rollback_ctx.rollback_actions() else {
		return Ok(());
	};
	let actions: Vec<RollbackAction> = std::mem::take(&mut *accumulator.lock().await);

	for action in actions.into_iter().rev() {
		let mut handler_ctx = WorkflowContext::new(
			workflow_id.to_string(),
			store.clone(),
			message_driver.clone(),
			abort.clone(),
			Mode::Rollback,
		);
		let outcome = (action.handler)(&mut handler_ctx, action.output).await;
		let mut store_guard = store.lock().await;
		match outcome {
			Ok(()) => {
				let now = store_guard.now_ts();
				store_guard.update_metadata(action.entry_id, |meta| {
					meta.rollback_completed_at = Some(now);
				});
				store_guard.flush().await?;
			}
			Err(err) => {
				store_guard.flush().await?;
				tracing::warn!(%workflow_id, step = %action.name, %err, "rollback handler failed, aborting remaining chain");
				metrics::WORKFLOW_ROLLBACK_TOTAL.with_label_values(&["failed"]).inc();
				return Err(err);
			}
		}
	}
	metrics::WORKFLOW_ROLLBACK_TOTAL.with_label_values(&["completed"]).inc();
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::context::{Loop, Step};
	use crate::driver::{FlushBatch, InboundMessage};
	use crate::history::{EntryMetadata, HistoryEntry};
	use async_trait::async_trait;
	use serde_json::{json, Value};
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicI64, Ordering};
	use std::sync::Mutex as StdMutex;

	#[derive(Default)]
	struct MemoryDriver {
		entries: StdMutex<HashMap<String, (HistoryEntry, EntryMetadata)>>,
		now: AtomicI64,
		alarms: StdMutex<Vec<(String, i64)>>,
	}

	#[async_trait]
	impl WorkflowDriver for MemoryDriver {
		async fn load_history(&self, _workflow_id: &str) -> Result<Vec<(HistoryEntry, EntryMetadata)>, WorkflowError> {
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
			for (id, meta) in batch.metadata {
				if let Some((_, existing)) = entries.values_mut().find(|(e, _)| e.id == id) {
					*existing = meta;
				}
			}
			Ok(())
		}

		async fn delete_prefix(&self, _workflow_id: &str, prefix: &str) -> Result<(), WorkflowError> {
			self.entries.lock().unwrap().retain(|key, _| !key.starts_with(prefix));
			Ok(())
		}

		async fn set_alarm(&self, workflow_id: &str, deadline_ts: i64) -> Result<(), WorkflowError> {
			self.alarms.lock().unwrap().push((workflow_id.to_string(), deadline_ts));
			Ok(())
		}

		fn now_ts(&self) -> i64 {
			self.now.load(Ordering::SeqCst)
		}

		fn poll_interval_ms(&self) -> i64 {
			1_000
		}
	}

	struct NoMessages;

	#[async_trait]
	impl MessageDriver for NoMessages {
		async fn poll(&self, _workflow_id: &str, _names: &[String], _limit: u32) -> Result<Vec<InboundMessage>, WorkflowError> {
			Ok(Vec::new())
		}

		async fn ack(&self, _workflow_id: &str, _ack_token: &str) -> Result<(), WorkflowError> {
			Ok(())
		}
	}

	#[tokio::test]
	async fn completes_a_simple_workflow() {
		let driver = Arc::new(MemoryDriver::default()) as Arc<dyn WorkflowDriver>;
		let messages = Arc::new(NoMessages) as Arc<dyn MessageDriver>;

		let outcome = execute_workflow::<i64, _, _>(
			"wf-1",
			driver,
			messages,
			CancellationToken::new(),
			|ctx| {
				Box::pin(async move {
					let value = ctx
						.step(Step::new("add_one", || async { Ok::<i64, crate::context::StepRunError>(41) }))
						.await?;
					Ok(value + 1)
				})
			},
		)
		.await
		.unwrap();

		match outcome {
			WorkflowOutcome::Completed(value) => assert_eq!(value, 42),
			other => panic!("expected completion, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn rolls_back_completed_steps_in_reverse_after_a_later_critical_failure() {
		let driver = Arc::new(MemoryDriver::default()) as Arc<dyn WorkflowDriver>;
		let messages = Arc::new(NoMessages) as Arc<dyn MessageDriver>;
		let order = Arc::new(StdMutex::new(Vec::<&'static str>::new()));

		let order_a = order.clone();
		let order_b = order.clone();

		let outcome = execute_workflow::<(), _, _>(
			"wf-2",
			driver,
			messages,
			CancellationToken::new(),
			move |ctx| {
				let order_a = order_a.clone();
				let order_b = order_b.clone();
				Box::pin(async move {
					ctx.rollback_checkpoint("checkpoint").await?;

					ctx.step(
						Step::new("reserve_a", || async { Ok::<Value, crate::context::StepRunError>(json!("a")) })
							.rollback(Box::new(move |_ctx, _output| {
								Box::pin(async move {
									order_a.lock().unwrap().push("undo_a");
									Ok(())
								})
							})),
					)
					.await?;

					ctx.step(
						Step::new("reserve_b", || async { Ok::<Value, crate::context::StepRunError>(json!("b")) })
							.rollback(Box::new(move |_ctx, _output| {
								Box::pin(async move {
									order_b.lock().unwrap().push("undo_b");
									Ok(())
								})
							})),
					)
					.await?;

					ctx.step(Step::new("explode", || async {
						Err::<(), _>(crate::context::StepRunError::Critical("boom".to_string()))
					}))
					.await?;

					Ok(())
				})
			},
		)
		.await
		.unwrap();

		assert!(matches!(outcome, WorkflowOutcome::Failed(WorkflowError::Critical(_))));
		assert_eq!(*order.lock().unwrap(), vec!["undo_b", "undo_a"]);
	}

	#[tokio::test]
	async fn a_short_sleep_suspends_with_a_deadline() {
		let driver = Arc::new(MemoryDriver::default()) as Arc<dyn WorkflowDriver>;
		driver.now_ts(); // sanity: fresh driver starts at ts 0
		let messages = Arc::new(NoMessages) as Arc<dyn MessageDriver>;

		let outcome = execute_workflow::<(), _, _>(
			"wf-3",
			driver,
			messages,
			CancellationToken::new(),
			|ctx| Box::pin(async move { ctx.sleep("wait", 60_000).await }),
		)
		.await
		.unwrap();

		match outcome {
			WorkflowOutcome::Suspended(Yield::Sleep { deadline_ts, .. }) => assert_eq!(deadline_ts, 60_000),
			other => panic!("expected suspension, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn loop_breaks_with_final_value_and_garbage_collects_old_iterations() {
		let driver = Arc::new(MemoryDriver::default()) as Arc<dyn WorkflowDriver>;
		let messages = Arc::new(NoMessages) as Arc<dyn MessageDriver>;

		let outcome = execute_workflow::<i64, _, _>(
			"wf-4",
			driver,
			messages,
			CancellationToken::new(),
			|ctx| {
				Box::pin(async move {
					let result = ctx
						.loop_("count_to_three", json!(0), Some(1), None, Some(1), |_child, state| {
							Box::pin(async move {
								let n: i64 = serde_json::from_value(state)?;
								if n >= 3 {
									Ok(Loop::<i64, i64>::Break(n).into())
								} else {
									Ok(Loop::<i64, i64>::Continue(n + 1).into())
								}
							})
						})
						.await?;
					serde_json::from_value(result).map_err(WorkflowError::from)
				})
			},
		)
		.await
		.unwrap();

		match outcome {
			WorkflowOutcome::Completed(value) => assert_eq!(value, 3),
			other => panic!("expected completion, got {other:?}"),
		}
	}
}
