//! The workflow context (C10), the operations a workflow body calls: [`WorkflowContext::step`],
//! loops, sleeps, listens, [`WorkflowContext::join`]/[`WorkflowContext::race`], rollback
//! checkpoints, and [`WorkflowContext::removed`]. Every operation is replay-safe: it consults
//! [`HistoryStore`] first and only performs real work (running a step body, waiting on a
//! message) when no entry for its deterministic [`Location`] exists yet.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::driver::MessageDriver;
use crate::error::{WorkflowError, Yield};
use crate::history::{BranchRecord, BranchStatus, EntryKind, SleepState};
use crate::location::Location;
use crate::storage::HistoryStore;

/// Forward execution runs the workflow body and its side effects normally. Rollback re-enters
/// the same workflow source to re-derive which steps completed and in what order, without
/// re-running their bodies, see [`WorkflowContext::step`] and the module-level rollback design
/// note in `DESIGN.md` (§9 open question: rollback re-walks history rather than trusting an
/// in-memory accumulator from the failed forward pass, so it survives a process restart).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Forward,
	Rollback,
}

/// `{continue(state), break(value)}` from §4.10 "Loop", named after `gasoline`'s own
/// `Loop<T>` (`gasoline::ctx::workflow::Loop`), extended with the carried-forward state type.
pub enum Loop<S, T> {
	Continue(S),
	Break(T),
}

/// The three ways a step body can fail (§4.10 "Step"). `Failed` is the ordinary retryable case;
/// `Critical`/`Rollback` abort the workflow outright without consuming a retry.
#[derive(Debug, Clone)]
pub enum StepRunError {
	Failed(String),
	Critical(String),
	Rollback(String),
}

impl std::fmt::Display for StepRunError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			StepRunError::Failed(msg) | StepRunError::Critical(msg) | StepRunError::Rollback(msg) => {
				write!(f, "{msg}")
			}
		}
	}
}

pub type RollbackFuture<'a> = Pin<Box<dyn Future<Output = Result<(), WorkflowError>> + Send + 'a>>;
pub type RollbackFn = Box<dyn for<'a> FnOnce(&'a mut WorkflowContext, Value) -> RollbackFuture<'a> + Send>;

/// `step`'s arguments (§4.10 "Step"). Built with the chained-setter pattern the rest of the
/// workspace uses for optional config (e.g. `rivetkit_gateway::GatewayService::new` callers,
/// `rivetkit_config`'s accessor structs) rather than named/default parameters, which Rust lacks.
pub struct Step<F> {
	pub name: String,
	pub run: F,
	max_retries: Option<u32>,
	retry_backoff_base_ms: Option<u64>,
	retry_backoff_max_ms: Option<u64>,
	timeout_ms: Option<u64>,
	ephemeral: bool,
	rollback: Option<RollbackFn>,
}

impl<F> Step<F> {
	pub fn new(name: impl Into<String>, run: F) -> Self {
		Step {
			name: name.into(),
			run,
			max_retries: None,
			retry_backoff_base_ms: None,
			retry_backoff_max_ms: None,
			timeout_ms: None,
			ephemeral: false,
			rollback: None,
		}
	}

	pub fn max_retries(mut self, n: u32) -> Self {
		self.max_retries = Some(n);
		self
	}

	pub fn retry_backoff_base_ms(mut self, n: u64) -> Self {
		self.retry_backoff_base_ms = Some(n);
		self
	}

	pub fn retry_backoff_max_ms(mut self, n: u64) -> Self {
		self.retry_backoff_max_ms = Some(n);
		self
	}

	pub fn timeout_ms(mut self, n: u64) -> Self {
		self.timeout_ms = Some(n);
		self
	}

	pub fn ephemeral(mut self, flag: bool) -> Self {
		self.ephemeral = flag;
		self
	}

	pub fn rollback(mut self, f: RollbackFn) -> Self {
		self.rollback = Some(f);
		self
	}
}

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_RETRY_BACKOFF_MAX_MS: u64 = 60_000;
const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_COMMIT_INTERVAL: u32 = 20;

pub type BranchFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, WorkflowError>> + Send + 'a>>;
pub type BranchFn = Box<dyn for<'a> FnOnce(&'a mut WorkflowContext) -> BranchFuture<'a> + Send>;

/// A race branch's own child context is owned by its future (not borrowed), so unlike
/// [`BranchFuture`] this one needs no lifetime parameter, it can be polled from inside a
/// `Vec` that outlives any single loop iteration of [`WorkflowContext::race`].
type BranchRaceFuture = Pin<Box<dyn Future<Output = (Result<Value, WorkflowError>, Result<(), WorkflowError>)> + Send>>;

/// One rollback handler queued for later invocation, in the order its step completed. Drained in
/// reverse by the engine once a rollback-mode re-walk of the workflow finishes (or short-circuits
/// with [`WorkflowError::RollbackStop`]).
pub struct RollbackAction {
	pub name: String,
	pub entry_id: u64,
	pub output: Value,
	pub handler: RollbackFn,
}

/// A workflow context (C10). Cheap to construct fresh per branch: [`WorkflowContext::child`]
/// shares `store`/`message_driver`/`rollback_actions`/`abort` via `Arc` but gives the branch its
/// own `location` and re-entrancy flag, matching §4.10 "Branches created for `loop`, `join`,
/// `race` receive a fresh child context whose `location` extends the parent's."
pub struct WorkflowContext {
	workflow_id: String,
	store: Arc<AsyncMutex<HistoryStore>>,
	message_driver: Arc<dyn MessageDriver>,
	location: Location,
	abort: CancellationToken,
	mode: Mode,
	rollback_actions: Option<Arc<AsyncMutex<Vec<RollbackAction>>>>,
	checkpoint_in_scope: bool,
	entry_in_progress: bool,
	version: u32,
	version_checks_seen: u32,
}

impl WorkflowContext {
	pub fn new(
		workflow_id: String,
		store: Arc<AsyncMutex<HistoryStore>>,
		message_driver: Arc<dyn MessageDriver>,
		abort: CancellationToken,
		mode: Mode,
	) -> Self {
		WorkflowContext {
			workflow_id,
			store,
			message_driver,
			location: Location::root(),
			abort,
			rollback_actions: match mode {
				Mode::Rollback => Some(Arc::new(AsyncMutex::new(Vec::new()))),
				Mode::Forward => None,
			},
			mode,
			checkpoint_in_scope: false,
			entry_in_progress: false,
			version: 1,
			version_checks_seen: 0,
		}
	}

	/// Sets the context's current source version, used by [`WorkflowContext::check_version`].
	/// Mirrors `gasoline::ctx::workflow::WorkflowCtx.version`, which defaults to 1 and is bumped
	/// by calling code that has evolved a workflow body across deploys.
	pub fn with_version(mut self, version: u32) -> Self {
		self.version = version;
		self
	}

	pub fn workflow_id(&self) -> &str {
		&self.workflow_id
	}

	/// Whether this execution has established a rollback checkpoint yet (§4.10
	/// "rollbackCheckpoint"). The engine consults this after a fatal forward-mode error to
	/// decide whether a rollback pass is warranted at all.
	pub fn has_rollback_checkpoint(&self) -> bool {
		self.checkpoint_in_scope
	}

	pub fn location(&self) -> &Location {
		&self.location
	}

	pub fn mode(&self) -> Mode {
		self.mode
	}

	pub fn abort_signal(&self) -> &CancellationToken {
		&self.abort
	}

	pub(crate) fn rollback_actions(&self) -> Option<Arc<AsyncMutex<Vec<RollbackAction>>>> {
		self.rollback_actions.clone()
	}

	/// Divergence check for the scope this context represents (§4.10 "Divergence detection"):
	/// every history entry recorded directly or nested under this context's location must have
	/// been visited this run.
	pub async fn assert_scope_complete(&self) -> Result<(), WorkflowError> {
		self.store.lock().await.assert_scope_complete(&self.location)
	}

	fn child_at(&self, location: Location) -> WorkflowContext {
		WorkflowContext {
			workflow_id: self.workflow_id.clone(),
			store: self.store.clone(),
			message_driver: self.message_driver.clone(),
			location,
			abort: self.abort.clone(),
			mode: self.mode,
			rollback_actions: self.rollback_actions.clone(),
			checkpoint_in_scope: self.checkpoint_in_scope,
			entry_in_progress: false,
			version: self.version,
			version_checks_seen: 0,
		}
	}

	fn enter(&mut self) -> Result<(), WorkflowError> {
		if self.entry_in_progress {
			return Err(WorkflowError::EntryInProgress(self.location.clone()));
		}
		self.entry_in_progress = true;
		Ok(())
	}

	fn exit(&mut self) {
		self.entry_in_progress = false;
	}

	fn check_abort(&self) -> Result<(), WorkflowError> {
		if self.abort.is_cancelled() {
			Err(WorkflowError::Evicted)
		} else {
			Ok(())
		}
	}

	fn now_ts_sync(store: &HistoryStore) -> i64 {
		store.now_ts()
	}

	/// `step` (§4.10 "Step"). The run body only ever executes once per call to `step`, retries
	/// happen across separate replays of the workflow, gated by the backoff check below, not by
	/// looping inside this call.
	pub async fn step<T, F, Fut>(&mut self, args: Step<F>) -> Result<T, WorkflowError>
	where
		T: Serialize + DeserializeOwned,
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, StepRunError>>,
	{
		self.check_abort()?;
		self.enter()?;
		let result = self.step_inner(args).await;
		self.exit();
		result
	}

	async fn step_inner<T, F, Fut>(&mut self, args: Step<F>) -> Result<T, WorkflowError>
	where
		T: Serialize + DeserializeOwned,
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, StepRunError>>,
	{
		let Step {
			name,
			run,
			max_retries,
			retry_backoff_base_ms,
			retry_backoff_max_ms,
			timeout_ms,
			ephemeral,
			rollback,
		} = args;

		let location = self.location.extend_name(&name);
		{
			let mut store = self.store.lock().await;
			if store.get(&location).is_some() {
				return Err(WorkflowError::DuplicateName(name));
			}
		}

		if self.mode == Mode::Rollback {
			return self.step_rollback_replay(&location, &name, rollback).await;
		}

		if rollback.is_some() && !self.checkpoint_in_scope {
			return Err(WorkflowError::RollbackCheckpointMissing(name));
		}

		let max_retries = max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
		let backoff_base = retry_backoff_base_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_BASE_MS);
		let backoff_max = retry_backoff_max_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MAX_MS);
		let timeout_ms = timeout_ms.unwrap_or(DEFAULT_STEP_TIMEOUT_MS);

		let mut store = self.store.lock().await;
		store.mark_visited(&location);

		let (entry_id, already_have_output) = match store.get(&location) {
			Some(entry) => {
				let EntryKind::Step { output, .. } = &entry.kind else {
					return Err(WorkflowError::HistoryDivergence {
						location: location.clone(),
						reason: format!("expected a step entry at {location}, found {}", entry.kind.kind_name()),
					});
				};
				(entry.id, output.clone())
			}
			None => {
				let id = store.insert(&location, EntryKind::Step { output: None, error: None });
				(id, None)
			}
		};

		if let Some(output) = already_have_output {
			drop(store);
			return serde_json::from_value(output)
				.map_err(|err| WorkflowError::Storage(err.to_string()));
		}

		let metadata = store.metadata_for(entry_id);
		if metadata.attempts > max_retries {
			drop(store);
			return Err(WorkflowError::StepExhausted {
				name,
				attempts: metadata.attempts,
			});
		}

		if let Some(last_attempt_at) = metadata.last_attempt_at {
			let exponent = metadata.attempts.saturating_sub(1).min(20);
			let backoff = backoff_base.saturating_mul(1u64 << exponent);
			let wait = backoff.min(backoff_max);
			let next_attempt_at = last_attempt_at + wait as i64;
			let now = store.now_ts();
			if now < next_attempt_at {
				drop(store);
				return Err(WorkflowError::Yield(Yield::Sleep {
					deadline_ts: next_attempt_at,
					names: Vec::new(),
				}));
			}
		}

		let now = store.now_ts();
		store.update_metadata(entry_id, |meta| {
			meta.status = BranchStatus::Running;
			meta.attempts += 1;
			meta.last_attempt_at = Some(now);
		});
		let attempts = store.metadata_for(entry_id).attempts;
		drop(store);

		let run_result = tokio::time::timeout(Duration::from_millis(timeout_ms), run()).await;

		let mut store = self.store.lock().await;
		match run_result {
			Err(_elapsed) => {
				store.update_kind(
					&location,
					EntryKind::Step {
						output: None,
						error: Some("timed out".to_string()),
					},
				);
				store.update_metadata(entry_id, |meta| {
					meta.status = BranchStatus::Failed;
					meta.error = Some("timed out".to_string());
				});
				store.flush().await?;
				Err(WorkflowError::StepTimeout { name })
			}
			Ok(Ok(value)) => {
				let output_value =
					serde_json::to_value(&value).map_err(|err| WorkflowError::Storage(err.to_string()))?;
				store.update_kind(
					&location,
					EntryKind::Step {
						output: Some(output_value.clone()),
						error: None,
					},
				);
				store.update_metadata(entry_id, |meta| {
					meta.status = BranchStatus::Completed;
					meta.completed_at = Some(Self::now_ts_sync(&store));
				});
				if !ephemeral {
					store.flush().await?;
				}
				Ok(value)
			}
			Ok(Err(StepRunError::Critical(msg))) => {
				store.update_metadata(entry_id, |meta| {
					meta.status = BranchStatus::Failed;
					meta.error = Some(msg.clone());
				});
				store.flush().await?;
				Err(WorkflowError::Critical(msg))
			}
			Ok(Err(StepRunError::Rollback(msg))) => {
				store.update_metadata(entry_id, |meta| {
					meta.status = BranchStatus::Failed;
					meta.error = Some(msg.clone());
				});
				store.flush().await?;
				Err(WorkflowError::Rollback(msg))
			}
			Ok(Err(StepRunError::Failed(msg))) => {
				store.update_kind(
					&location,
					EntryKind::Step {
						output: None,
						error: Some(msg.clone()),
					},
				);
				store.update_metadata(entry_id, |meta| {
					meta.status = BranchStatus::Failed;
					meta.error = Some(msg.clone());
				});
				store.flush().await?;
				Err(WorkflowError::StepFailed {
					name,
					cause: msg,
					attempts,
				})
			}
		}
	}

	/// Rollback-mode replay of a `step` call site: never re-runs the body, only reads the
	/// forward entry back and (if this site declared a `rollback` handler not yet completed)
	/// queues it onto the shared accumulator. A missing forward entry short-circuits the whole
	/// rollback re-walk with [`WorkflowError::RollbackStop`] rather than erroring (§9 open
	/// question).
	async fn step_rollback_replay<T>(
		&mut self,
		location: &Location,
		name: &str,
		rollback: Option<RollbackFn>,
	) -> Result<T, WorkflowError>
	where
		T: DeserializeOwned,
	{
		let mut store = self.store.lock().await;
		store.mark_visited(location);
		let Some(entry) = store.get(location).cloned() else {
			return Err(WorkflowError::RollbackStop(name.to_string()));
		};
		let EntryKind::Step { output: Some(output), .. } = entry.kind else {
			return Err(WorkflowError::RollbackStop(name.to_string()));
		};
		let metadata = store.metadata_for(entry.id);
		drop(store);

		if let (Some(handler), None) = (rollback, metadata.rollback_completed_at) {
			if let Some(accumulator) = &self.rollback_actions {
				accumulator.lock().await.push(RollbackAction {
					name: name.to_string(),
					entry_id: entry.id,
					output: output.clone(),
					handler,
				});
			}
		}

		serde_json::from_value(output).map_err(|err| WorkflowError::Storage(err.to_string()))
	}

	/// `rollbackCheckpoint` (§4.10). Only steps registered after a checkpoint may declare
	/// rollback handlers.
	pub async fn rollback_checkpoint(&mut self, name: &str) -> Result<(), WorkflowError> {
		self.check_abort()?;
		self.enter()?;
		let result = self.rollback_checkpoint_inner(name).await;
		self.exit();
		result
	}

	async fn rollback_checkpoint_inner(&mut self, name: &str) -> Result<(), WorkflowError> {
		let location = self.location.extend_name(name);
		let mut store = self.store.lock().await;
		if store.get(&location).is_none() {
			store.insert(&location, EntryKind::RollbackCheckpoint);
			store.flush().await?;
		} else {
			store.mark_visited(&location);
		}
		drop(store);
		self.checkpoint_in_scope = true;
		Ok(())
	}

	/// `removed` (§4.10). Tolerates either the original entry kind (pre-removal replay) or an
	/// already-written `removed` placeholder.
	pub async fn removed(&mut self, name: &str, original_type: &str) -> Result<(), WorkflowError> {
		self.check_abort()?;
		self.enter()?;
		let location = self.location.extend_name(name);
		let mut store = self.store.lock().await;
		store.mark_visited(&location);
		if store.get(&location).is_none() {
			store.insert(
				&location,
				EntryKind::Removed {
					original_type: original_type.to_string(),
					original_name: name.to_string(),
				},
			);
			store.flush().await?;
		}
		drop(store);
		self.exit();
		Ok(())
	}

	/// `check_version` (modeled on `gasoline::ctx::workflow::WorkflowCtx::check_version`).
	/// Records (or, on replay, reads back) the version this call site ran at. A replay that would record
	/// a version lower than `latest_version` under a context whose own `version` has since been
	/// bumped is a divergence, code can only move forward across deploys, never backward.
	/// Returns the version that was actually recorded, so callers can branch on old vs. new
	/// behavior at this exact call site.
	pub async fn check_version(&mut self, latest_version: u32) -> Result<u32, WorkflowError> {
		self.check_abort()?;
		if latest_version == 0 {
			return Err(WorkflowError::Storage(
				"version for check_version must be greater than 0".to_string(),
			));
		}
		self.enter()?;
		let result = self.check_version_inner(latest_version).await;
		self.exit();
		result
	}

	async fn check_version_inner(&mut self, latest_version: u32) -> Result<u32, WorkflowError> {
		// Version checks aren't given a caller-supplied name (there's nothing meaningful to
		// call them), so they're numbered by encounter order within their scope, same as the
		// teacher numbers them by cursor position.
		let location = self
			.location
			.extend_name(format!("__version_check_{}", self.version_checks_seen));
		self.version_checks_seen += 1;

		let mut store = self.store.lock().await;
		store.mark_visited(&location);

		if let Some(entry) = store.get(&location) {
			let EntryKind::VersionCheck { version } = &entry.kind else {
				return Err(WorkflowError::HistoryDivergence {
					location: location.clone(),
					reason: format!("expected a version_check entry at {location}, found {}", entry.kind.kind_name()),
				});
			};
			let recorded = *version;
			if recorded < self.version {
				return Err(WorkflowError::HistoryDivergence {
					location,
					reason: format!(
						"recorded version v{recorded} is older than the current context version v{}",
						self.version
					),
				});
			}
			Ok(recorded)
		} else {
			store.insert(&location, EntryKind::VersionCheck { version: latest_version });
			store.flush().await?;
			Ok(latest_version)
		}
	}

	/// `sleep` (§4.10 "Sleep"). `duration_ms <= 0` completes immediately without yielding (§8
	/// "`sleep(name, 0)` writes a sleep entry with state `completed` and returns without
	/// yielding").
	pub async fn sleep(&mut self, name: &str, duration_ms: i64) -> Result<(), WorkflowError> {
		let now = self.store.lock().await.now_ts();
		self.sleep_until(name, now + duration_ms).await
	}

	pub async fn sleep_until(&mut self, name: &str, deadline_ts: i64) -> Result<(), WorkflowError> {
		self.check_abort()?;
		self.enter()?;
		let result = self.sleep_until_inner(name, deadline_ts).await;
		self.exit();
		result
	}

	async fn sleep_until_inner(&mut self, name: &str, deadline_ts: i64) -> Result<(), WorkflowError> {
		let location = self.location.extend_name(name);
		let mut store = self.store.lock().await;
		store.mark_visited(&location);

		let (deadline_ts, already_completed) = match store.get(&location) {
			Some(entry) => {
				let EntryKind::Sleep { deadline_ts, state } = &entry.kind else {
					return Err(WorkflowError::HistoryDivergence {
						location: location.clone(),
						reason: format!("expected a sleep entry at {location}"),
					});
				};
				(*deadline_ts, *state == SleepState::Completed)
			}
			None => {
				let now = store.now_ts();
				let state = if deadline_ts <= now {
					SleepState::Completed
				} else {
					SleepState::Pending
				};
				store.insert(&location, EntryKind::Sleep { deadline_ts, state });
				store.flush().await?;
				(deadline_ts, state == SleepState::Completed)
			}
		};

		if already_completed {
			return Ok(());
		}

		let now = store.now_ts();
		let remaining = deadline_ts - now;
		let poll_interval = store.poll_interval_ms();
		drop(store);

		if remaining <= 0 {
			self.mark_sleep_completed(&location).await?;
			return Ok(());
		}

		if remaining < poll_interval {
			tokio::select! {
				_ = tokio::time::sleep(Duration::from_millis(remaining as u64)) => {}
				_ = self.abort.cancelled() => return Err(WorkflowError::Evicted),
			}
			self.mark_sleep_completed(&location).await?;
			return Ok(());
		}

		self.store.lock().await.driver().set_alarm(&self.workflow_id, deadline_ts).await?;
		Err(WorkflowError::Yield(Yield::Sleep {
			deadline_ts,
			names: Vec::new(),
		}))
	}

	async fn mark_sleep_completed(&self, location: &Location) -> Result<(), WorkflowError> {
		let mut store = self.store.lock().await;
		if let Some(entry) = store.get(location) {
			if let EntryKind::Sleep { deadline_ts, .. } = &entry.kind {
				let deadline_ts = *deadline_ts;
				store.update_kind(
					location,
					EntryKind::Sleep {
						deadline_ts,
						state: SleepState::Completed,
					},
				);
				store.flush().await?;
			}
		}
		Ok(())
	}

	/// `listen` (§4.10 "Listen"): exactly one message from `msg_names`.
	pub async fn listen(&mut self, name: &str, msg_names: &[String]) -> Result<(String, Value), WorkflowError> {
		let mut messages = self.listen_n(name, msg_names, 1).await?;
		messages.pop().ok_or_else(|| WorkflowError::Storage("listen produced no message".into()))
	}

	/// `listenN` (§4.10 "Listen"): up to `limit` messages, recorded as a `MessageCount` entry
	/// plus indexed `Message` entries so replay can reconstruct the whole batch.
	pub async fn listen_n(
		&mut self,
		name: &str,
		msg_names: &[String],
		limit: u32,
	) -> Result<Vec<(String, Value)>, WorkflowError> {
		self.check_abort()?;
		self.enter()?;
		let result = self.listen_n_inner(name, msg_names, limit).await;
		self.exit();
		result
	}

	async fn listen_n_inner(
		&mut self,
		name: &str,
		msg_names: &[String],
		limit: u32,
	) -> Result<Vec<(String, Value)>, WorkflowError> {
		let location = self.location.extend_name(name);
		{
			let mut store = self.store.lock().await;
			store.mark_visited(&location);
			if let Some(messages) = self.replay_message_batch(&mut store, &location)? {
				return Ok(messages);
			}
		}

		loop {
			self.check_abort()?;
			let polled = self
				.message_driver
				.poll(&self.workflow_id, msg_names, limit)
				.await
				.map_err(|err| WorkflowError::MessageDriver(err.to_string()))?;
			if !polled.is_empty() {
				return self.record_message_batch(&location, polled).await;
			}
			return Err(WorkflowError::Yield(Yield::MessageWait {
				names: msg_names.to_vec(),
			}));
		}
	}

	fn replay_message_batch(
		&self,
		store: &mut HistoryStore,
		location: &Location,
	) -> Result<Option<Vec<(String, Value)>>, WorkflowError> {
		let Some(entry) = store.get(location) else {
			return Ok(None);
		};
		let EntryKind::MessageCount { count } = &entry.kind else {
			return Err(WorkflowError::HistoryDivergence {
				location: location.clone(),
				reason: format!("expected a message_count entry at {location}"),
			});
		};
		let count = *count;
		let mut out = Vec::with_capacity(count as usize);
		for i in 0..count {
			let item_location = location.extend_iteration(i);
			store.mark_visited(&item_location);
			let Some(item) = store.get(&item_location) else {
				return Err(WorkflowError::HistoryDivergence {
					location: item_location.clone(),
					reason: "missing indexed message entry during replay".to_string(),
				});
			};
			let EntryKind::Message { name, data } = &item.kind else {
				return Err(WorkflowError::HistoryDivergence {
					location: item_location.clone(),
					reason: "expected a message entry".to_string(),
				});
			};
			out.push((name.clone(), data.clone().unwrap_or(Value::Null)));
		}
		Ok(Some(out))
	}

	async fn record_message_batch(
		&self,
		location: &Location,
		messages: Vec<crate::driver::InboundMessage>,
	) -> Result<Vec<(String, Value)>, WorkflowError> {
		let mut store = self.store.lock().await;
		store.insert(
			location,
			EntryKind::MessageCount {
				count: messages.len() as u32,
			},
		);
		let mut out = Vec::with_capacity(messages.len());
		for (i, message) in messages.into_iter().enumerate() {
			let item_location = location.extend_iteration(i as u32);
			store.insert(
				&item_location,
				EntryKind::Message {
					name: message.name.clone(),
					data: Some(message.data.clone()),
				},
			);
			out.push((message.name, message.data));
			self.message_driver
				.ack(&self.workflow_id, &message.ack_token)
				.await
				.map_err(|err| WorkflowError::MessageDriver(err.to_string()))?;
		}
		store.flush().await?;
		Ok(out)
	}

	/// `listenWithTimeout`/`listenUntil` (§4.10 "Listen"): at most one message before `deadline_ts`.
	pub async fn listen_until(
		&mut self,
		name: &str,
		msg_names: &[String],
		deadline_ts: i64,
	) -> Result<Option<(String, Value)>, WorkflowError> {
		let mut messages = self.listen_n_until(name, msg_names, 1, deadline_ts).await?;
		Ok(messages.pop())
	}

	pub async fn listen_with_timeout(
		&mut self,
		name: &str,
		msg_names: &[String],
		timeout_ms: i64,
	) -> Result<Option<(String, Value)>, WorkflowError> {
		let now = self.store.lock().await.now_ts();
		self.listen_until(name, msg_names, now + timeout_ms).await
	}

	pub async fn listen_n_with_timeout(
		&mut self,
		name: &str,
		msg_names: &[String],
		limit: u32,
		timeout_ms: i64,
	) -> Result<Vec<(String, Value)>, WorkflowError> {
		let now = self.store.lock().await.now_ts();
		self.listen_n_until(name, msg_names, limit, now + timeout_ms).await
	}

	/// `listenNUntil` (§4.10 "Listen"): up to `limit` messages before `deadline_ts`. Uses a
	/// `Sleep` entry to persist the deadline for replay, flipping its state to `interrupted` the
	/// moment a message is delivered (§3 "Workflow history entry": sleep `state`).
	pub async fn listen_n_until(
		&mut self,
		name: &str,
		msg_names: &[String],
		limit: u32,
		deadline_ts: i64,
	) -> Result<Vec<(String, Value)>, WorkflowError> {
		self.check_abort()?;
		self.enter()?;
		let result = self.listen_n_until_inner(name, msg_names, limit, deadline_ts).await;
		self.exit();
		result
	}

	async fn listen_n_until_inner(
		&mut self,
		name: &str,
		msg_names: &[String],
		limit: u32,
		deadline_ts: i64,
	) -> Result<Vec<(String, Value)>, WorkflowError> {
		let sleep_location = self.location.extend_name(name);
		let messages_location = sleep_location.extend_name("messages");

		let mut store = self.store.lock().await;
		store.mark_visited(&sleep_location);

		let (deadline_ts, state) = match store.get(&sleep_location) {
			Some(entry) => {
				let EntryKind::Sleep { deadline_ts, state } = &entry.kind else {
					return Err(WorkflowError::HistoryDivergence {
						location: sleep_location.clone(),
						reason: "expected a sleep entry".to_string(),
					});
				};
				(*deadline_ts, *state)
			}
			None => {
				store.insert(
					&sleep_location,
					EntryKind::Sleep {
						deadline_ts,
						state: SleepState::Pending,
					},
				);
				store.flush().await?;
				(deadline_ts, SleepState::Pending)
			}
		};

		if state == SleepState::Interrupted {
			if let Some(messages) = self.replay_message_batch(&mut store, &messages_location)? {
				return Ok(messages);
			}
		}
		drop(store);

		loop {
			self.check_abort()?;
			let now = self.store.lock().await.now_ts();
			if now >= deadline_ts {
				self.mark_sleep_completed(&sleep_location).await?;
				return Ok(Vec::new());
			}

			let polled = self
				.message_driver
				.poll(&self.workflow_id, msg_names, limit)
				.await
				.map_err(|err| WorkflowError::MessageDriver(err.to_string()))?;
			if !polled.is_empty() {
				let messages = self.record_message_batch(&messages_location, polled).await?;
				let mut store = self.store.lock().await;
				store.update_kind(
					&sleep_location,
					EntryKind::Sleep {
						deadline_ts,
						state: SleepState::Interrupted,
					},
				);
				store.flush().await?;
				return Ok(messages);
			}

			let poll_interval = self.store.lock().await.poll_interval_ms();
			let remaining = deadline_ts - now;
			if remaining < poll_interval {
				tokio::select! {
					_ = tokio::time::sleep(Duration::from_millis(remaining.max(0) as u64)) => continue,
					_ = self.abort.cancelled() => return Err(WorkflowError::Evicted),
				}
			}

			self.store.lock().await.driver().set_alarm(&self.workflow_id, deadline_ts).await?;
			return Err(WorkflowError::Yield(Yield::Sleep {
				deadline_ts,
				names: msg_names.to_vec(),
			}));
		}
	}

	/// `loop` (§4.10 "Loop"). `cb` returns [`Loop::Continue`] with the next state or
	/// [`Loop::Break`] with the final value.
	pub async fn loop_(
		&mut self,
		name: &str,
		state: Value,
		commit_interval: Option<u32>,
		history_every: Option<u32>,
		history_keep: Option<u32>,
		mut cb: impl for<'a> FnMut(&'a mut WorkflowContext, Value) -> BranchFuture<'a> + Send,
	) -> Result<Value, WorkflowError> {
		self.check_abort()?;
		self.enter()?;
		let result = self
			.loop_inner(name, state, commit_interval, history_every, history_keep, &mut cb)
			.await;
		self.exit();
		result
	}

	async fn loop_inner(
		&mut self,
		name: &str,
		initial_state: Value,
		commit_interval: Option<u32>,
		_history_every: Option<u32>,
		history_keep: Option<u32>,
		cb: &mut (impl for<'a> FnMut(&'a mut WorkflowContext, Value) -> BranchFuture<'a> + Send),
	) -> Result<Value, WorkflowError> {
		let location = self.location.extend_name(name);
		let commit_interval = commit_interval.unwrap_or(DEFAULT_COMMIT_INTERVAL);
		let history_keep = history_keep.unwrap_or(rivetkit_config::defaults::workflow::HISTORY_KEEP);

		let mut store = self.store.lock().await;
		store.mark_visited(&location);
		let (mut state, mut iteration, output) = match store.get(&location) {
			Some(entry) => {
				let EntryKind::Loop { state, iteration, output } = entry.kind.clone() else {
					return Err(WorkflowError::HistoryDivergence {
						location: location.clone(),
						reason: "expected a loop entry".to_string(),
					});
				};
				(state, iteration, output)
			}
			None => {
				store.insert(
					&location,
					EntryKind::Loop {
						state: initial_state.clone(),
						iteration: 0,
						output: None,
					},
				);
				store.flush().await?;
				(initial_state, 0, None)
			}
		};
		drop(store);

		if let Some(output) = output {
			return Ok(output);
		}

		loop {
			self.check_abort()?;
			let iteration_location = location.extend_iteration(iteration);
			let mut child = self.child_at(iteration_location);

			let result = cb(&mut child, state.clone()).await?;
			child.assert_scope_complete().await?;

			let mut store = self.store.lock().await;
			match serde_json::from_value::<LoopStep>(result)? {
				LoopStep::Continue(next_state) => {
					state = next_state;
					iteration += 1;
					if iteration % commit_interval == 0 {
						store.update_kind(
							&location,
							EntryKind::Loop {
								state: state.clone(),
								iteration,
								output: None,
							},
						);
						store.flush().await?;
						store.forget_old_iterations(&location, iteration, history_keep).await?;
					}
				}
				LoopStep::Break(value) => {
					store.update_kind(
						&location,
						EntryKind::Loop {
							state,
							iteration: iteration + 1,
							output: Some(value.clone()),
						},
					);
					store.flush().await?;
					store.forget_old_iterations(&location, iteration + 1, history_keep).await?;
					return Ok(value);
				}
			}
		}
	}

	/// `join` (§4.10 "Join"): run every branch concurrently to settlement; all branches persist
	/// their status regardless of outcome (no short-circuit) so a caller can see exactly which
	/// branch(es) failed.
	pub async fn join(
		&mut self,
		name: &str,
		branches: Vec<(String, BranchFn)>,
	) -> Result<HashMap<String, Value>, WorkflowError> {
		self.check_abort()?;
		self.enter()?;
		let result = self.join_inner(name, branches).await;
		self.exit();
		result
	}

	async fn join_inner(
		&mut self,
		name: &str,
		branches: Vec<(String, BranchFn)>,
	) -> Result<HashMap<String, Value>, WorkflowError> {
		let location = self.location.extend_name(name);
		{
			let mut store = self.store.lock().await;
			store.mark_visited(&location);
			if store.get(&location).is_none() {
				store.insert(&location, EntryKind::Join { branches: HashMap::new() });
				store.flush().await?;
			}
		}

		let mut completed = HashMap::new();
		let mut pending = Vec::new();
		{
			let mut store = self.store.lock().await;
			let existing = match &store.get(&location).unwrap().kind {
				EntryKind::Join { branches } => branches.clone(),
				_ => HashMap::new(),
			};
			for (branch_name, branch_fn) in branches {
				match existing.get(&branch_name) {
					Some(record) if record.status() == BranchStatus::Completed => {
						completed.insert(branch_name.clone(), record.output.clone().unwrap_or(Value::Null));
						store.mark_visited(&location.extend_name(&branch_name));
					}
					_ => pending.push((branch_name, branch_fn)),
				}
			}
		}

		let mut errors = HashMap::new();
		// Yields are control flow, not failures (§9 "Exceptions for control flow"), a branch
		// that suspends on `sleep`/`listen` must not be folded into `Join{errors}`; the whole
		// join suspends and is re-entered later, at which point the branch's own history lets
		// it resume exactly where it left off.
		let mut yields: Vec<Yield> = Vec::new();
		let futures = pending.into_iter().map(|(branch_name, branch_fn)| {
			let mut child = self.child_at(location.extend_name(&branch_name));
			async move {
				let result = branch_fn(&mut child).await;
				let scope_ok = child.assert_scope_complete().await;
				(branch_name, result, scope_ok)
			}
		});
		let results = futures_util::future::join_all(futures).await;

		let mut store = self.store.lock().await;
		for (branch_name, result, scope_ok) in results {
			if let (Err(WorkflowError::Yield(y)), Ok(())) = (&result, &scope_ok) {
				yields.push(y.clone());
				continue;
			}
			let record = match (&result, &scope_ok) {
				(Ok(value), Ok(())) => BranchRecord {
					status: Some(BranchStatus::Completed),
					output: Some(value.clone()),
					error: None,
				},
				(Ok(_), Err(err)) | (Err(err), _) => BranchRecord {
					status: Some(BranchStatus::Failed),
					output: None,
					error: Some(err.to_string()),
				},
			};
			let mut branches = match &store.get(&location).unwrap().kind {
				EntryKind::Join { branches } => branches.clone(),
				_ => HashMap::new(),
			};
			branches.insert(branch_name.clone(), record);
			store.update_kind(&location, EntryKind::Join { branches });
			match (result, scope_ok) {
				(Ok(value), Ok(())) => {
					completed.insert(branch_name, value);
				}
				(Ok(_), Err(err)) | (Err(err), _) => {
					errors.insert(branch_name, err.to_string());
				}
			}
		}
		store.flush().await?;
		drop(store);

		if !errors.is_empty() {
			return Err(WorkflowError::Join {
				name: name.to_string(),
				errors,
			});
		}
		if let Some(merged) = yields.into_iter().reduce(Yield::merge) {
			return Err(WorkflowError::Yield(merged));
		}
		Ok(completed)
	}

	/// `race` (§4.10 "Race"): the first branch to succeed wins; the rest are cancelled and their
	/// history is deleted. Late failures from losing branches are logged only (§9 open
	/// question).
	pub async fn race(
		&mut self,
		name: &str,
		branches: Vec<(String, BranchFn)>,
	) -> Result<(String, Value), WorkflowError> {
		self.check_abort()?;
		self.enter()?;
		let result = self.race_inner(name, branches).await;
		self.exit();
		result
	}

	async fn race_inner(
		&mut self,
		name: &str,
		branches: Vec<(String, BranchFn)>,
	) -> Result<(String, Value), WorkflowError> {
		let location = self.location.extend_name(name);
		{
			let mut store = self.store.lock().await;
			store.mark_visited(&location);
			if let Some(entry) = store.get(&location) {
				if let EntryKind::Race { winner: Some(winner), branches } = &entry.kind {
					let value = branches
						.get(winner)
						.and_then(|record| record.output.clone())
						.unwrap_or(Value::Null);
					return Ok((winner.clone(), value));
				}
			} else {
				store.insert(
					&location,
					EntryKind::Race {
						winner: None,
						branches: HashMap::new(),
					},
				);
				store.flush().await?;
			}
		}

		// `select_all` resolves as soon as any one branch completes; the still-pending futures
		// in its returned remainder are simply dropped afterwards rather than polled again,
		// which abandons the losing branches without waiting for them to finish (a true race,
		// not a join-then-pick-first).
		let mut names: Vec<String> = Vec::with_capacity(branches.len());
		let mut futures: Vec<BranchRaceFuture> = Vec::with_capacity(branches.len());
		for (branch_name, branch_fn) in branches {
			let mut child = self.child_at(location.extend_name(&branch_name));
			names.push(branch_name);
			futures.push(Box::pin(async move {
				let result = branch_fn(&mut child).await;
				let scope_ok = child.assert_scope_complete().await;
				(result, scope_ok)
			}));
		}

		let mut winner: Option<(String, Value)> = None;
		let mut losers = Vec::new();
		let mut errors = HashMap::new();
		// A branch that suspends on `sleep`/`listen` is neither a winner nor a loser (§4.10
		// "Race": "the engine chooses the earliest Sleep deadline... and re-raises to the
		// scheduler so the whole race resumes later"), it's tracked separately and only
		// resolved into a loser if some other branch goes on to actually win.
		let mut yielded: Vec<(String, Yield)> = Vec::new();
		while !futures.is_empty() {
			let ((result, scope_ok), index, remaining_futures) =
				futures_util::future::select_all(futures).await;
			let branch_name = names.remove(index);
			futures = remaining_futures;
			match (result, scope_ok) {
				(Ok(value), Ok(())) => {
					winner = Some((branch_name, value));
					break;
				}
				(Err(WorkflowError::Yield(y)), Ok(())) => {
					yielded.push((branch_name, y));
				}
				(Ok(_), Err(err)) | (Err(err), _) => {
					errors.insert(branch_name.clone(), err.to_string());
					losers.push(branch_name);
				}
			}
		}
		// Every branch still in `names`/`futures` never got polled to completion; treat it as a
		// loser too so its partial history is cleaned up below.
		losers.extend(names);
		drop(futures);

		let Some((winner_name, winner_value)) = winner else {
			if let Some(merged) = yielded.into_iter().map(|(_, y)| y).reduce(Yield::merge) {
				return Err(WorkflowError::Yield(merged));
			}
			return Err(WorkflowError::Race {
				name: name.to_string(),
				errors,
			});
		};
		// A winner emerged after all: branches still pending a sleep/message never get to
		// finish waiting, so their partial history is cleaned up the same as any other loser.
		losers.extend(yielded.into_iter().map(|(branch_name, _)| branch_name));

		let mut store = self.store.lock().await;
		let mut branch_records = HashMap::new();
		branch_records.insert(
			winner_name.clone(),
			BranchRecord {
				status: Some(BranchStatus::Completed),
				output: Some(winner_value.clone()),
				error: None,
			},
		);
		store.update_kind(
			&location,
			EntryKind::Race {
				winner: Some(winner_name.clone()),
				branches: branch_records,
			},
		);
		store.flush().await?;
		for loser in &losers {
			store.delete_branch(&location.extend_name(loser)).await?;
		}
		drop(store);

		Ok((winner_name, winner_value))
	}
}

#[derive(Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
enum LoopStep {
	Continue(Value),
	Break(Value),
}

impl<S: Serialize, T: Serialize> From<Loop<S, T>> for Value {
	fn from(value: Loop<S, T>) -> Self {
		let step = match value {
			Loop::Continue(state) => LoopStep::Continue(serde_json::to_value(state).unwrap_or(Value::Null)),
			Loop::Break(output) => LoopStep::Break(serde_json::to_value(output).unwrap_or(Value::Null)),
		};
		serde_json::to_value(step).unwrap_or(Value::Null)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::driver::{FlushBatch, InboundMessage, MessageDriver, WorkflowDriver};
	use crate::history::{EntryMetadata, HistoryEntry};
	use async_trait::async_trait;
	use std::collections::HashMap as StdHashMap;
	use std::sync::Mutex as StdMutex;

	#[derive(Default)]
	struct MemoryDriver {
		entries: StdMutex<StdHashMap<String, (HistoryEntry, EntryMetadata)>>,
	}

	#[async_trait]
	impl WorkflowDriver for MemoryDriver {
		async fn load_history(&self, _workflow_id: &str) -> Result<Vec<(HistoryEntry, EntryMetadata)>, WorkflowError> {
			Ok(self.entries.lock().unwrap().values().cloned().collect())
		}

		async fn flush(&self, _workflow_id: &str, batch: FlushBatch) -> Result<(), WorkflowError> {
			let mut entries = self.entries.lock().unwrap();
			for entry in batch.entries {
				let meta = entries.get(&entry.location_key).map(|(_, m)| m.clone()).unwrap_or_default();
				entries.insert(entry.location_key.clone(), (entry, meta));
			}
			Ok(())
		}

		async fn delete_prefix(&self, _workflow_id: &str, prefix: &str) -> Result<(), WorkflowError> {
			self.entries.lock().unwrap().retain(|key, _| !key.starts_with(prefix));
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

	async fn fresh_ctx(driver: Arc<dyn WorkflowDriver>, version: u32) -> WorkflowContext {
		let store = Arc::new(AsyncMutex::new(HistoryStore::load("wf".to_string(), driver).await.unwrap()));
		WorkflowContext::new("wf".to_string(), store, Arc::new(NoMessages), CancellationToken::new(), Mode::Forward)
			.with_version(version)
	}

	#[tokio::test]
	async fn check_version_records_latest_on_first_encounter() {
		let driver = Arc::new(MemoryDriver::default()) as Arc<dyn WorkflowDriver>;
		let mut ctx = fresh_ctx(driver, 1).await;
		let version = ctx.check_version(3).await.unwrap();
		assert_eq!(version, 3);
	}

	#[tokio::test]
	async fn check_version_replays_the_recorded_version_not_latest() {
		let driver = Arc::new(MemoryDriver::default()) as Arc<dyn WorkflowDriver>;
		{
			let mut ctx = fresh_ctx(driver.clone(), 1).await;
			ctx.check_version(3).await.unwrap();
		}
		// A later deploy bumps the call site to "latest_version: 5", but replay must still see
		// the v3 this execution actually ran at.
		let mut ctx = fresh_ctx(driver, 1).await;
		let version = ctx.check_version(5).await.unwrap();
		assert_eq!(version, 3);
	}

	#[tokio::test]
	async fn check_version_rejects_a_context_version_newer_than_history() {
		let driver = Arc::new(MemoryDriver::default()) as Arc<dyn WorkflowDriver>;
		{
			let mut ctx = fresh_ctx(driver.clone(), 1).await;
			ctx.check_version(2).await.unwrap();
		}
		let mut ctx = fresh_ctx(driver, 9).await;
		let err = ctx.check_version(2).await.unwrap_err();
		assert!(matches!(err, WorkflowError::HistoryDivergence { .. }));
	}

	#[tokio::test]
	async fn has_rollback_checkpoint_reflects_checkpoint_calls() {
		let driver = Arc::new(MemoryDriver::default()) as Arc<dyn WorkflowDriver>;
		let mut ctx = fresh_ctx(driver, 1).await;
		assert!(!ctx.has_rollback_checkpoint());
		ctx.rollback_checkpoint("cp").await.unwrap();
		assert!(ctx.has_rollback_checkpoint());
	}
}

