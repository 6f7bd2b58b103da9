//! The inspector itself (C8, §4.8): wires the narrow actor interfaces together into
//! `getState`/`setState`/`getConnections`/`getRpcs`/`getQueueSize`/`getQueueStatus`/
//! `executeAction`, plus the optional workflow history and database views and the ambient
//! `getMetrics` operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rivetkit_protocol::Payload;
use serde::{Deserialize, Serialize};

use crate::database::DatabaseDriver;
use crate::error::InspectorError;
use crate::executor::{self, SyntheticConnectionTracker};
use crate::metrics;
use crate::queue::{self, QueueStatus};
use crate::traits::{ActorExecutor, ConnectionSummary, InspectableActor, RpcSummary};
use crate::workflow_view::{WorkflowHistoryEntryView, WorkflowHistoryView};

/// `getMetrics` (§4.8 [ADDED]): observability is never excluded by a Non-goal, so this ships
/// alongside the functional operations rather than behind a feature flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
	pub queue_size: usize,
	pub connection_count: usize,
	pub action_call_counts: HashMap<String, u64>,
}

/// Backs the inspector for one live actor instance. Construction never touches the actor beyond
/// holding the `Arc`s it was handed, every operation below is a narrow, on-demand call into
/// `actor`/`executor`/the optional views.
pub struct Inspector {
	actor: Arc<dyn InspectableActor>,
	executor: Arc<dyn ActorExecutor>,
	workflow_view: Option<WorkflowHistoryView>,
	database: Option<Arc<dyn DatabaseDriver>>,
	synthetic_connections: Arc<SyntheticConnectionTracker>,
	action_call_counts: Mutex<HashMap<String, AtomicU64>>,
}

impl Inspector {
	pub fn new(actor: Arc<dyn InspectableActor>, executor: Arc<dyn ActorExecutor>) -> Self {
		Inspector {
			actor,
			executor,
			workflow_view: None,
			database: None,
			synthetic_connections: Arc::new(SyntheticConnectionTracker::default()),
			action_call_counts: Mutex::new(HashMap::new()),
		}
	}

	pub fn with_workflow_view(mut self, view: WorkflowHistoryView) -> Self {
		self.workflow_view = Some(view);
		self
	}

	pub fn with_database(mut self, driver: Arc<dyn DatabaseDriver>) -> Self {
		self.database = Some(driver);
		self
	}

	#[tracing::instrument(skip_all)]
	pub async fn get_state(&self) -> Result<Payload, InspectorError> {
		if !self.actor.state_enabled() {
			metrics::OPERATION_TOTAL.with_label_values(&["get_state", "error"]).inc();
			return Err(InspectorError::StateNotEnabled);
		}
		let result = self.actor.get_state().await;
		metrics::OPERATION_TOTAL
			.with_label_values(&["get_state", if result.is_ok() { "ok" } else { "error" }])
			.inc();
		result.map(Payload::from_cbor_bytes)
	}

	#[tracing::instrument(skip_all)]
	pub async fn set_state(&self, state: Payload) -> Result<(), InspectorError> {
		if !self.actor.state_enabled() {
			metrics::OPERATION_TOTAL.with_label_values(&["set_state", "error"]).inc();
			return Err(InspectorError::StateNotEnabled);
		}
		let bytes = state
			.to_cbor_bytes()
			.map_err(|err| InspectorError::Actor(err.to_string()))?;
		let result = self.actor.set_state(bytes).await;
		metrics::OPERATION_TOTAL
			.with_label_values(&["set_state", if result.is_ok() { "ok" } else { "error" }])
			.inc();
		result
	}

	pub fn get_connections(&self) -> Vec<ConnectionSummary> {
		self.actor.connections()
	}

	pub fn get_rpcs(&self) -> Vec<RpcSummary> {
		self.actor.rpcs()
	}

	pub fn get_queue_size(&self) -> usize {
		self.actor.queued_messages().len()
	}

	pub fn get_queue_status(&self, limit: usize) -> QueueStatus {
		queue::status(self.actor.queued_messages(), limit)
	}

	/// Runs `name(params)` through a synthetic, single-call connection (§4.8). `StateNotEnabled`
	/// does not gate this operation, only an unrecognized action name does, which the executor
	/// itself is responsible for rejecting.
	#[tracing::instrument(skip_all, fields(name))]
	pub async fn execute_action(&self, name: &str, params: Payload) -> Result<Payload, InspectorError> {
		let result = executor::execute_action(
			self.executor.as_ref(),
			&self.synthetic_connections,
			name,
			params,
		)
		.await;
		let mut counts = self.action_call_counts.lock().unwrap();
		counts
			.entry(name.to_string())
			.or_insert_with(|| AtomicU64::new(0))
			.fetch_add(1, Ordering::Relaxed);
		result
	}

	/// `None` when no workflow is attached to this actor instance, the history view is optional
	/// (§4.8).
	pub async fn get_workflow_history(
		&self,
	) -> Option<Result<Vec<WorkflowHistoryEntryView>, InspectorError>> {
		let view = self.workflow_view.as_ref()?;
		Some(view.entries().await)
	}

	pub async fn get_database(&self) -> Result<crate::database::DatabaseSchema, InspectorError> {
		let driver = self.database.as_ref().ok_or(InspectorError::DatabaseNotEnabled)?;
		driver.schema().await
	}

	pub async fn get_database_table_rows(
		&self,
		table: &str,
		limit: usize,
		offset: usize,
	) -> Result<crate::database::TableRows, InspectorError> {
		let driver = self.database.as_ref().ok_or(InspectorError::DatabaseNotEnabled)?;
		driver.table_rows(table, limit, offset).await
	}

	/// `getMetrics` (§4.8 [ADDED]): queue size, connection count, and per-action call counts
	/// accumulated across this inspector's lifetime.
	pub fn get_metrics(&self) -> MetricsSnapshot {
		let counts = self.action_call_counts.lock().unwrap();
		MetricsSnapshot {
			queue_size: self.get_queue_size(),
			connection_count: self.actor.connections().len(),
			action_call_counts: counts
				.iter()
				.map(|(name, count)| (name.clone(), count.load(Ordering::Relaxed)))
				.collect(),
		}
	}
}
