//! Prometheus metrics for the workflow engine, matching `pegboard_runner::metrics`'s shape
//! (a `lazy_static!` block of `register_*_with_registry!` calls against one crate-local
//! registry). Upstream metrics go through `rivet_metrics::REGISTRY`, a shared registry defined
//! outside this workspace; this crate owns its registry directly instead.

use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Registry};

lazy_static::lazy_static! {
	pub static ref REGISTRY: Registry = Registry::new();

	pub static ref WORKFLOW_STEP_TOTAL: IntCounterVec = prometheus::register_int_counter_vec_with_registry!(
		"rivetkit_workflow_step_total",
		"Count of workflow step attempts, by workflow id and outcome.",
		&["workflow_id", "outcome"],
		REGISTRY
	)
	.unwrap();

	pub static ref WORKFLOW_STEP_DURATION: HistogramVec = prometheus::register_histogram_vec_with_registry!(
		"rivetkit_workflow_step_duration",
		"Duration of a workflow step body's execution, in seconds.",
		&["workflow_id"],
		prometheus::DEFAULT_BUCKETS.to_vec(),
		REGISTRY
	)
	.unwrap();

	pub static ref WORKFLOW_SUSPENDED: IntGaugeVec = prometheus::register_int_gauge_vec_with_registry!(
		"rivetkit_workflow_suspended",
		"Count of workflow executions currently suspended, by yield kind.",
		&["kind"],
		REGISTRY
	)
	.unwrap();

	pub static ref WORKFLOW_ROLLBACK_TOTAL: IntCounterVec = prometheus::register_int_counter_vec_with_registry!(
		"rivetkit_workflow_rollback_total",
		"Count of rollback passes run, by outcome.",
		&["outcome"],
		REGISTRY
	)
	.unwrap();

	pub static ref WORKER_RUNNING_WORKFLOWS: IntGaugeVec = prometheus::register_int_gauge_vec_with_registry!(
		"rivetkit_worker_running_workflows",
		"Count of workflow executions currently tracked by a worker tick, by workflow name.",
		&["workflow_name"],
		REGISTRY
	)
	.unwrap();

	pub static ref WORKER_TICK_TOTAL: IntCounterVec = prometheus::register_int_counter_vec_with_registry!(
		"rivetkit_worker_tick_total",
		"Count of worker poll ticks.",
		&["outcome"],
		REGISTRY
	)
	.unwrap();
}
