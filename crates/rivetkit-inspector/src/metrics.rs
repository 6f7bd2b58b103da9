//! Prometheus metrics for inspector operation calls, matching the `lazy_static!` +
//! `register_*_with_registry!` shape used across this workspace (grounded on
//! `packages/guard/src/metrics.rs`).

use prometheus::IntCounterVec;

lazy_static::lazy_static! {
	pub static ref REGISTRY: prometheus::Registry = prometheus::Registry::new();

	/// Inspector operation calls, by operation name (`get_state`/`set_state`/`execute_action`/
	/// `get_queue_status`/etc.) and outcome (`ok`/`error`).
	pub static ref OPERATION_TOTAL: IntCounterVec = prometheus::register_int_counter_vec_with_registry!(
		"rivetkit_inspector_operation_total",
		"Total number of inspector operation calls.",
		&["operation", "outcome"],
		REGISTRY
	)
	.unwrap();
}
