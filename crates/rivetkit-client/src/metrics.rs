//! Prometheus metrics for the client session core: connection lifecycle counts and action call
//! latency, matching `pegboard_runner::metrics`'s `lazy_static!` + `register_*_with_registry!`
//! shape (grounded on `packages/pegboard-runner/src/metrics.rs`).

use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Registry};

lazy_static::lazy_static! {
	pub static ref REGISTRY: Registry = Registry::new();

	pub static ref CONNECTION_ACTIVE: IntGaugeVec = prometheus::register_int_gauge_vec_with_registry!(
		"rivetkit_client_connection_active",
		"Count of actor connections currently in the `connected` state.",
		&["actor_name"],
		REGISTRY
	)
	.unwrap();

	pub static ref RECONNECT_TOTAL: IntCounterVec = prometheus::register_int_counter_vec_with_registry!(
		"rivetkit_client_reconnect_total",
		"Count of reconnect attempts, by outcome.",
		&["outcome"],
		REGISTRY
	)
	.unwrap();

	/// `transport` is `connection` (C7, over the multiplexed socket) or `handle` (C6, one-shot
	/// HTTP), the two call paths that can invoke an action by name.
	pub static ref ACTION_TOTAL: IntCounterVec = prometheus::register_int_counter_vec_with_registry!(
		"rivetkit_client_action_total",
		"Count of action calls, by transport, action name, and outcome.",
		&["transport", "action_name", "outcome"],
		REGISTRY
	)
	.unwrap();

	pub static ref ACTION_DURATION: HistogramVec = prometheus::register_histogram_vec_with_registry!(
		"rivetkit_client_action_duration",
		"Duration of an action call round trip, in seconds.",
		&["transport", "action_name"],
		prometheus::DEFAULT_BUCKETS.to_vec(),
		REGISTRY
	)
	.unwrap();

	pub static ref QUEUE_SEND_TOTAL: IntCounterVec = prometheus::register_int_counter_vec_with_registry!(
		"rivetkit_client_queue_send_total",
		"Count of queue sends, by wait mode and outcome.",
		&["mode", "outcome"],
		REGISTRY
	)
	.unwrap();
}
