//! Prometheus metrics for the query resolver, grounded on the same `lazy_static!` +
//! `register_*_with_registry!` shape as `packages/guard/src/metrics.rs`.

use prometheus::IntCounterVec;

lazy_static::lazy_static! {
	pub static ref REGISTRY: prometheus::Registry = prometheus::Registry::new();

	/// Query resolutions, by query variant (`get_for_id`/`get_for_key`/`get_or_create_for_key`/
	/// `create`) and outcome (`ok`/`not_found`/`error`).
	pub static ref RESOLVE_TOTAL: IntCounterVec = prometheus::register_int_counter_vec_with_registry!(
		"rivetkit_driver_resolve_total",
		"Total number of actor query resolutions.",
		&["variant", "outcome"],
		REGISTRY
	)
	.unwrap();
}
