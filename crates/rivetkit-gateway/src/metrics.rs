//! Prometheus metrics for inbound routing, matching `guard::metrics`'s shape
//! (`guard_route_total`), grounded on `packages/guard/src/metrics.rs`.

use prometheus::IntCounterVec;

lazy_static::lazy_static! {
	pub static ref REGISTRY: prometheus::Registry = prometheus::Registry::new();

	/// Routing outcomes, by addressing mode (`path`, `header`, `none`) and result
	/// (`matched`/`unmatched`/`error`).
	pub static ref ROUTE_TOTAL: IntCounterVec = prometheus::register_int_counter_vec_with_registry!(
		"rivetkit_gateway_route_total",
		"Total number of routing results handled.",
		&["mode", "result"],
		REGISTRY
	)
	.unwrap();
}
