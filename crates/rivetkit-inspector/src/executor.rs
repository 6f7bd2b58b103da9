//! `executeAction` (§4.8): runs an action through a synthetic in-process connection, disposed
//! "in a finally" regardless of how the call ends. Rust has no `finally`, so the synthetic
//! connection is a RAII guard instead: its `Drop` impl is the disposal, and it runs whether
//! [`Inspector::execute_action`] returns, errors, or the call is cancelled out from under it -
//! strictly stronger than a `finally` block, which a cancelled `await` never reaches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rivetkit_protocol::Payload;

use crate::error::InspectorError;
use crate::metrics;
use crate::traits::ActorExecutor;

/// Tracks how many synthetic connections are currently open against an actor, purely for
/// observability, the executor itself has no notion of connection identity to dispose beyond
/// this count.
#[derive(Default)]
pub(crate) struct SyntheticConnectionTracker {
	open: AtomicU64,
}

impl SyntheticConnectionTracker {
	pub(crate) fn open_count(&self) -> u64 {
		self.open.load(Ordering::Relaxed)
	}
}

/// Disposed on drop: decrements the tracker it was opened against.
struct SyntheticConnection {
	tracker: Arc<SyntheticConnectionTracker>,
}

impl SyntheticConnection {
	fn open(tracker: Arc<SyntheticConnectionTracker>) -> Self {
		tracker.open.fetch_add(1, Ordering::Relaxed);
		SyntheticConnection { tracker }
	}
}

impl Drop for SyntheticConnection {
	fn drop(&mut self) {
		self.tracker.open.fetch_sub(1, Ordering::Relaxed);
	}
}

/// Runs `name(params)` against `executor` via a synthetic connection opened for the duration of
/// the call and disposed immediately afterward, success or failure (§4.8).
pub(crate) async fn execute_action(
	executor: &dyn ActorExecutor,
	tracker: &Arc<SyntheticConnectionTracker>,
	name: &str,
	params: Payload,
) -> Result<Payload, InspectorError> {
	let _synthetic = SyntheticConnection::open(tracker.clone());
	let result = executor.execute_action(name, params).await;
	metrics::OPERATION_TOTAL
		.with_label_values(&["execute_action", if result.is_ok() { "ok" } else { "error" }])
		.inc();
	result
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;

	struct EchoExecutor;

	#[async_trait]
	impl ActorExecutor for EchoExecutor {
		async fn execute_action(&self, name: &str, params: Payload) -> Result<Payload, InspectorError> {
			if name == "boom" {
				return Err(InspectorError::UnknownAction(name.to_string()));
			}
			Ok(params)
		}
	}

	#[tokio::test]
	async fn synthetic_connection_is_disposed_after_a_successful_call() {
		let tracker = Arc::new(SyntheticConnectionTracker::default());
		let result = execute_action(&EchoExecutor, &tracker, "echo", Payload::null()).await;
		assert!(result.is_ok());
		assert_eq!(tracker.open_count(), 0);
	}

	#[tokio::test]
	async fn synthetic_connection_is_disposed_even_when_the_action_errors() {
		let tracker = Arc::new(SyntheticConnectionTracker::default());
		let result = execute_action(&EchoExecutor, &tracker, "boom", Payload::null()).await;
		assert!(result.is_err());
		assert_eq!(tracker.open_count(), 0);
	}
}
