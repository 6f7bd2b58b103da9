//! The narrow interfaces the inspector reaches into a live actor instance through (§2
//! "C8 reaches into a live actor instance (external) through narrow interfaces"). An embedder
//! implements these against its own actor runtime; this crate never constructs an actor itself.

use async_trait::async_trait;
use bytes::Bytes;
use rivetkit_protocol::Payload;

use crate::error::InspectorError;

/// Live connection as the inspector sees it (§4.8 "getConnections"). Deliberately smaller than a
/// full connection state machine, the inspector only ever needs to list and describe
/// connections, never drive one.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSummary {
	pub connection_id: String,
	pub state: &'static str,
	pub connected_at: Option<i64>,
}

/// One entry in the action catalog (§4.8 "getRpcs").
#[derive(Debug, Clone, PartialEq)]
pub struct RpcSummary {
	pub name: String,
}

/// One message sitting in an actor's named queue, as read back for introspection (§4.8
/// "getQueueSize"/"getQueueStatus"). A read-only snapshot, distinct from the queue sender's
/// outbound types, nothing here is ever sent anywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
	pub id: String,
	pub queue_name: String,
	pub body: Payload,
	pub created_ts: i64,
}

/// Snapshot + mutate actor state, enumerate connections/actions, and read queued messages
/// (§4.8). All state payloads travel as opaque CBOR byte buffers, never decoded by this crate.
#[async_trait]
pub trait InspectableActor: Send + Sync {
	fn state_enabled(&self) -> bool;

	async fn get_state(&self) -> Result<Bytes, InspectorError>;

	async fn set_state(&self, state: Bytes) -> Result<(), InspectorError>;

	fn connections(&self) -> Vec<ConnectionSummary>;

	fn rpcs(&self) -> Vec<RpcSummary>;

	/// Full queue contents, in no particular order, [`crate::queue::status`] does the sorting
	/// and truncation (§4.8 "sorted by creation time ascending").
	fn queued_messages(&self) -> Vec<QueuedMessage>;
}

/// Runs one action by name against the live actor instance, the executor `executeAction` drives
/// through a synthetic connection (§4.8).
#[async_trait]
pub trait ActorExecutor: Send + Sync {
	async fn execute_action(&self, name: &str, params: Payload) -> Result<Payload, InspectorError>;
}
