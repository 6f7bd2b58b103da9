use async_trait::async_trait;
use bytes::Bytes;
use rivetkit_protocol::{Encoding, Payload};

use crate::{
	error::DriverError,
	identity::{ActorId, ActorRecord},
};

/// `actor_ids`/`name`+`key` filters for `listActors` (§6.1). Combining `actor_ids` with
/// `name`/`key` is rejected by the caller before the driver ever sees it.
#[derive(Debug, Clone, Default)]
pub struct ListActorsQuery {
	pub name: Option<String>,
	pub actor_ids: Option<Vec<ActorId>>,
	pub key: Option<Vec<String>>,
}

/// What arrived on a [`DuplexByteStream`]: either a full message frame, or the peer's close
/// frame (code + reason), which the client parses per §6.3 "Close-frame error protocol".
#[derive(Debug, Clone)]
pub enum StreamEvent {
	Frame(Vec<u8>),
	Closed { code: u16, reason: String },
}

/// A bidirectional byte-frame stream abstracting over the concrete WebSocket implementation.
/// Kept transport-agnostic: neither this crate nor `rivetkit-gateway` depends on a specific
/// WebSocket library's upgrade type, only on this trait.
#[async_trait]
pub trait DuplexByteStream: Send {
	async fn send(&mut self, frame: Vec<u8>) -> Result<(), DriverError>;

	async fn recv(&mut self) -> Result<StreamEvent, DriverError>;

	async fn close(&mut self, code: u16, reason: &str) -> Result<(), DriverError>;
}

/// The pluggable backend a manager delegates identity and transport operations to (§4.3).
///
/// *Identity* operations resolve and mutate actor records. *Transport* operations move bytes to
/// and from a specific actor: `send_request` is the one-shot path used by the stateless handle
/// and the queue sender; `open_websocket` is used by the stateful connection; `proxy_request`/
/// `proxy_websocket` are used by the gateway to forward an inbound request it has already routed.
#[async_trait]
pub trait ManagerDriver: Send + Sync {
	async fn get_for_id(&self, name: &str, id: &ActorId) -> Result<ActorRecord, DriverError>;

	async fn get_with_key(&self, name: &str, key: &[String]) -> Result<ActorRecord, DriverError>;

	/// Returns `(record, created)`, `created` is `true` iff this call caused the actor to come
	/// into existence.
	async fn get_or_create_with_key(
		&self,
		name: &str,
		key: &[String],
		input: Option<Payload>,
		region: Option<&str>,
	) -> Result<(ActorRecord, bool), DriverError>;

	async fn create_actor(
		&self,
		name: &str,
		key: &[String],
		input: Option<Payload>,
		region: Option<&str>,
	) -> Result<ActorRecord, DriverError>;

	async fn list_actors(&self, query: ListActorsQuery) -> Result<Vec<ActorRecord>, DriverError>;

	/// Enumerates the actor type names registered in a namespace (§6.1 `GET /actors/names`).
	/// Defaulted to empty since the closed build-time registry of names (§3 "Actor identity")
	/// lives with whatever embeds this driver, not with the driver contract itself.
	async fn list_actor_names(&self, _namespace: Option<&str>) -> Result<Vec<String>, DriverError> {
		Ok(Vec::new())
	}

	async fn send_request(
		&self,
		actor_id: &ActorId,
		request: http::Request<Bytes>,
	) -> Result<http::Response<Bytes>, DriverError>;

	async fn open_websocket(
		&self,
		path: &str,
		actor_id: &ActorId,
		encoding: Encoding,
		params: Option<serde_json::Value>,
	) -> Result<Box<dyn DuplexByteStream>, DriverError>;

	async fn proxy_request(
		&self,
		actor_id: &ActorId,
		request: http::Request<Bytes>,
	) -> Result<http::Response<Bytes>, DriverError>;

	async fn proxy_websocket(
		&self,
		path: &str,
		actor_id: &ActorId,
		encoding: Encoding,
		params: Option<serde_json::Value>,
		client_stream: Box<dyn DuplexByteStream>,
	) -> Result<(), DriverError>;
}
