//! Stateless actor handle (C6, §4.6). One-shot action invocation over HTTP with query-based
//! resolution and error normalization, plus raw `fetch`/`webSocket` passthrough and a queue
//! proxy. Unlike [`crate::connection::ActorConnection`], a handle never holds a socket open
//! between calls, every call resolves the query (and caches the result) independently.

use std::sync::Arc;
use std::sync::Mutex as SyncMutex;

use bytes::Bytes;
use rivetkit_driver::{ActorId, ActorQuery, DriverError, DuplexByteStream, ManagerDriver};
use rivetkit_protocol::{Encoding, ErrorShape, Payload};

use crate::errors::ClientError;
use crate::metrics;
use crate::queue::QueueProxy;
use crate::wire;

/// Opaque base URL actions and fetches are constructed against; the driver is the thing that
/// actually knows how to reach the actor, so this exists only to make request URIs well-formed
/// (§4.6 "one POST to `http://actor/action/{name}`").
pub const ACTOR_BASE_URL: &str = "http://actor";

/// Stateless, one-shot-per-call actor handle.
pub struct ActorHandle<D: ManagerDriver> {
	driver: Arc<D>,
	query: SyncMutex<ActorQuery>,
	encoding: Encoding,
}

impl<D: ManagerDriver + 'static> ActorHandle<D> {
	pub fn new(driver: Arc<D>, query: ActorQuery, encoding: Encoding) -> Self {
		ActorHandle {
			driver,
			query: SyncMutex::new(query),
			encoding,
		}
	}

	/// A [`crate::queue::QueueProxy`] bound to this handle's actor, resolving the query (but not
	/// caching the result, since the proxy can outlive any single call) the first time it's used.
	pub async fn queue(&self) -> Result<QueueProxy<D>, ClientError> {
		let actor_id = self.resolve_and_cache().await?;
		Ok(QueueProxy::new(self.driver.clone(), actor_id, self.encoding))
	}

	pub fn get_gateway_url(&self) -> String {
		ACTOR_BASE_URL.to_string()
	}

	/// Resolves the held query to a concrete actor id, mutating it to `getForId` on success
	/// (§3 "idempotent-rewrite rule"). Rejects a `create` query: there is no pre-existing actor
	/// for it to identify (§4.6).
	pub async fn resolve(&self) -> Result<ActorId, ClientError> {
		if self.query.lock().unwrap().is_create() {
			return Err(DriverError::UnresolvableCreateQuery.into());
		}
		self.resolve_and_cache().await
	}

	/// `action({name, args, signal?})`: resolves the query, then performs one POST to
	/// `http://actor/action/{name}` through the driver's `send_request` (§4.6). `signal` is the
	/// caller's own cancellation, applied by racing this future, there's nothing handle-side to
	/// cancel beyond dropping the call.
	#[tracing::instrument(skip_all, fields(name = %name.as_ref()))]
	pub async fn action(&self, name: impl AsRef<str>, args: Payload) -> Result<Payload, ClientError> {
		let name = name.as_ref();
		let actor_id = self.resolve_and_cache().await?;

		let body = wire::encode_payload(self.encoding, &args)?;
		let request = http::Request::builder()
			.method(http::Method::POST)
			.uri(format!("{ACTOR_BASE_URL}/action/{name}"))
			.header(http::header::CONTENT_TYPE, wire::content_type(self.encoding))
			.body(body)
			.map_err(|err| ClientError::Internal(err.to_string()))?;

		let timer = metrics::ACTION_DURATION.with_label_values(&["handle", name]).start_timer();
		let result = self.driver.send_request(&actor_id, request).await;
		timer.observe_duration();

		let response = match result {
			Ok(response) => response,
			Err(err) => {
				metrics::ACTION_TOTAL.with_label_values(&["handle", name, "error"]).inc();
				return Err(err.into());
			}
		};

		let outcome = self.unwrap_action_response(&actor_id, response).await;
		metrics::ACTION_TOTAL
			.with_label_values(&["handle", name, if outcome.is_ok() { "ok" } else { "error" }])
			.inc();
		outcome
	}

	/// Raw HTTP passthrough (§4.6 `fetch(input, init?)`). `request` is forwarded verbatim to the
	/// driver's `send_request` after the query is resolved; no action envelope is applied.
	pub async fn fetch(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>, ClientError> {
		let actor_id = self.resolve_and_cache().await?;
		self.driver.send_request(&actor_id, request).await.map_err(ClientError::from)
	}

	/// Opens a raw duplex stream to the actor (§4.6 `webSocket(path?, protocols?)`), bypassing
	/// the multiplexed connection protocol entirely, the caller owns the stream's framing.
	pub async fn web_socket(&self, path: &str) -> Result<Box<dyn DuplexByteStream>, ClientError> {
		let actor_id = self.resolve_and_cache().await?;
		self.driver
			.open_websocket(path, &actor_id, self.encoding, None)
			.await
			.map_err(ClientError::from)
	}

	async fn resolve_and_cache(&self) -> Result<ActorId, ClientError> {
		let snapshot = self.query.lock().unwrap().clone();
		let actor_id = rivetkit_driver::resolve(&snapshot, self.driver.as_ref()).await?;
		let mut query = self.query.lock().unwrap();
		if !query.is_create() {
			query.rewrite_to_resolved(actor_id.clone());
		}
		Ok(actor_id)
	}

	async fn unwrap_action_response(
		&self,
		actor_id: &ActorId,
		response: http::Response<Bytes>,
	) -> Result<Payload, ClientError> {
		let (parts, body) = response.into_parts();
		if parts.status.is_success() {
			return wire::decode_payload(self.encoding, &body);
		}
		let err = wire::decode_error_body(parts.status, &body);
		Err(self.enrich_scheduling_error(actor_id, err).await)
	}

	/// Scheduling-error enrichment (§7, S3): on a scheduling-class error, re-reads the actor's
	/// terminal error record via `getForId` so the caller sees why it's unschedulable rather than
	/// just that it is.
	async fn enrich_scheduling_error(&self, actor_id: &ActorId, err: ClientError) -> ClientError {
		let shape = match shape_of(&err) {
			Some(shape) if shape.is_scheduling_error() => shape,
			_ => return err,
		};
		let name = self.query.lock().unwrap().name().to_string();
		match self.driver.get_for_id(&name, actor_id).await {
			Ok(record) => ClientError::Scheduling {
				actor_id: actor_id.clone(),
				error: record.error,
			},
			Err(_) => err,
		}
	}
}

fn shape_of(err: &ClientError) -> Option<ErrorShape> {
	match err {
		ClientError::Actor(shape) => Some(shape.clone()),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use rivetkit_driver::{ActorRecord, ListActorsQuery, TerminalError};

	fn record(id: &str) -> ActorRecord {
		ActorRecord {
			actor_id: ActorId::from(id),
			name: "echo".into(),
			key: vec![],
			create_ts: Some(0),
			start_ts: None,
			connectable_ts: None,
			sleep_ts: None,
			destroy_ts: None,
			error: None,
		}
	}

	struct StubDriver {
		status: http::StatusCode,
		body: Bytes,
		terminal_error: Option<TerminalError>,
	}

	#[async_trait]
	impl ManagerDriver for StubDriver {
		async fn get_for_id(&self, _name: &str, id: &ActorId) -> Result<ActorRecord, DriverError> {
			Ok(ActorRecord {
				error: self.terminal_error.clone(),
				..record(id.as_str())
			})
		}
		async fn get_with_key(&self, _name: &str, _key: &[String]) -> Result<ActorRecord, DriverError> {
			Ok(record("resolved"))
		}
		async fn get_or_create_with_key(
			&self,
			_name: &str,
			_key: &[String],
			_input: Option<Payload>,
			_region: Option<&str>,
		) -> Result<(ActorRecord, bool), DriverError> {
			unimplemented!()
		}
		async fn create_actor(
			&self,
			_name: &str,
			_key: &[String],
			_input: Option<Payload>,
			_region: Option<&str>,
		) -> Result<ActorRecord, DriverError> {
			unimplemented!()
		}
		async fn list_actors(&self, _query: ListActorsQuery) -> Result<Vec<ActorRecord>, DriverError> {
			unimplemented!()
		}
		async fn send_request(
			&self,
			_actor_id: &ActorId,
			_request: http::Request<Bytes>,
		) -> Result<http::Response<Bytes>, DriverError> {
			Ok(http::Response::builder()
				.status(self.status)
				.body(self.body.clone())
				.unwrap())
		}
		async fn open_websocket(
			&self,
			_path: &str,
			_actor_id: &ActorId,
			_encoding: Encoding,
			_params: Option<serde_json::Value>,
		) -> Result<Box<dyn DuplexByteStream>, DriverError> {
			unimplemented!()
		}
		async fn proxy_request(
			&self,
			_actor_id: &ActorId,
			_request: http::Request<Bytes>,
		) -> Result<http::Response<Bytes>, DriverError> {
			unimplemented!()
		}
		async fn proxy_websocket(
			&self,
			_path: &str,
			_actor_id: &ActorId,
			_encoding: Encoding,
			_params: Option<serde_json::Value>,
			_client_stream: Box<dyn DuplexByteStream>,
		) -> Result<(), DriverError> {
			unimplemented!()
		}
	}

	fn handle(driver: StubDriver) -> ActorHandle<StubDriver> {
		ActorHandle::new(
			Arc::new(driver),
			ActorQuery::GetForKey {
				name: "echo".into(),
				key: vec!["k".into()],
			},
			Encoding::Text,
		)
	}

	#[tokio::test]
	async fn action_decodes_a_successful_json_response() {
		let h = handle(StubDriver {
			status: http::StatusCode::OK,
			body: Bytes::from_static(b"42"),
			terminal_error: None,
		});
		let output = h.action("increment", Payload::null()).await.unwrap();
		assert_eq!(output, Payload::from_value(serde_json::json!(42)));
	}

	#[tokio::test]
	async fn action_normalizes_a_non_scheduling_error() {
		let h = handle(StubDriver {
			status: http::StatusCode::BAD_REQUEST,
			body: Bytes::from_static(br#"{"group":"request","code":"invalid_args","message":"bad"}"#),
			terminal_error: None,
		});
		let err = h.action("increment", Payload::null()).await.unwrap_err();
		assert!(matches!(err, ClientError::Actor(shape) if shape.code == "invalid_args"));
	}

	#[tokio::test]
	async fn scheduling_error_is_enriched_with_the_terminal_error_record() {
		let h = handle(StubDriver {
			status: http::StatusCode::CONFLICT,
			body: Bytes::from_static(br#"{"group":"actor","code":"destroyed","message":"gone"}"#),
			terminal_error: Some(TerminalError {
				group: "actor".into(),
				code: "oom".into(),
				message: "out of memory".into(),
			}),
		});
		let err = h.action("increment", Payload::null()).await.unwrap_err();
		match err {
			ClientError::Scheduling { error: Some(terminal), .. } => assert_eq!(terminal.code, "oom"),
			other => panic!("expected enriched scheduling error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn resolve_rejects_a_create_query() {
		let h = ActorHandle::new(
			Arc::new(StubDriver {
				status: http::StatusCode::OK,
				body: Bytes::new(),
				terminal_error: None,
			}),
			ActorQuery::Create {
				name: "echo".into(),
				key: vec![],
				input: None,
				region: None,
			},
			Encoding::Text,
		);
		let err = h.resolve().await.unwrap_err();
		assert!(matches!(err, ClientError::Driver(DriverError::UnresolvableCreateQuery)));
	}

	#[tokio::test]
	async fn resolve_caches_the_query_as_get_for_id() {
		let h = handle(StubDriver {
			status: http::StatusCode::OK,
			body: Bytes::new(),
			terminal_error: None,
		});
		let id = h.resolve().await.unwrap();
		assert_eq!(id, ActorId::from("resolved"));
		assert!(matches!(*h.query.lock().unwrap(), ActorQuery::GetForId { .. }));
	}
}
