//! Queue sender & proxy (C5, §4.5). Reused by both the stateless handle (C6) and the stateful
//! connection (C7) to expose a uniform fire-and-forget / wait-for-completion message API.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use rivetkit_driver::{ActorId, ManagerDriver};
use rivetkit_protocol::{Encoding, Payload};
use serde::{Deserialize, Serialize};

use crate::errors::ClientError;
use crate::metrics;
use crate::wire;

/// Wire body of a queue POST: `{name, body, wait?, timeout?}` (§4.5). `timeout` is communicated
/// to the server as a plain integer of milliseconds; the server enforces it, so the caller never
/// hangs past it regardless of local timer drift.
#[derive(Serialize)]
struct QueueSendRequest<'a> {
	name: &'a str,
	body: serde_json::Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	wait: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	timeout: Option<u64>,
}

#[derive(Deserialize)]
struct QueueSendResponse {
	status: QueueStatus,
	#[serde(default)]
	response: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueStatus {
	Completed,
	TimedOut,
}

/// Outcome of a `wait: true` send once the server reports completion or its own timeout.
#[derive(Debug, Clone)]
pub struct QueueSendOutcome {
	pub status: QueueStatus,
	pub response: Option<Payload>,
}

#[derive(Debug, Clone, Copy)]
pub enum QueueSendOptions {
	/// Resolves once the server has accepted the message (the default).
	Fire,
	/// Resolves once the server reports completion or its own timeout.
	Wait { timeout_ms: Option<u64> },
}

impl Default for QueueSendOptions {
	fn default() -> Self {
		QueueSendOptions::Fire
	}
}

const QUEUE_PATH: &str = "/queue";

/// Sends one message to a named queue on an already-resolved actor. Direct half of C5, the
/// proxy in [`QueueProxy`] forwards here with `name` fixed to the accessed property.
pub async fn send<D: ManagerDriver>(
	driver: &D,
	actor_id: &ActorId,
	encoding: Encoding,
	name: &str,
	body: Payload,
	options: QueueSendOptions,
) -> Result<Option<QueueSendOutcome>, ClientError> {
	let (wait, timeout) = match options {
		QueueSendOptions::Fire => (None, None),
		QueueSendOptions::Wait { timeout_ms } => (Some(true), timeout_ms),
	};
	let mode = if wait.is_some() { "wait" } else { "fire" };

	let wire_body = QueueSendRequest {
		name,
		body: body.decode().map_err(|err| ClientError::Internal(err.to_string()))?,
		wait,
		timeout,
	};
	let bytes = serde_json::to_vec(&wire_body).map_err(|err| ClientError::Internal(err.to_string()))?;

	let request = http::Request::builder()
		.method(http::Method::POST)
		.uri(format!("http://actor{QUEUE_PATH}"))
		.header(http::header::CONTENT_TYPE, wire::content_type(Encoding::Text))
		.body(bytes.into())
		.map_err(|err| ClientError::Internal(err.to_string()))?;

	let result = driver.send_request(actor_id, request).await;
	let response = match result {
		Ok(response) => response,
		Err(err) => {
			metrics::QUEUE_SEND_TOTAL.with_label_values(&[mode, "error"]).inc();
			return Err(err.into());
		}
	};

	let (parts, body) = response.into_parts();
	if !parts.status.is_success() {
		metrics::QUEUE_SEND_TOTAL.with_label_values(&[mode, "error"]).inc();
		return Err(wire::decode_error_body(parts.status, &body));
	}
	metrics::QUEUE_SEND_TOTAL.with_label_values(&[mode, "ok"]).inc();

	if wait.is_none() {
		return Ok(None);
	}

	let wire_response: QueueSendResponse =
		serde_json::from_slice(&body).map_err(|err| ClientError::Internal(err.to_string()))?;
	Ok(Some(QueueSendOutcome {
		status: wire_response.status,
		response: wire_response.response.map(Payload::from_value),
	}))
}

/// Dynamic `queue.<name>.send(...)` accessor (§4.5 "Proxy"). Deduplicates the per-name method
/// object it hands back so repeated access for the same name returns the same handle, and
/// resolves `None` for the property name `"then"` so a caller that does
/// `queue.then(...)` (mistaking the proxy for a thenable) is not silently misinterpreted.
pub struct QueueProxy<D: ManagerDriver> {
	driver: Arc<D>,
	actor_id: ActorId,
	encoding: Encoding,
	entries: Mutex<HashMap<String, Arc<QueueEntry<D>>>>,
}

/// The per-name handle returned by [`QueueProxy::get`].
pub struct QueueEntry<D: ManagerDriver> {
	driver: Arc<D>,
	actor_id: ActorId,
	encoding: Encoding,
	name: String,
}

impl<D: ManagerDriver> QueueEntry<D> {
	pub async fn send(
		&self,
		body: Payload,
		options: QueueSendOptions,
	) -> Result<Option<QueueSendOutcome>, ClientError> {
		send(
			self.driver.as_ref(),
			&self.actor_id,
			self.encoding,
			&self.name,
			body,
			options,
		)
		.await
	}
}

impl<D: ManagerDriver> QueueProxy<D> {
	pub fn new(driver: Arc<D>, actor_id: ActorId, encoding: Encoding) -> Self {
		QueueProxy {
			driver,
			actor_id,
			encoding,
			entries: Mutex::new(HashMap::new()),
		}
	}

	/// `None` for the reserved property name `"then"`; an existing or freshly minted entry for
	/// everything else.
	pub fn get(&self, name: &str) -> Option<Arc<QueueEntry<D>>> {
		if name == "then" {
			return None;
		}
		let mut entries = self.entries.lock().unwrap();
		if let Some(entry) = entries.get(name) {
			return Some(entry.clone());
		}
		let entry = Arc::new(QueueEntry {
			driver: self.driver.clone(),
			actor_id: self.actor_id.clone(),
			encoding: self.encoding,
			name: name.to_string(),
		});
		entries.insert(name.to_string(), entry.clone());
		Some(entry)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use bytes::Bytes;
	use rivetkit_driver::{DriverError, DuplexByteStream, ListActorsQuery, ActorRecord};

	struct NullDriver;

	#[async_trait]
	impl ManagerDriver for NullDriver {
		async fn get_for_id(&self, _name: &str, _id: &ActorId) -> Result<ActorRecord, DriverError> {
			unimplemented!()
		}
		async fn get_with_key(&self, _name: &str, _key: &[String]) -> Result<ActorRecord, DriverError> {
			unimplemented!()
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
			request: http::Request<Bytes>,
		) -> Result<http::Response<Bytes>, DriverError> {
			assert_eq!(request.uri().path(), "/queue");
			Ok(http::Response::builder()
				.status(200)
				.body(Bytes::from_static(b"{}"))
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

	#[tokio::test]
	async fn fire_and_forget_resolves_without_reading_a_body() {
		let driver = NullDriver;
		let outcome = send(
			&driver,
			&ActorId::from("A"),
			Encoding::Text,
			"events",
			Payload::null(),
			QueueSendOptions::Fire,
		)
		.await
		.unwrap();
		assert!(outcome.is_none());
	}

	#[test]
	fn proxy_deduplicates_entries_by_name_and_rejects_then() {
		let proxy = QueueProxy::new(Arc::new(NullDriver), ActorId::from("A"), Encoding::Text);
		let a = proxy.get("events").unwrap();
		let b = proxy.get("events").unwrap();
		assert!(Arc::ptr_eq(&a, &b));
		assert!(proxy.get("then").is_none());
	}
}
