//! The manager HTTP API (§6.1): `GET/PUT/POST /actors`, `GET /actors/names`, `GET /health`,
//! `GET /metadata`. These are plain request/response functions over C2/C3, not bound to a
//! specific HTTP framework, the binary embedding this workspace wires them to its own
//! `axum`/`hyper` listener (§1 Non-goals: "the HTTP transport library").

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
	driver::{ListActorsQuery, ManagerDriver},
	error::DriverError,
	identity::{ActorId, ActorRecord},
};
use rivetkit_protocol::Payload;

/// `GET /actors` rejects more than this many `actor_ids` in one call (§8 boundary behaviors).
pub const MAX_LIST_ACTOR_IDS: usize = 32;

/// Query parameters for `GET /actors?name=&actor_ids=&key=`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActorsListParams {
	pub name: Option<String>,
	pub actor_ids: Option<Vec<String>>,
	pub key: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ActorsListResponse {
	pub actors: Vec<ActorRecord>,
}

/// `GET /actors`. Validates, then dispatches to [`ManagerDriver::list_actors`].
///
/// §6.1/§8: `actor_ids` cannot be combined with `name`/`key`; `key` requires `name`; more than
/// [`MAX_LIST_ACTOR_IDS`] ids is rejected; zero ids returns `{actors: []}` without touching the
/// driver.
#[tracing::instrument(skip_all)]
pub async fn list_actors(
	driver: &dyn ManagerDriver,
	params: ActorsListParams,
) -> Result<ActorsListResponse, DriverError> {
	if params.actor_ids.is_some() && (params.name.is_some() || params.key.is_some()) {
		return Err(DriverError::InvalidRequest(
			"actor_ids cannot be combined with name or key".into(),
		));
	}
	if params.key.is_some() && params.name.is_none() {
		return Err(DriverError::InvalidRequest("key requires name".into()));
	}
	if let Some(ids) = &params.actor_ids {
		if ids.len() > MAX_LIST_ACTOR_IDS {
			return Err(DriverError::TooManyIds);
		}
		if ids.is_empty() {
			return Ok(ActorsListResponse { actors: Vec::new() });
		}
	}

	let query = ListActorsQuery {
		name: params.name,
		actor_ids: params
			.actor_ids
			.map(|ids| ids.into_iter().map(ActorId::from).collect()),
		key: params.key,
	};
	let actors = driver.list_actors(query).await?;
	Ok(ActorsListResponse { actors })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActorsNamesParams {
	pub namespace: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActorsNamesResponse {
	pub names: Vec<String>,
}

/// `GET /actors/names?namespace=`.
pub async fn list_actor_names(
	driver: &dyn ManagerDriver,
	params: ActorsNamesParams,
) -> Result<ActorsNamesResponse, DriverError> {
	let names = driver.list_actor_names(params.namespace.as_deref()).await?;
	Ok(ActorsNamesResponse { names })
}

#[derive(Debug, Deserialize)]
pub struct GetOrCreateRequest {
	pub name: String,
	pub key: Vec<String>,
	#[serde(default)]
	pub input: Option<Payload>,
	#[serde(default)]
	pub region: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetOrCreateResponse {
	pub actor: ActorRecord,
	pub created: bool,
}

/// `PUT /actors`, get-or-create by `(name, key)` (§6.1).
pub async fn get_or_create_actor(
	driver: &dyn ManagerDriver,
	request: GetOrCreateRequest,
) -> Result<GetOrCreateResponse, DriverError> {
	let (actor, created) = driver
		.get_or_create_with_key(
			&request.name,
			&request.key,
			request.input,
			request.region.as_deref(),
		)
		.await?;
	Ok(GetOrCreateResponse { actor, created })
}

#[derive(Debug, Deserialize)]
pub struct CreateActorRequest {
	pub name: String,
	#[serde(default)]
	pub key: Option<Vec<String>>,
	#[serde(default)]
	pub input: Option<Payload>,
	#[serde(default)]
	pub region: Option<String>,
}

/// `POST /actors`, always creates, generating a random key when the caller omits one (§6.1
/// "Create (generates key if absent)").
pub async fn create_actor(
	driver: &dyn ManagerDriver,
	request: CreateActorRequest,
) -> Result<ActorRecord, DriverError> {
	let key = request
		.key
		.unwrap_or_else(|| vec![Uuid::new_v4().to_string()]);
	driver
		.create_actor(&request.name, &key, request.input, request.region.as_deref())
		.await
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub ok: bool,
}

/// `GET /health`, liveness.
pub fn health() -> HealthResponse {
	HealthResponse { ok: true }
}

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
	pub version: &'static str,
}

/// `GET /metadata`, server metadata.
pub fn metadata() -> MetadataResponse {
	MetadataResponse {
		version: env!("CARGO_PKG_VERSION"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::driver::DuplexByteStream;
	use async_trait::async_trait;
	use bytes::Bytes;
	use rivetkit_protocol::Encoding;

	#[derive(Default)]
	struct StubDriver;

	#[async_trait]
	impl ManagerDriver for StubDriver {
		async fn get_for_id(&self, _name: &str, id: &ActorId) -> Result<ActorRecord, DriverError> {
			Ok(record(id.as_str(), "echo"))
		}
		async fn get_with_key(&self, name: &str, _key: &[String]) -> Result<ActorRecord, DriverError> {
			Ok(record("existing", name))
		}
		async fn get_or_create_with_key(
			&self,
			name: &str,
			_key: &[String],
			_input: Option<Payload>,
			_region: Option<&str>,
		) -> Result<(ActorRecord, bool), DriverError> {
			Ok((record("new-id", name), true))
		}
		async fn create_actor(
			&self,
			name: &str,
			key: &[String],
			_input: Option<Payload>,
			_region: Option<&str>,
		) -> Result<ActorRecord, DriverError> {
			let mut rec = record("created-id", name);
			rec.key = key.to_vec();
			Ok(rec)
		}
		async fn list_actors(&self, query: ListActorsQuery) -> Result<Vec<ActorRecord>, DriverError> {
			Ok(query
				.actor_ids
				.unwrap_or_default()
				.into_iter()
				.map(|id| record(id.as_str(), "echo"))
				.collect())
		}
		async fn send_request(
			&self,
			_actor_id: &ActorId,
			_request: http::Request<Bytes>,
		) -> Result<http::Response<Bytes>, DriverError> {
			unimplemented!()
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

	fn record(id: &str, name: &str) -> ActorRecord {
		ActorRecord {
			actor_id: ActorId::from(id),
			name: name.to_string(),
			key: vec![],
			create_ts: Some(0),
			start_ts: None,
			connectable_ts: None,
			sleep_ts: None,
			destroy_ts: None,
			error: None,
		}
	}

	#[tokio::test]
	async fn combining_actor_ids_with_name_is_rejected() {
		let driver = StubDriver;
		let params = ActorsListParams {
			name: Some("echo".into()),
			actor_ids: Some(vec!["a".into()]),
			key: None,
		};
		let err = list_actors(&driver, params).await.unwrap_err();
		assert!(matches!(err, DriverError::InvalidRequest(_)));
	}

	#[tokio::test]
	async fn key_without_name_is_rejected() {
		let driver = StubDriver;
		let params = ActorsListParams {
			name: None,
			actor_ids: None,
			key: Some(vec!["k".into()]),
		};
		let err = list_actors(&driver, params).await.unwrap_err();
		assert!(matches!(err, DriverError::InvalidRequest(_)));
	}

	#[tokio::test]
	async fn more_than_32_ids_is_rejected() {
		let driver = StubDriver;
		let params = ActorsListParams {
			name: None,
			actor_ids: Some((0..33).map(|i| i.to_string()).collect()),
			key: None,
		};
		let err = list_actors(&driver, params).await.unwrap_err();
		assert!(matches!(err, DriverError::TooManyIds));
	}

	#[tokio::test]
	async fn zero_ids_returns_empty_list_without_calling_driver() {
		let driver = StubDriver;
		let params = ActorsListParams {
			name: None,
			actor_ids: Some(vec![]),
			key: None,
		};
		let response = list_actors(&driver, params).await.unwrap();
		assert!(response.actors.is_empty());
	}

	#[tokio::test]
	async fn create_generates_a_key_when_absent() {
		let driver = StubDriver;
		let request = CreateActorRequest {
			name: "echo".into(),
			key: None,
			input: None,
			region: None,
		};
		let actor = create_actor(&driver, request).await.unwrap();
		assert_eq!(actor.key.len(), 1);
	}

	#[tokio::test]
	async fn create_keeps_a_caller_supplied_key() {
		let driver = StubDriver;
		let request = CreateActorRequest {
			name: "echo".into(),
			key: Some(vec!["mine".into()]),
			input: None,
			region: None,
		};
		let actor = create_actor(&driver, request).await.unwrap();
		assert_eq!(actor.key, vec!["mine".to_string()]);
	}

	#[tokio::test]
	async fn get_or_create_reports_whether_it_created() {
		let driver = StubDriver;
		let request = GetOrCreateRequest {
			name: "echo".into(),
			key: vec!["k".into()],
			input: None,
			region: None,
		};
		let response = get_or_create_actor(&driver, request).await.unwrap();
		assert!(response.created);
	}

	#[test]
	fn health_reports_ok() {
		assert!(health().ok);
	}

	#[test]
	fn metadata_reports_a_version() {
		assert!(!metadata().version.is_empty());
	}
}
