use crate::{driver::ManagerDriver, error::DriverError, identity::ActorId, metrics, ActorQuery};

/// Resolves an `ActorQuery` to a concrete actor id against a driver (§4.2). A pure function of
/// `(query, driver)`, it never mutates the query; callers that want the idempotent-rewrite
/// behavior do that themselves with [`ActorQuery::rewrite_to_resolved`] once they hold the id.
#[tracing::instrument(skip_all, fields(query.name = query.name()))]
pub async fn resolve(query: &ActorQuery, driver: &dyn ManagerDriver) -> Result<ActorId, DriverError> {
	let variant = query_variant(query);
	let result = resolve_inner(query, driver).await;
	let outcome = match &result {
		Ok(_) => "ok",
		Err(DriverError::ActorNotFound) => "not_found",
		Err(_) => "error",
	};
	metrics::RESOLVE_TOTAL.with_label_values(&[variant, outcome]).inc();
	result
}

fn query_variant(query: &ActorQuery) -> &'static str {
	match query {
		ActorQuery::GetForId { .. } => "get_for_id",
		ActorQuery::GetForKey { .. } => "get_for_key",
		ActorQuery::GetOrCreateForKey { .. } => "get_or_create_for_key",
		ActorQuery::Create { .. } => "create",
	}
}

async fn resolve_inner(query: &ActorQuery, driver: &dyn ManagerDriver) -> Result<ActorId, DriverError> {
	match query {
		ActorQuery::GetForId { id, .. } => Ok(id.clone()),
		ActorQuery::GetForKey { name, key } => {
			let record = driver.get_with_key(name, key).await?;
			Ok(record.actor_id)
		}
		ActorQuery::GetOrCreateForKey {
			name,
			key,
			input,
			region,
		} => {
			let (record, _created) = driver
				.get_or_create_with_key(name, key, input.clone(), region.as_deref())
				.await?;
			Ok(record.actor_id)
		}
		ActorQuery::Create {
			name,
			key,
			input,
			region,
		} => {
			let record = driver
				.create_actor(name, key, input.clone(), region.as_deref())
				.await?;
			Ok(record.actor_id)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::driver::{DuplexByteStream, ListActorsQuery};
	use crate::identity::ActorRecord;
	use async_trait::async_trait;
	use bytes::Bytes;
	use rivetkit_protocol::{Encoding, Payload};
	use std::sync::Mutex;

	#[derive(Default)]
	struct MockDriver {
		created: Mutex<Vec<String>>,
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

	#[async_trait]
	impl ManagerDriver for MockDriver {
		async fn get_for_id(&self, _name: &str, id: &ActorId) -> Result<ActorRecord, DriverError> {
			Ok(record(id.as_str(), "echo"))
		}

		async fn get_with_key(&self, name: &str, key: &[String]) -> Result<ActorRecord, DriverError> {
			if key == ["missing".to_string()] {
				Err(DriverError::ActorNotFound)
			} else {
				Ok(record("existing-id", name))
			}
		}

		async fn get_or_create_with_key(
			&self,
			name: &str,
			_key: &[String],
			_input: Option<Payload>,
			_region: Option<&str>,
		) -> Result<(ActorRecord, bool), DriverError> {
			self.created.lock().unwrap().push(name.to_string());
			Ok((record("new-id", name), true))
		}

		async fn create_actor(
			&self,
			name: &str,
			_key: &[String],
			_input: Option<Payload>,
			_region: Option<&str>,
		) -> Result<ActorRecord, DriverError> {
			self.created.lock().unwrap().push(name.to_string());
			Ok(record("created-id", name))
		}

		async fn list_actors(&self, _query: ListActorsQuery) -> Result<Vec<ActorRecord>, DriverError> {
			Ok(vec![])
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

	#[tokio::test]
	async fn get_for_id_returns_immediately() {
		let driver = MockDriver::default();
		let query = ActorQuery::GetForId {
			name: "echo".into(),
			id: ActorId::from("A"),
		};
		let id = resolve(&query, &driver).await.unwrap();
		assert_eq!(id, ActorId::from("A"));
	}

	#[tokio::test]
	async fn get_for_key_404s_on_miss() {
		let driver = MockDriver::default();
		let query = ActorQuery::GetForKey {
			name: "echo".into(),
			key: vec!["missing".into()],
		};
		let err = resolve(&query, &driver).await.unwrap_err();
		assert!(matches!(err, DriverError::ActorNotFound));
	}

	#[tokio::test]
	async fn get_or_create_never_404s() {
		let driver = MockDriver::default();
		let query = ActorQuery::GetOrCreateForKey {
			name: "echo".into(),
			key: vec!["missing".into()],
			input: None,
			region: None,
		};
		let id = resolve(&query, &driver).await.unwrap();
		assert_eq!(id, ActorId::from("new-id"));
		assert_eq!(*driver.created.lock().unwrap(), vec!["echo".to_string()]);
	}

	#[tokio::test]
	async fn create_always_creates() {
		let driver = MockDriver::default();
		let query = ActorQuery::Create {
			name: "echo".into(),
			key: vec![],
			input: None,
			region: None,
		};
		let id = resolve(&query, &driver).await.unwrap();
		assert_eq!(id, ActorId::from("created-id"));
	}

	#[test]
	fn rewrite_to_resolved_is_idempotent_afterwards() {
		let mut query = ActorQuery::GetForKey {
			name: "echo".into(),
			key: vec!["k".into()],
		};
		query.rewrite_to_resolved(ActorId::from("A"));
		assert!(matches!(query, ActorQuery::GetForId { .. }));
	}

	#[test]
	fn create_query_is_not_resolvable_to_an_existing_id() {
		let query = ActorQuery::Create {
			name: "echo".into(),
			key: vec![],
			input: None,
			region: None,
		};
		assert!(query.is_create());
	}
}
