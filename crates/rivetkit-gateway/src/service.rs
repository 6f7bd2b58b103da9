//! Wires routing decisions to the driver's proxy operations. This is the piece a binary embeds
//! behind its own `axum`/`hyper` listener; the listener itself is out of scope here (§1
//! Non-goals: "the HTTP transport library").

use std::sync::Arc;

use bytes::Bytes;
use rivetkit_config::Gateway as GatewayConfig;
use rivetkit_driver::{ActorId, ManagerDriver};
use tracing::instrument;

use crate::{
	auth::AuthHook,
	errors::GatewayError,
	router::{resolve_http_route, resolve_websocket_route, ResolvedRoute, STRIPPED_HEADERS},
};

pub struct GatewayService<D, A> {
	config: GatewayConfig,
	driver: Arc<D>,
	auth: Arc<A>,
}

impl<D, A> GatewayService<D, A>
where
	D: ManagerDriver,
	A: AuthHook,
{
	pub fn new(config: GatewayConfig, driver: Arc<D>, auth: Arc<A>) -> Self {
		GatewayService { config, driver, auth }
	}

	fn strip_base_path<'a>(&self, path_and_query: &'a str) -> &'a str {
		let base = self.config.base_path();
		if base.is_empty() {
			path_and_query
		} else {
			path_and_query.strip_prefix(base).unwrap_or(path_and_query)
		}
	}

	/// Routes and forwards a plain HTTP request. `Ok(None)` means no addressing mode matched -
	/// the caller should dispatch to its next middleware rather than treat this as an error.
	#[instrument(skip_all, fields(path = %path_and_query))]
	pub async fn handle_http(
		&self,
		path_and_query: &str,
		target_header: Option<&str>,
		actor_header: Option<&str>,
		mut request: http::Request<Bytes>,
	) -> Result<Option<http::Response<Bytes>>, GatewayError> {
		let stripped = self.strip_base_path(path_and_query);
		let Some(route) = resolve_http_route(stripped, target_header, actor_header)? else {
			return Ok(None);
		};

		self.auth
			.authorize(&route)
			.await
			.map_err(|_| GatewayError::MissingActorHeader)?;

		strip_routing_headers(&mut request);
		*request.uri_mut() = route
			.remaining_path
			.parse()
			.unwrap_or_else(|_| http::Uri::from_static("/"));

		let actor_id = ActorId::from(route.actor_id);
		let response = self.driver.proxy_request(&actor_id, request).await?;
		Ok(Some(response))
	}

	/// Resolves routing for a WebSocket upgrade without performing the upgrade itself, the
	/// caller owns the actual upgrade handshake and hands the resulting duplex stream to
	/// [`rivetkit_driver::ManagerDriver::proxy_websocket`].
	#[instrument(skip_all, fields(path = %path_and_query))]
	pub fn resolve_websocket(
		&self,
		path_and_query: &str,
		protocols: &[&str],
	) -> Result<Option<ResolvedRoute>, GatewayError> {
		let stripped = self.strip_base_path(path_and_query);
		resolve_websocket_route(stripped, protocols)
	}
}

fn strip_routing_headers(request: &mut http::Request<Bytes>) {
	for header in STRIPPED_HEADERS {
		request.headers_mut().remove(header);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::auth::NoopAuthHook;
	use async_trait::async_trait;
	use rivetkit_driver::{ActorRecord, DriverError, DuplexByteStream, ListActorsQuery};
	use rivetkit_protocol::{Encoding, Payload};

	struct StubDriver;

	#[async_trait]
	impl ManagerDriver for StubDriver {
		async fn get_for_id(&self, _name: &str, id: &ActorId) -> Result<ActorRecord, DriverError> {
			Ok(ActorRecord {
				actor_id: id.clone(),
				name: "echo".into(),
				key: vec![],
				create_ts: Some(0),
				start_ts: None,
				connectable_ts: None,
				sleep_ts: None,
				destroy_ts: None,
				error: None,
			})
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
			actor_id: &ActorId,
			request: http::Request<Bytes>,
		) -> Result<http::Response<Bytes>, DriverError> {
			assert!(!request.headers().contains_key(X_RIVET_ACTOR_HEADER_FOR_TEST));
			Ok(http::Response::builder()
				.header("x-routed-to", actor_id.as_str())
				.body(Bytes::new())
				.unwrap())
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

	const X_RIVET_ACTOR_HEADER_FOR_TEST: &str = "x-rivet-actor";

	#[tokio::test]
	async fn path_based_route_strips_headers_and_proxies() {
		let service = GatewayService::new(
			GatewayConfig::default(),
			Arc::new(StubDriver),
			Arc::new(NoopAuthHook),
		);
		let request = http::Request::builder()
			.header(X_RIVET_ACTOR_HEADER_FOR_TEST, "actor-Y")
			.body(Bytes::new())
			.unwrap();

		let response = service
			.handle_http("/gateway/actor-X/foo", Some("actor"), Some("actor-Y"), request)
			.await
			.unwrap()
			.unwrap();

		assert_eq!(response.headers().get("x-routed-to").unwrap(), "actor-X");
	}

	#[tokio::test]
	async fn unmatched_route_returns_none() {
		let service = GatewayService::new(
			GatewayConfig::default(),
			Arc::new(StubDriver),
			Arc::new(NoopAuthHook),
		);
		let request = http::Request::builder().body(Bytes::new()).unwrap();
		let response = service.handle_http("/unrelated", None, None, request).await.unwrap();
		assert!(response.is_none());
	}
}
