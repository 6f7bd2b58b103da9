//! Combines path-based and header/subprotocol-based addressing into one routing decision
//! (§4.4). Path-based always wins when present; otherwise the mode is chosen by request kind
//! (plain HTTP uses the header pair, a WebSocket upgrade uses the subprotocol list).

use rivetkit_protocol::Encoding;

use crate::{
	errors::GatewayError,
	headers::{parse_header_routing, parse_subprotocol_routing, X_RIVET_ACTOR, X_RIVET_TARGET},
	metrics,
	path::parse_actor_path,
};

/// Headers that carried routing metadata and must never reach the proxied actor.
pub const STRIPPED_HEADERS: [&str; 2] = [X_RIVET_TARGET, X_RIVET_ACTOR];

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRoute {
	pub actor_id: String,
	pub token: Option<String>,
	pub encoding: Option<Encoding>,
	pub conn_params: Option<serde_json::Value>,
	/// Path (plus any query string) to forward to the actor after routing metadata is removed.
	pub remaining_path: String,
}

/// Resolves routing for a plain HTTP request against `path_and_query` and the two routing
/// headers. `Ok(None)` means neither addressing mode matched, dispatch to the next middleware.
pub fn resolve_http_route(
	path_and_query: &str,
	target_header: Option<&str>,
	actor_header: Option<&str>,
) -> Result<Option<ResolvedRoute>, GatewayError> {
	if let Some(parsed) = parse_actor_path(path_and_query) {
		metrics::ROUTE_TOTAL.with_label_values(&["path", "matched"]).inc();
		return Ok(Some(ResolvedRoute {
			actor_id: parsed.actor_id,
			token: parsed.token,
			encoding: None,
			conn_params: None,
			remaining_path: parsed.remaining_path,
		}));
	}

	match parse_header_routing(target_header, actor_header) {
		Some(Ok(routing)) => {
			metrics::ROUTE_TOTAL.with_label_values(&["header", "matched"]).inc();
			Ok(Some(ResolvedRoute {
				actor_id: routing.actor_id,
				token: None,
				encoding: routing.encoding,
				conn_params: routing.conn_params,
				remaining_path: path_and_query.to_string(),
			}))
		}
		Some(Err(())) => {
			metrics::ROUTE_TOTAL.with_label_values(&["header", "error"]).inc();
			Err(GatewayError::MissingActorHeader)
		}
		None => {
			metrics::ROUTE_TOTAL.with_label_values(&["none", "unmatched"]).inc();
			Ok(None)
		}
	}
}

/// Resolves routing for a WebSocket upgrade against `path_and_query` and the negotiated
/// subprotocol list.
pub fn resolve_websocket_route(
	path_and_query: &str,
	protocols: &[&str],
) -> Result<Option<ResolvedRoute>, GatewayError> {
	if let Some(parsed) = parse_actor_path(path_and_query) {
		metrics::ROUTE_TOTAL.with_label_values(&["path", "matched"]).inc();
		return Ok(Some(ResolvedRoute {
			actor_id: parsed.actor_id,
			token: parsed.token,
			encoding: None,
			conn_params: None,
			remaining_path: parsed.remaining_path,
		}));
	}

	match parse_subprotocol_routing(protocols) {
		Some(Ok(routing)) => {
			metrics::ROUTE_TOTAL.with_label_values(&["header", "matched"]).inc();
			Ok(Some(ResolvedRoute {
				actor_id: routing.actor_id,
				token: None,
				encoding: routing.encoding,
				conn_params: routing.conn_params,
				remaining_path: path_and_query.to_string(),
			}))
		}
		Some(Err(())) => {
			metrics::ROUTE_TOTAL.with_label_values(&["header", "error"]).inc();
			Err(GatewayError::MissingActorHeader)
		}
		None => {
			metrics::ROUTE_TOTAL.with_label_values(&["none", "unmatched"]).inc();
			Ok(None)
		}
	}
}
