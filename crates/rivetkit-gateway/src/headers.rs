//! Header- and subprotocol-based actor addressing (§4.4, §6.2).

use rivetkit_protocol::Encoding;

pub const X_RIVET_TARGET: &str = "x-rivet-target";
pub const X_RIVET_ACTOR: &str = "x-rivet-actor";

const WS_PROTOCOL_TARGET_PREFIX: &str = "target.";
const WS_PROTOCOL_ACTOR_PREFIX: &str = "actor.";
const WS_PROTOCOL_ENCODING_PREFIX: &str = "encoding.";
const WS_PROTOCOL_CONN_PARAMS_PREFIX: &str = "conn_params.";

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderRouting {
	pub actor_id: String,
	pub encoding: Option<Encoding>,
	pub conn_params: Option<serde_json::Value>,
}

/// Parses the HTTP header pair. Requires `x-rivet-target: actor`; `x-rivet-actor` must be
/// present once that's asserted (its absence is the caller's `MissingActorHeader`, not a
/// non-match, the target header alone already commits to this addressing mode).
pub fn parse_header_routing<'a>(
	target: Option<&'a str>,
	actor: Option<&'a str>,
) -> Option<Result<HeaderRouting, ()>> {
	if target != Some("actor") {
		return None;
	}
	match actor {
		Some(id) if !id.is_empty() => Some(Ok(HeaderRouting {
			actor_id: id.to_string(),
			encoding: None,
			conn_params: None,
		})),
		_ => Some(Err(())),
	}
}

/// Parses the `Sec-WebSocket-Protocol` entry list, extracting the reserved-prefix entries.
/// Returns `None` if no `target.actor` entry is present (not this addressing mode at all).
pub fn parse_subprotocol_routing(protocols: &[&str]) -> Option<Result<HeaderRouting, ()>> {
	let has_target = protocols
		.iter()
		.any(|p| *p == "target.actor" || p.strip_prefix(WS_PROTOCOL_TARGET_PREFIX) == Some("actor"));
	if !has_target {
		return None;
	}

	let actor_id = protocols
		.iter()
		.find_map(|p| p.strip_prefix(WS_PROTOCOL_ACTOR_PREFIX))
		.map(|s| s.to_string());

	let Some(actor_id) = actor_id else {
		return Some(Err(()));
	};
	if actor_id.is_empty() {
		return Some(Err(()));
	}

	let encoding = protocols
		.iter()
		.find_map(|p| p.strip_prefix(WS_PROTOCOL_ENCODING_PREFIX))
		.and_then(|s| s.parse::<Encoding>().ok());

	let conn_params = protocols
		.iter()
		.find_map(|p| p.strip_prefix(WS_PROTOCOL_CONN_PARAMS_PREFIX))
		.and_then(|encoded| urlencoding::decode(encoded).ok())
		.and_then(|decoded| serde_json::from_str(&decoded).ok());

	Some(Ok(HeaderRouting {
		actor_id,
		encoding,
		conn_params,
	}))
}
