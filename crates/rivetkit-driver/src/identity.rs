use rivetkit_protocol::Payload;
use serde::{Deserialize, Serialize};

/// Opaque, globally unique actor identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for ActorId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for ActorId {
	fn from(s: String) -> Self {
		ActorId(s)
	}
}

impl From<&str> for ActorId {
	fn from(s: &str) -> Self {
		ActorId(s.to_string())
	}
}

/// A terminal error recorded against an actor that failed to start, crashed, or was otherwise
/// rejected, surfaced via scheduling-error enrichment (§7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerminalError {
	pub group: String,
	pub code: String,
	pub message: String,
}

/// Identity + lifecycle view of an actor as returned by the driver's identity operations (§3
/// "Actor identity").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRecord {
	pub actor_id: ActorId,
	pub name: String,
	pub key: Vec<String>,
	pub create_ts: Option<i64>,
	pub start_ts: Option<i64>,
	pub connectable_ts: Option<i64>,
	pub sleep_ts: Option<i64>,
	pub destroy_ts: Option<i64>,
	pub error: Option<TerminalError>,
}

impl ActorRecord {
	pub fn is_destroyed(&self) -> bool {
		self.destroy_ts.is_some()
	}

	pub fn is_sleeping(&self) -> bool {
		self.sleep_ts.is_some() && self.destroy_ts.is_none()
	}
}

/// A tagged variant describing how to obtain an actor id (§3 "Actor query").
///
/// `getForId`/`getForKey` fail with [`crate::DriverError::ActorNotFound`] on a miss;
/// `getOrCreateForKey`/`create` never do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActorQuery {
	GetForId {
		name: String,
		id: ActorId,
	},
	GetForKey {
		name: String,
		key: Vec<String>,
	},
	GetOrCreateForKey {
		name: String,
		key: Vec<String>,
		#[serde(skip_serializing_if = "Option::is_none")]
		input: Option<Payload>,
		#[serde(skip_serializing_if = "Option::is_none")]
		region: Option<String>,
	},
	Create {
		name: String,
		key: Vec<String>,
		#[serde(skip_serializing_if = "Option::is_none")]
		input: Option<Payload>,
		#[serde(skip_serializing_if = "Option::is_none")]
		region: Option<String>,
	},
}

impl ActorQuery {
	pub fn name(&self) -> &str {
		match self {
			ActorQuery::GetForId { name, .. }
			| ActorQuery::GetForKey { name, .. }
			| ActorQuery::GetOrCreateForKey { name, .. }
			| ActorQuery::Create { name, .. } => name,
		}
	}

	/// `create` queries cannot identify a pre-existing actor, so a caller holding one can never
	/// rewrite it to `getForId` (§4.6 "Calling `resolve()` on a `create` query is rejected").
	pub fn is_create(&self) -> bool {
		matches!(self, ActorQuery::Create { .. })
	}

	/// Rewrites this query to `getForId` after a successful resolution, the idempotent-rewrite
	/// rule from §3: "Unresolved queries are rewritten to `getForId` after their first successful
	/// resolution to make subsequent calls idempotent."
	pub fn rewrite_to_resolved(&mut self, id: ActorId) {
		let name = self.name().to_string();
		*self = ActorQuery::GetForId { name, id };
	}
}
