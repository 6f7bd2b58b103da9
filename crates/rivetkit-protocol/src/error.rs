use serde::{Deserialize, Serialize};

/// Uniform shape for every user-visible failure in the core: `{group, code, message, metadata?}`.
///
/// Implemented by hand rather than via a derive macro (contrast the `RivetError`-style derive
/// used elsewhere in this codebase) to keep this crate's proc-macro surface at zero.
pub trait ApiError: std::error::Error {
	fn group(&self) -> &'static str;
	fn code(&self) -> &'static str;
	fn message(&self) -> String {
		self.to_string()
	}
	fn metadata(&self) -> Option<serde_json::Value> {
		None
	}

	fn to_shape(&self) -> ErrorShape {
		ErrorShape {
			group: self.group().to_string(),
			code: self.code().to_string(),
			message: self.message(),
			metadata: self.metadata(),
		}
	}
}

/// The wire shape of an `ApiError`, also used standalone when an error arrives over the network
/// and there's no local Rust type to attach to it (e.g. a close frame from a peer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorShape {
	pub group: String,
	pub code: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metadata: Option<serde_json::Value>,
}

impl ErrorShape {
	pub fn new(group: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
		ErrorShape {
			group: group.into(),
			code: code.into(),
			message: message.into(),
			metadata: None,
		}
	}

	pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
		self.metadata = Some(metadata);
		self
	}

	/// The closed set of `(group, code)` pairs that mean "this actor is not currently
	/// schedulable", scheduling-class errors per the error taxonomy. Whenever one of these is
	/// observed, callers should enrich the error with the actor's terminal error record.
	pub fn is_scheduling_error(&self) -> bool {
		matches!(
			(self.group.as_str(), self.code.as_str()),
			("actor", "destroyed")
				| ("actor", "sleeping")
				| ("actor", "lost")
				| ("actor", "create_failed")
				| ("deploy", "rejected")
		)
	}
}

impl std::fmt::Display for ErrorShape {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "[{}.{}] {}", self.group, self.code, self.message)
	}
}

impl std::error::Error for ErrorShape {}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
	#[error("unsupported protocol version: {0}")]
	UnsupportedVersion(u8),
	#[error("message truncated, missing version byte")]
	Truncated,
	#[error("failed to serialize message: {0}")]
	Serialize(String),
	#[error("failed to deserialize message: {0}")]
	Deserialize(String),
	#[error("invalid payload: {0}")]
	InvalidPayload(String),
	#[error("schema validation failed: {0}")]
	SchemaInvalid(String),
}

impl ApiError for ProtocolError {
	fn group(&self) -> &'static str {
		"protocol"
	}

	fn code(&self) -> &'static str {
		match self {
			ProtocolError::UnsupportedVersion(_) => "unsupported_version",
			ProtocolError::Truncated => "truncated",
			ProtocolError::Serialize(_) => "serialize_failed",
			ProtocolError::Deserialize(_) => "deserialize_failed",
			ProtocolError::InvalidPayload(_) => "invalid_payload",
			ProtocolError::SchemaInvalid(_) => "schema_invalid",
		}
	}
}
