//! Wire encoding, versioning, and the shared error shape for RivetKit's gateway, client, and
//! workflow engine. This crate has no knowledge of transports (WebSocket, HTTP) or of actor
//! addressing, it only knows how to turn [`message::ClientMessage`] / [`message::ServerMessage`]
//! into bytes and back, in either wire format.

pub mod encoding;
pub mod error;
pub mod message;
pub mod payload;

pub use encoding::{Encoding, PROTOCOL_VERSION};
pub use error::{ApiError, ErrorShape, ProtocolError};
pub use message::{ClientMessage, ServerMessage};
pub use payload::Payload;
