//! Actor identity, the query resolver (C2), and the pluggable manager driver contract (C3).

pub mod driver;
pub mod error;
pub mod identity;
pub mod manager_api;
pub mod metrics;
pub mod query;

pub use driver::{DuplexByteStream, ListActorsQuery, ManagerDriver, StreamEvent};
pub use error::DriverError;
pub use identity::{ActorId, ActorQuery, ActorRecord, TerminalError};
pub use query::resolve;
