//! Client session core: the stateless action handle (C6), the queue sender & proxy (C5), and
//! the persistent auto-reconnecting actor connection (C7).

pub mod connection;
pub mod errors;
pub mod handle;
pub mod metrics;
pub mod queue;
pub mod wire;

pub use connection::{ActorConnection, ConnectionState};
pub use errors::{is_scheduling_error, ClientError};
pub use handle::ActorHandle;
pub use queue::{QueueEntry, QueueProxy, QueueSendOptions, QueueSendOutcome, QueueStatus};
