use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

use crate::errors::ClientError;

pub struct InFlightEntry {
	pub name: String,
	pub resolver: oneshot::Sender<Result<rivetkit_protocol::Payload, ClientError>>,
}

/// Mapping from a monotonically assigned 64-bit request id to its pending resolver (§3
/// "In-flight action table"). Unique per connection; ids are never reused; the table is cleared
/// wholesale on dispose.
#[derive(Default)]
pub struct InFlightTable {
	next_id: AtomicU64,
	entries: HashMap<u64, InFlightEntry>,
}

impl InFlightTable {
	pub fn next_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::Relaxed)
	}

	pub fn insert(&mut self, id: u64, entry: InFlightEntry) {
		self.entries.insert(id, entry);
	}

	pub fn remove(&mut self, id: u64) -> Option<InFlightEntry> {
		self.entries.remove(&id)
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Rejects every pending entry with `error`, clearing the table. Used on connection-level
	/// error and on dispose.
	pub fn fail_all(&mut self, make_error: impl Fn() -> ClientError) {
		for (_, entry) in self.entries.drain() {
			let _ = entry.resolver.send(Err(make_error()));
		}
	}
}
