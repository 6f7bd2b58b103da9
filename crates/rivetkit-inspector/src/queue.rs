//! `getQueueSize`/`getQueueStatus` (§4.8): read-only views over an actor's queued messages.

use serde::{Deserialize, Serialize};

use crate::traits::QueuedMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusMessage {
	pub id: String,
	pub queue_name: String,
	pub created_ts: i64,
}

/// `{size, maxSize, truncated, messages}` (§4.8), messages sorted by creation time ascending and
/// capped at `limit`. `size` is the true total even when `truncated` drops the tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
	pub size: usize,
	pub max_size: usize,
	pub truncated: bool,
	pub messages: Vec<QueueStatusMessage>,
}

pub fn status(messages: Vec<QueuedMessage>, limit: usize) -> QueueStatus {
	let mut sorted = messages;
	sorted.sort_by_key(|message| message.created_ts);
	let size = sorted.len();
	let truncated = size > limit;
	sorted.truncate(limit);

	QueueStatus {
		size,
		max_size: limit,
		truncated,
		messages: sorted
			.into_iter()
			.map(|message| QueueStatusMessage {
				id: message.id,
				queue_name: message.queue_name,
				created_ts: message.created_ts,
			})
			.collect(),
	}
}
