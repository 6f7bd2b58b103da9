//! Optional workflow history view (§4.8): a read-only projection of a workflow's recorded
//! history and metadata, exposed for inspection rather than replay. Reads straight through the
//! same [`rivetkit_workflow::WorkflowDriver`] the engine itself persists through, the inspector
//! never opens its own copy of history.

use std::sync::Arc;

use rivetkit_workflow::{EntryMetadata, HistoryEntry, WorkflowDriver};

use crate::error::InspectorError;

#[derive(Debug, Clone)]
pub struct WorkflowHistoryEntryView {
	pub entry: HistoryEntry,
	pub metadata: EntryMetadata,
}

pub struct WorkflowHistoryView {
	driver: Arc<dyn WorkflowDriver>,
	workflow_id: String,
}

impl WorkflowHistoryView {
	pub fn new(driver: Arc<dyn WorkflowDriver>, workflow_id: impl Into<String>) -> Self {
		WorkflowHistoryView {
			driver,
			workflow_id: workflow_id.into(),
		}
	}

	pub async fn entries(&self) -> Result<Vec<WorkflowHistoryEntryView>, InspectorError> {
		let loaded = self.driver.load_history(&self.workflow_id).await?;
		let mut entries: Vec<WorkflowHistoryEntryView> = loaded
			.into_iter()
			.map(|(entry, metadata)| WorkflowHistoryEntryView { entry, metadata })
			.collect();
		entries.sort_by_key(|view| view.entry.id);
		Ok(entries)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use rivetkit_workflow::{EntryKind, FlushBatch, WorkflowError};

	struct FixedDriver;

	#[async_trait]
	impl WorkflowDriver for FixedDriver {
		async fn load_history(
			&self,
			_workflow_id: &str,
		) -> Result<Vec<(HistoryEntry, EntryMetadata)>, WorkflowError> {
			Ok(vec![
				(
					HistoryEntry {
						id: 1,
						location_key: "b".into(),
						kind: EntryKind::RollbackCheckpoint,
					},
					EntryMetadata::default(),
				),
				(
					HistoryEntry {
						id: 0,
						location_key: "a".into(),
						kind: EntryKind::Step {
							output: None,
							error: None,
						},
					},
					EntryMetadata::default(),
				),
			])
		}

		async fn flush(&self, _workflow_id: &str, _batch: FlushBatch) -> Result<(), WorkflowError> {
			Ok(())
		}

		async fn delete_prefix(&self, _workflow_id: &str, _prefix: &str) -> Result<(), WorkflowError> {
			Ok(())
		}

		async fn set_alarm(&self, _workflow_id: &str, _deadline_ts: i64) -> Result<(), WorkflowError> {
			Ok(())
		}

		fn now_ts(&self) -> i64 {
			0
		}

		fn poll_interval_ms(&self) -> i64 {
			1000
		}
	}

	#[tokio::test]
	async fn entries_are_returned_in_id_order_regardless_of_load_order() {
		let view = WorkflowHistoryView::new(Arc::new(FixedDriver), "wf-1");
		let entries = view.entries().await.unwrap();
		assert_eq!(entries[0].entry.id, 0);
		assert_eq!(entries[1].entry.id, 1);
	}
}
