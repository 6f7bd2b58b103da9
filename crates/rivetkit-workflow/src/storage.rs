use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::driver::{FlushBatch, WorkflowDriver};
use crate::error::WorkflowError;
use crate::history::{EntryKind, EntryMetadata, HistoryEntry};
use crate::location::Location;

/// The active execution's in-memory history, dirty-tracked against the underlying driver (§4.9).
///
/// Entries live keyed by `locationToKey(location)`; metadata lives keyed by entry id. A flush
/// writes every dirty entry/metadata pair in one batch and clears the dirty flags, see
/// [`HistoryStore::flush`].
pub struct HistoryStore {
	workflow_id: String,
	driver: Arc<dyn WorkflowDriver>,
	entries: HashMap<String, HistoryEntry>,
	metadata: HashMap<u64, EntryMetadata>,
	dirty_entries: HashSet<String>,
	dirty_metadata: HashSet<u64>,
	/// Keys touched during the current execution, used for end-of-scope divergence detection
	/// (§4.10 "Before returning control at the end of a scope...").
	visited: HashSet<String>,
	next_id: u64,
}

impl HistoryStore {
	pub async fn load(workflow_id: String, driver: Arc<dyn WorkflowDriver>) -> Result<Self, WorkflowError> {
		let loaded = driver.load_history(&workflow_id).await?;
		let mut entries = HashMap::new();
		let mut metadata = HashMap::new();
		let mut next_id = 0;
		for (entry, meta) in loaded {
			next_id = next_id.max(entry.id + 1);
			metadata.insert(entry.id, meta);
			entries.insert(entry.location_key.clone(), entry);
		}
		Ok(HistoryStore {
			workflow_id,
			driver,
			entries,
			metadata,
			dirty_entries: HashSet::new(),
			dirty_metadata: HashSet::new(),
			visited: HashSet::new(),
			next_id,
		})
	}

	pub fn driver(&self) -> &Arc<dyn WorkflowDriver> {
		&self.driver
	}

	pub fn get(&self, location: &Location) -> Option<&HistoryEntry> {
		self.entries.get(&crate::location::location_to_key(location))
	}

	pub fn metadata_for(&self, entry_id: u64) -> EntryMetadata {
		self.metadata.get(&entry_id).cloned().unwrap_or_default()
	}

	pub fn mark_visited(&mut self, location: &Location) {
		self.visited.insert(crate::location::location_to_key(location));
	}

	/// Registers a brand-new entry at `location`. Panics (via the caller's own uniqueness check)
	/// are never reached here, callers must have already validated that `location` is unvisited
	/// before calling this.
	pub fn insert(&mut self, location: &Location, kind: EntryKind) -> u64 {
		let key = crate::location::location_to_key(location);
		let id = self.next_id;
		self.next_id += 1;
		self.entries.insert(
			key.clone(),
			HistoryEntry {
				id,
				location_key: key.clone(),
				kind,
			},
		);
		self.dirty_entries.insert(key.clone());
		self.metadata.insert(id, EntryMetadata::default());
		self.dirty_metadata.insert(id);
		self.visited.insert(key);
		id
	}

	pub fn update_kind(&mut self, location: &Location, kind: EntryKind) {
		let key = crate::location::location_to_key(location);
		if let Some(entry) = self.entries.get_mut(&key) {
			entry.kind = kind;
			self.dirty_entries.insert(key);
		}
	}

	pub fn update_metadata(&mut self, entry_id: u64, f: impl FnOnce(&mut EntryMetadata)) {
		let meta = self.metadata.entry(entry_id).or_default();
		f(meta);
		self.dirty_metadata.insert(entry_id);
	}

	/// Every location key currently recorded that sits directly under `scope`'s prefix -
	/// divergence detection's "the set of keys that must be visited on replay is fixed by
	/// history" (§3 invariants).
	pub fn recorded_children_of(&self, scope: &Location) -> Vec<String> {
		self.entries
			.keys()
			.filter(|key| {
				let prefix = format!("{scope}");
				if scope.segments().is_empty() {
					!key.is_empty()
				} else {
					key.starts_with(&prefix) && *key != &prefix
				}
			})
			.cloned()
			.collect()
	}

	/// Divergence check: every recorded key under `scope` must have been visited this run
	/// (§4.10 "Divergence detection").
	pub fn assert_scope_complete(&self, scope: &Location) -> Result<(), WorkflowError> {
		for key in self.recorded_children_of(scope) {
			// Only check direct and nested children whose entry actually existed before this
			// run started re-executing the scope (i.e. everything currently in `entries`).
			if !self.visited.contains(&key) {
				return Err(WorkflowError::HistoryDivergence {
					location: scope.clone(),
					reason: format!("history entry {key:?} was not visited during replay"),
				});
			}
		}
		Ok(())
	}

	pub async fn flush(&mut self) -> Result<(), WorkflowError> {
		if self.dirty_entries.is_empty() && self.dirty_metadata.is_empty() {
			return Ok(());
		}
		let batch = FlushBatch {
			entries: self
				.dirty_entries
				.iter()
				.filter_map(|key| self.entries.get(key).cloned())
				.collect(),
			metadata: self
				.dirty_metadata
				.iter()
				.map(|id| (*id, self.metadata_for(*id)))
				.collect(),
		};
		self.driver.flush(&self.workflow_id, batch).await?;
		self.dirty_entries.clear();
		self.dirty_metadata.clear();
		Ok(())
	}

	/// Loop GC (§4.9 "forget-old-iterations"): deletes every entry under iterations
	/// `[0, current_iteration - history_keep)` of the loop at `loop_location`.
	pub async fn forget_old_iterations(
		&mut self,
		loop_location: &Location,
		current_iteration: u32,
		history_keep: u32,
	) -> Result<(), WorkflowError> {
		let cutoff = current_iteration.saturating_sub(history_keep);
		if cutoff == 0 {
			return Ok(());
		}
		for iteration in 0..cutoff {
			let prefix = crate::location::location_to_key(&loop_location.extend_iteration(iteration));
			self.driver.delete_prefix(&self.workflow_id, &prefix).await?;
			self.entries.retain(|key, _| !key.starts_with(&prefix));
		}
		Ok(())
	}

	/// Race cleanup (§4.10 "Race": "Entries under non-winning branch locations are deleted").
	pub async fn delete_branch(&mut self, branch_location: &Location) -> Result<(), WorkflowError> {
		let prefix = crate::location::location_to_key(branch_location);
		self.driver.delete_prefix(&self.workflow_id, &prefix).await?;
		self.entries.retain(|key, _| *key != prefix && !key.starts_with(&format!("{prefix}/")));
		Ok(())
	}

	pub fn now_ts(&self) -> i64 {
		self.driver.now_ts()
	}

	pub fn poll_interval_ms(&self) -> i64 {
		self.driver.poll_interval_ms()
	}
}
