use std::collections::HashMap;

use rivetkit_protocol::{ApiError, ErrorShape};

use crate::location::Location;

/// A suspension request, thrown through the stack by design (§9 "Exceptions for control
/// flow") so it can unwind arbitrarily deep `join`/`race`/`loop` nesting in one motion. The
/// engine catches [`WorkflowError::Yield`] specifically and schedules a resumption; every other
/// variant is a genuine failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Yield {
	Sleep {
		deadline_ts: i64,
		/// Message names the caller would also accept while asleep (race merges these in).
		names: Vec<String>,
	},
	MessageWait {
		names: Vec<String>,
	},
}

impl Yield {
	pub fn deadline_ts(&self) -> Option<i64> {
		match self {
			Yield::Sleep { deadline_ts, .. } => Some(*deadline_ts),
			Yield::MessageWait { .. } => None,
		}
	}

	pub fn names(&self) -> &[String] {
		match self {
			Yield::Sleep { names, .. } => names,
			Yield::MessageWait { names } => names,
		}
	}

	/// Race's yield-merge rule (§4.10 "Race"): prefer `Sleep` over `MessageWait`, taking the
	/// earliest deadline; message name sets are unioned regardless of which variant wins.
	pub fn merge(self, other: Yield) -> Yield {
		let mut names = self.names().to_vec();
		for name in other.names() {
			if !names.contains(name) {
				names.push(name.clone());
			}
		}
		match (self.deadline_ts(), other.deadline_ts()) {
			(Some(a), Some(b)) => Yield::Sleep {
				deadline_ts: a.min(b),
				names,
			},
			(Some(deadline_ts), None) | (None, Some(deadline_ts)) => Yield::Sleep { deadline_ts, names },
			(None, None) => Yield::MessageWait { names },
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
	/// Control flow, not failure, see [`Yield`].
	#[error("yield: {0:?}")]
	Yield(Yield),

	#[error("workflow evicted")]
	Evicted,

	#[error("operation called while another is already in progress at {0}")]
	EntryInProgress(Location),

	#[error("history divergence at {location}: {reason}")]
	HistoryDivergence { location: Location, reason: String },

	#[error("step {name:?} failed after {attempts} attempt(s): {cause}")]
	StepFailed {
		name: String,
		attempts: u32,
		cause: String,
	},

	#[error("step {name:?} exhausted its retry budget after {attempts} attempt(s)")]
	StepExhausted { name: String, attempts: u32 },

	#[error("step {name:?} timed out")]
	StepTimeout { name: String },

	/// Non-retryable: the workflow aborts immediately without consuming further retries.
	#[error("critical error: {0}")]
	Critical(String),

	/// Raised by a rollback handler; aborts the remaining rollback chain.
	#[error("rollback error: {0}")]
	Rollback(String),

	#[error("step {0:?} declared a rollback handler with no rollbackCheckpoint in scope")]
	RollbackCheckpointMissing(String),

	/// Rollback short-circuit: a step's forward-only entry is missing during a rollback replay
	/// (§9 open question, treated as short-circuit, not error).
	#[error("rollback stopped: no forward entry for {0:?}")]
	RollbackStop(String),

	#[error("join {name:?} had failing branches: {errors:?}")]
	Join {
		name: String,
		errors: HashMap<String, String>,
	},

	#[error("race {name:?} had failing branches: {errors:?}")]
	Race {
		name: String,
		errors: HashMap<String, String>,
	},

	#[error("duplicate name {0:?} in the same lexical scope")]
	DuplicateName(String),

	#[error("storage error: {0}")]
	Storage(String),

	#[error("message driver error: {0}")]
	MessageDriver(String),
}

impl WorkflowError {
	pub fn is_yield(&self) -> bool {
		matches!(self, WorkflowError::Yield(_))
	}

	pub fn as_yield(&self) -> Option<&Yield> {
		match self {
			WorkflowError::Yield(y) => Some(y),
			_ => None,
		}
	}

	/// Whether this error aborts the workflow outright rather than failing one step (§7:
	/// "Workflow `Critical` and `StepExhausted` abort the workflow; rollback handlers run in
	/// reverse").
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			WorkflowError::Critical(_) | WorkflowError::StepExhausted { .. } | WorkflowError::Evicted
		)
	}
}

impl From<serde_json::Error> for WorkflowError {
	fn from(err: serde_json::Error) -> Self {
		WorkflowError::Storage(err.to_string())
	}
}

impl ApiError for WorkflowError {
	fn group(&self) -> &'static str {
		"workflow"
	}

	fn code(&self) -> &'static str {
		match self {
			WorkflowError::Yield(_) => "yield",
			WorkflowError::Evicted => "evicted",
			WorkflowError::EntryInProgress(_) => "entry_in_progress",
			WorkflowError::HistoryDivergence { .. } => "history_divergence",
			WorkflowError::StepFailed { .. } => "step_failed",
			WorkflowError::StepExhausted { .. } => "step_exhausted",
			WorkflowError::StepTimeout { .. } => "step_timeout",
			WorkflowError::Critical(_) => "critical",
			WorkflowError::Rollback(_) => "rollback",
			WorkflowError::RollbackCheckpointMissing(_) => "rollback_checkpoint_missing",
			WorkflowError::RollbackStop(_) => "rollback_stop",
			WorkflowError::Join { .. } => "join_failed",
			WorkflowError::Race { .. } => "race_failed",
			WorkflowError::DuplicateName(_) => "duplicate_name",
			WorkflowError::Storage(_) => "storage_error",
			WorkflowError::MessageDriver(_) => "message_driver_error",
		}
	}

	fn to_shape(&self) -> ErrorShape {
		ErrorShape::new(self.group(), self.code(), self.to_string())
	}
}
