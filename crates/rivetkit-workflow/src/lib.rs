//! Deterministic, replayable workflow engine (C9 storage/replay, C10 context): steps with
//! retries and timeouts, loops with periodic commit + history compaction, sleeps via scheduler
//! alarms, message waits, structured parallelism (join/race), and compensation via rollback
//! checkpoints.
//!
//! [`engine::execute_workflow`] runs one workflow once, to completion, suspension, or failure.
//! [`worker::Worker`] is the scheduler built on top of it (§5 "[ADDED]"): it polls a
//! [`driver::WorkflowDriver`] for due workflows and spawns one Tokio task per runnable workflow,
//! the way `gasoline::worker::Worker` polls storage on a fixed interval.

pub mod context;
pub mod driver;
pub mod engine;
pub mod error;
pub mod history;
pub mod location;
pub mod metrics;
pub mod storage;
pub mod worker;

pub use context::{BranchFn, Loop, Mode, RollbackFn, Step, StepRunError, WorkflowContext};
pub use driver::{FlushBatch, InboundMessage, MessageDriver, RunnableWorkflow, WorkflowDriver};
pub use engine::{execute_workflow, WorkflowOutcome};
pub use error::{Yield, WorkflowError};
pub use history::{BranchRecord, BranchStatus, EntryKind, EntryMetadata, HistoryEntry, SleepState};
pub use location::{Location, Segment};
pub use storage::HistoryStore;
pub use worker::{Registry, WorkflowFn};
