//! Deterministic, single-threaded behavior scheduling primitives.
//!
//! An [`ActionScheduler`] owns per-priority FIFO queues and the running set,
//! guards shared agent capabilities with an all-or-nothing [`ResourceLock`],
//! and preempts less urgent work when CRITICAL or HIGH actions arrive. The
//! host calls [`ActionScheduler::tick`] once per clock tick; there are no
//! threads and no locks, so a multi-threaded host must own the scheduler from
//! a single task.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod action;
pub mod history;
pub mod priority;
pub mod registry;
pub mod resource;
pub mod scheduler;
pub mod status;
pub mod task;
pub mod tick;

pub use action::{
    Action, ActionFault, ActionId, ActionResult, ActionState, ActionStatus, FailureKind,
};
pub use history::{ActionHistory, HistoryEntry, HistoryEvent};
pub use priority::ActionPriority;
pub use registry::{ActionFactory, ActionProfile, ActionRegistry, BuildError};
pub use resource::{LockConflict, ResourceLock, ResourceSet, ResourceTag};
pub use scheduler::{ActionScheduler, FinishedAction};
pub use status::{LockSummary, RunningSummary, SchedulerStatus};
pub use task::{Task, TaskId};
pub use tick::{TickBudget, TickContext};
