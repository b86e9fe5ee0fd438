use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::{ActionId, ActionPriority, ActionState, ResourceSet, ResourceTag};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RunningSummary {
    pub id: ActionId,
    pub kind: String,
    pub description: String,
    pub priority: ActionPriority,
    pub state: ActionState,
    pub resources: ResourceSet,
    pub ticks: u64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct LockSummary {
    pub tag: ResourceTag,
    pub holder: ActionId,
    pub description: String,
}

/// Read-only operator snapshot of the scheduler.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SchedulerStatus {
    pub tick: u64,
    pub running: Vec<RunningSummary>,
    /// Queue depth per level, most urgent first. Includes empty levels.
    pub queued: Vec<(ActionPriority, usize)>,
    pub locks: Vec<LockSummary>,
}

impl SchedulerStatus {
    pub fn queued_total(&self) -> usize {
        self.queued.iter().map(|(_, n)| n).sum()
    }
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Action Scheduler Status (tick {}) ===", self.tick)?;
        writeln!(f, "Running actions: {}", self.running.len())?;
        for r in &self.running {
            writeln!(
                f,
                "  - {} {} [{}] {} ticks, holds {}",
                r.id,
                r.description,
                r.priority.name(),
                r.ticks,
                r.resources
            )?;
        }

        writeln!(f, "Queued actions: {}", self.queued_total())?;
        for (priority, depth) in &self.queued {
            if *depth > 0 {
                writeln!(f, "  {priority}: {depth}")?;
            }
        }

        if self.locks.is_empty() {
            writeln!(f, "No resources locked")
        } else {
            writeln!(f, "Locked resources:")?;
            for lock in &self.locks {
                writeln!(f, "  {} -> {} {}", lock.tag, lock.holder, lock.description)?;
            }
            Ok(())
        }
    }
}
