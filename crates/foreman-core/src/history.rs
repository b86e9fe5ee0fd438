use std::collections::VecDeque;
use std::fmt::Write as _;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{ActionId, ActionPriority};

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum HistoryEvent {
    Scheduled,
    Started,
    Completed,
    Failed,
    Preempted,
    Interrupted,
    Faulted,
}

impl HistoryEvent {
    pub fn label(self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Preempted => "PREEMPTED",
            Self::Interrupted => "INTERRUPTED",
            Self::Faulted => "FAULTED",
        }
    }
}

/// One lifecycle transition, recorded for debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryEntry {
    pub tick: u64,
    pub action: ActionId,
    pub priority: ActionPriority,
    pub description: String,
    pub event: HistoryEvent,
}

/// Bounded ring of recent lifecycle transitions; oldest entries fall off.
#[derive(Debug, Clone)]
pub struct ActionHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl ActionHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Events recorded for one action, oldest first.
    pub fn events_for(&self, action: ActionId) -> Vec<HistoryEvent> {
        self.entries
            .iter()
            .filter(|e| e.action == action)
            .map(|e| e.event)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn summary(&self) -> String {
        let mut out = String::from("Action history:\n");
        for entry in &self.entries {
            let _ = writeln!(
                out,
                "[tick {}] {} - {} {}",
                entry.tick,
                entry.event.label(),
                entry.action,
                entry.description
            );
        }
        out
    }
}

impl Default for ActionHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}
