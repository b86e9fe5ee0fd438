//! Bounded failure log with derived per-kind and per-error counts.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::store::JsonlLog;

pub const FAILURE_SCHEMA: &str = "foreman.failures";
pub const FAILURE_SCHEMA_VERSION: u32 = 1;

/// One failed action, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub error: String,
    #[serde(default)]
    pub context: String,
}

impl FailureRecord {
    pub fn new(action: impl Into<String>, error: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            parameters: BTreeMap::new(),
            error: normalize_error(error),
            context: String::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} failed: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.action,
            self.error
        )
    }
}

/// Trim and collapse internal whitespace so equal messages count together.
pub fn normalize_error(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Append-only, capacity-bounded record of failed actions.
///
/// Counts are derived from the retained records: pruning the oldest record
/// decrements its kind and error counts.
#[derive(Debug)]
pub struct FailureTracker {
    agent: String,
    capacity: usize,
    records: VecDeque<FailureRecord>,
    by_action: BTreeMap<String, usize>,
    by_error: BTreeMap<String, usize>,
    log: Option<JsonlLog<FailureRecord>>,
    /// Record lines currently in the log file.
    lines_on_disk: usize,
}

impl FailureTracker {
    /// In-memory tracker.
    pub fn new(agent: impl Into<String>, capacity: usize) -> Self {
        Self {
            agent: agent.into(),
            capacity: capacity.max(1),
            records: VecDeque::new(),
            by_action: BTreeMap::new(),
            by_error: BTreeMap::new(),
            log: None,
            lines_on_disk: 0,
        }
    }

    /// Tracker backed by a JSONL log at `path`, loading what is already there.
    pub fn open(agent: impl Into<String>, path: &Path, capacity: usize) -> StoreResult<Self> {
        let log = JsonlLog::new(path, FAILURE_SCHEMA, FAILURE_SCHEMA_VERSION);
        let loaded = log.read_all()?;
        let on_disk = loaded.len();

        let mut tracker = Self::new(agent, capacity);
        for record in loaded {
            tracker.push(record);
        }
        tracker.log = Some(log);
        tracker.lines_on_disk = on_disk;

        if on_disk > tracker.records.len() {
            tracker.compact();
        }

        tracing::info!(
            agent = %tracker.agent,
            records = tracker.records.len(),
            path = %path.display(),
            "Loaded failure log"
        );
        Ok(tracker)
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record_failure(
        &mut self,
        action: &str,
        parameters: BTreeMap<String, String>,
        error: &str,
        context: &str,
    ) {
        self.record(
            FailureRecord::new(action, error)
                .with_parameters(parameters)
                .with_context(context),
        );
    }

    pub fn record(&mut self, mut record: FailureRecord) {
        record.error = normalize_error(&record.error);
        tracing::info!(
            agent = %self.agent,
            action = %record.action,
            error = %record.error,
            "Recorded failure"
        );

        if let Some(log) = &self.log {
            match log.append(&record) {
                Ok(()) => self.lines_on_disk += 1,
                Err(error) => tracing::warn!(%error, "Failed to append failure record"),
            }
        }

        self.push(record);

        if self.lines_on_disk >= self.capacity * 2 {
            self.compact();
        }
    }

    fn push(&mut self, record: FailureRecord) {
        *self.by_action.entry(record.action.clone()).or_default() += 1;
        *self.by_error.entry(record.error.clone()).or_default() += 1;
        self.records.push_back(record);

        while self.records.len() > self.capacity {
            if let Some(old) = self.records.pop_front() {
                decrement(&mut self.by_action, &old.action);
                decrement(&mut self.by_error, &old.error);
            }
        }
    }

    fn compact(&mut self) {
        let Some(log) = &self.log else {
            return;
        };
        match log.rewrite(self.records.iter()) {
            Ok(()) => {
                tracing::debug!(
                    agent = %self.agent,
                    dropped = self.lines_on_disk.saturating_sub(self.records.len()),
                    "Compacted failure log"
                );
                self.lines_on_disk = self.records.len();
            }
            Err(error) => tracing::warn!(%error, "Failed to compact failure log"),
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &FailureRecord> {
        self.records.iter()
    }

    pub fn failures_for(&self, action: &str) -> Vec<&FailureRecord> {
        self.records.iter().filter(|r| r.action == action).collect()
    }

    /// The last `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&FailureRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).collect()
    }

    pub fn failure_count(&self, action: &str) -> usize {
        self.by_action.get(action).copied().unwrap_or(0)
    }

    pub fn error_count(&self, error: &str) -> usize {
        self.by_error
            .get(&normalize_error(error))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_failures(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Action kinds by descending failure count, ties by name.
    pub fn most_common_failures(&self, n: usize) -> Vec<(String, usize)> {
        top_n(&self.by_action, n)
    }

    /// Normalized error messages by descending count, ties by message.
    pub fn most_common_errors(&self, n: usize) -> Vec<(String, usize)> {
        top_n(&self.by_error, n)
    }

    /// Whether `action` appears among the last `n` records.
    pub fn has_recent_failure(&self, action: &str, n: usize) -> bool {
        self.recent(n).iter().any(|r| r.action == action)
    }

    /// Share of the last `n` records that are failures of `action`, in percent.
    pub fn failure_rate(&self, action: &str, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        let hits = self.recent(n).iter().filter(|r| r.action == action).count();
        hits as f64 * 100.0 / n as f64
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_action.clear();
        self.by_error.clear();
        self.compact();
    }

    pub fn summary(&self) -> String {
        if self.records.is_empty() {
            return "No failures recorded yet.".to_string();
        }

        let mut out = format!(
            "Failure summary for '{}':\nTotal failures: {}\n\nMost common failed actions:\n",
            self.agent,
            self.total_failures()
        );
        for (action, count) in self.most_common_failures(5) {
            out.push_str(&format!("  - {action}: {count} times\n"));
        }
        out.push_str("\nMost common errors:\n");
        for (error, count) in self.most_common_errors(5) {
            out.push_str(&format!("  - {error}: {count} times\n"));
        }
        out
    }
}

fn decrement(counts: &mut BTreeMap<String, usize>, key: &str) {
    if let Some(count) = counts.get_mut(key) {
        *count -= 1;
        if *count == 0 {
            counts.remove(key);
        }
    }
}

fn top_n(counts: &BTreeMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut entries: Vec<(String, usize)> =
        counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    // BTreeMap order already breaks ties by label; the sort is stable.
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.truncate(n);
    entries
}
