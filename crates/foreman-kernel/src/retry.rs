//! Adaptive retry ceilings and exponential backoff driven by failure history.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use foreman_core::{Task, TaskId};
use serde::Serialize;

use crate::config::RetryConfig;
use crate::learning::{FailureTracker, LearningSystem};

/// Millisecond wall clock used for backoff.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Per-task retry bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    pub last_retry_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum RetryVerdict {
    Retry,
    /// Backoff has not elapsed; ask again later. Does not count as an attempt.
    Defer { remaining_ms: u64 },
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryDecision {
    pub verdict: RetryVerdict,
    pub reason: String,
    /// Retries already made before this decision.
    pub attempt: u32,
    pub max_retries: u32,
    pub delay_ms: u64,
}

impl RetryDecision {
    pub fn should_retry(&self) -> bool {
        self.verdict == RetryVerdict::Retry
    }
}

impl fmt::Display for RetryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self.verdict {
            RetryVerdict::Retry => "YES",
            RetryVerdict::Defer { .. } => "LATER",
            RetryVerdict::GiveUp => "NO",
        };
        write!(
            f,
            "Retry: {} | Reason: {} | Attempt: {}/{} | Delay: {}ms",
            verdict, self.reason, self.attempt, self.max_retries, self.delay_ms
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryStatistics {
    pub active_retries: usize,
    pub total_failures_tracked: usize,
    pub average_retry_count: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AdaptiveRetryStrategy {
    config: RetryConfig,
    states: BTreeMap<TaskId, RetryState>,
}

impl AdaptiveRetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            states: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn rate(&self, tracker: &FailureTracker, action: &str) -> f64 {
        tracker.failure_rate(action, self.config.rate_window) / 100.0
    }

    /// Retry ceiling for `action` given its recent failure rate.
    pub fn max_retries(&self, tracker: &FailureTracker, action: &str) -> u32 {
        let rate = self.rate(tracker, action);
        let base = self.config.default_max_retries;
        if rate > self.config.high_failure_threshold {
            base.saturating_sub(self.config.high_rate_penalty).max(1)
        } else if rate < self.config.low_failure_threshold {
            base + self.config.low_rate_bonus
        } else {
            base
        }
    }

    /// Required wait before retry number `attempt + 1`.
    pub fn retry_delay(&self, tracker: &FailureTracker, action: &str, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let mut delay = self.config.base_delay_ms.saturating_mul(factor);
        if self.rate(tracker, action) > self.config.high_failure_threshold {
            delay = delay.saturating_mul(2);
        }
        delay.min(self.config.max_delay_ms)
    }

    /// Decide whether `task` may be retried after failing with `error`.
    ///
    /// Approval counts an attempt and stamps `now_ms`; giving up clears the
    /// task's state; deferral leaves it untouched.
    pub fn decide(
        &mut self,
        task: &Task,
        error: &str,
        tracker: &FailureTracker,
        learning: &LearningSystem,
        now_ms: u64,
    ) -> RetryDecision {
        let state = self.states.get(&task.id).copied().unwrap_or_default();
        let attempt = state.attempts;
        let max_retries = self.max_retries(tracker, &task.kind);
        let delay_ms = self.retry_delay(tracker, &task.kind, attempt);

        let give_up = |reason: String| RetryDecision {
            verdict: RetryVerdict::GiveUp,
            reason,
            attempt,
            max_retries,
            delay_ms,
        };

        if !learning.should_retry(tracker, &task.kind, attempt) {
            tracing::info!(task = %task.id, kind = %task.kind, error, "Learning system recommends not retrying");
            self.reset_retries(task.id);
            return give_up("learning veto".to_string());
        }

        if attempt >= max_retries {
            tracing::info!(task = %task.id, kind = %task.kind, max_retries, "Max retries reached");
            self.reset_retries(task.id);
            return give_up(format!("max retries ({max_retries}) reached"));
        }

        if let Some(last) = state.last_retry_ms {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < delay_ms {
                return RetryDecision {
                    verdict: RetryVerdict::Defer {
                        remaining_ms: delay_ms - elapsed,
                    },
                    reason: "backoff".to_string(),
                    attempt,
                    max_retries,
                    delay_ms,
                };
            }
        }

        self.states.insert(
            task.id,
            RetryState {
                attempts: attempt + 1,
                last_retry_ms: Some(now_ms),
            },
        );
        tracing::info!(
            task = %task.id,
            kind = %task.kind,
            attempt = attempt + 1,
            max_retries,
            "Retry approved"
        );

        RetryDecision {
            verdict: RetryVerdict::Retry,
            reason: "approved".to_string(),
            attempt,
            max_retries,
            delay_ms,
        }
    }

    pub fn should_retry(
        &mut self,
        task: &Task,
        error: &str,
        tracker: &FailureTracker,
        learning: &LearningSystem,
        now_ms: u64,
    ) -> bool {
        self.decide(task, error, tracker, learning, now_ms)
            .should_retry()
    }

    /// Forget a task's attempts, after success or giving up.
    pub fn reset_retries(&mut self, task: TaskId) {
        self.states.remove(&task);
    }

    pub fn retry_count(&self, task: TaskId) -> u32 {
        self.states.get(&task).map(|s| s.attempts).unwrap_or(0)
    }

    pub fn state(&self, task: TaskId) -> Option<RetryState> {
        self.states.get(&task).copied()
    }

    pub fn strategy_info(&self, tracker: &FailureTracker, action: &str) -> String {
        format!(
            "Action: {} | Max Retries: {} | Failure Rate: {:.1}%",
            action,
            self.max_retries(tracker, action),
            tracker.failure_rate(action, self.config.rate_window)
        )
    }

    pub fn statistics(&self, tracker: &FailureTracker) -> RetryStatistics {
        let active = self.states.len();
        let average = if active == 0 {
            0.0
        } else {
            self.states.values().map(|s| s.attempts as f64).sum::<f64>() / active as f64
        };
        RetryStatistics {
            active_retries: active,
            total_failures_tracked: tracker.total_failures(),
            average_retry_count: average,
        }
    }
}
