use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ResourceSet, TickContext};

/// Opaque handle assigned by the scheduler when an action is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ActionState {
    Queued,
    Running,
    Completed,
    Cancelled,
}

impl ActionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Why an action failed. The scheduler itself never looks at this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FailureKind {
    /// Bad or missing parameters, detected before doing any work.
    Validation,
    /// Environment-dependent failure.
    Execution,
    /// The action ran out of its own tick budget.
    Timeout,
    /// Interrupted before or during execution.
    Cancelled,
    /// `tick()` returned an error or panicked.
    Fault,
}

impl FailureKind {
    /// Whether the failure is eligible for adaptive retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Execution | Self::Timeout)
    }
}

/// Terminal result of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "outcome", rename_all = "snake_case"))]
pub enum ActionResult {
    Success {
        message: String,
    },
    Failure {
        message: String,
        kind: FailureKind,
        /// Tells the caller whether to run its own recovery flow.
        requires_replanning: bool,
    },
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: message.into(),
        }
    }

    /// Retryable execution failure.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            kind: FailureKind::Execution,
            requires_replanning: true,
        }
    }

    /// Validation failure. Never retried.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            kind: FailureKind::Validation,
            requires_replanning: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            kind: FailureKind::Timeout,
            requires_replanning: true,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Failure {
            message: reason.into(),
            kind: FailureKind::Cancelled,
            requires_replanning: false,
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            kind: FailureKind::Fault,
            requires_replanning: false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Success { message } | Self::Failure { message, .. } => message,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn requires_replanning(&self) -> bool {
        match self {
            Self::Success { .. } => false,
            Self::Failure {
                requires_replanning,
                ..
            } => *requires_replanning,
        }
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { message } => write!(f, "success: {message}"),
            Self::Failure { message, kind, .. } => write!(f, "failure ({kind:?}): {message}"),
        }
    }
}

/// What a single `start`/`tick` call reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    /// Still working; tick again next round.
    Running,
    Complete(ActionResult),
}

impl ActionStatus {
    pub fn into_result(self) -> Option<ActionResult> {
        match self {
            Self::Running => None,
            Self::Complete(result) => Some(result),
        }
    }
}

impl From<ActionResult> for ActionStatus {
    fn from(value: ActionResult) -> Self {
        Self::Complete(value)
    }
}

/// Unexpected error raised from inside `tick()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ActionFault(pub String);

impl ActionFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A schedulable unit of behavior.
///
/// `tick` must do a bounded amount of work and return; an action that needs
/// more time returns [`ActionStatus::Running`] and is advanced again next
/// scheduler tick. The resource set is read once, when the action is
/// scheduled, and must not change afterwards.
pub trait Action<W>: 'static
where
    W: 'static,
{
    /// Action-type label, e.g. `"mine"`.
    fn kind(&self) -> &str;

    fn resources(&self) -> ResourceSet;

    fn describe(&self) -> String {
        self.kind().to_string()
    }

    /// Called exactly once, right after resources were acquired.
    fn start(&mut self, _ctx: &TickContext, _world: &mut W) -> ActionStatus {
        ActionStatus::Running
    }

    fn tick(&mut self, ctx: &TickContext, world: &mut W) -> Result<ActionStatus, ActionFault>;

    /// Undo side effects synchronously. May be called while queued or running.
    fn cancel(&mut self, _world: &mut W) {}
}
