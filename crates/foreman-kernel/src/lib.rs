//! Foreman Kernel - learning loop around the behavior scheduler
//!
//! This crate records failed actions, mines them for patterns, turns those
//! into insights, and uses the failure history to decide whether and when a
//! failed task is retried. [`AgentExecutor`] ties it all to a
//! [`foreman_core::ActionScheduler`].

pub mod config;
pub mod error;
pub mod executor;
pub mod learning;
pub mod observability;
pub mod retry;
pub mod store;

pub use config::ForemanConfig;
pub use error::StoreError;
pub use executor::{AgentExecutor, ExecutorStatus, Outcome, OutcomeKind};
pub use learning::{
    FailureRecord, FailureTracker, Insight, InsightCategory, KnowledgeBase, LearningSystem,
    Pattern, PatternType,
};
pub use observability::{EventEmitter, SchedulerEvent};
pub use retry::{
    AdaptiveRetryStrategy, Clock, ManualClock, RetryDecision, RetryState, RetryStatistics,
    RetryVerdict, SystemClock,
};
