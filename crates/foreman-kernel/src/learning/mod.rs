//! Failure tracking, pattern mining and the knowledge base.

pub mod failure;
pub mod knowledge;
pub mod patterns;

pub use failure::{normalize_error, FailureRecord, FailureTracker};
pub use knowledge::{Insight, InsightCategory, KnowledgeBase};
pub use patterns::{LearningSystem, Pattern, PatternType};
