//! Pattern mining over the failure log.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::failure::{FailureRecord, FailureTracker};
use super::knowledge::{Insight, InsightCategory, KnowledgeBase};
use crate::config::LearningConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// One action kind fails most of the time.
    ChronicFailure,
    /// The same error message keeps coming back.
    CommonError,
    /// Several different actions failed in quick succession.
    FailureCascade,
    /// A parameter value recurs in one kind's failures.
    ParameterCorrelation,
}

impl PatternType {
    pub fn category(self) -> InsightCategory {
        match self {
            Self::ChronicFailure => InsightCategory::Avoidance,
            Self::CommonError => InsightCategory::ErrorMitigation,
            Self::FailureCascade => InsightCategory::ChainPrevention,
            Self::ParameterCorrelation => InsightCategory::ParameterAdjustment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub kind: PatternType,
    /// Action kind, error message, or "multiple" for cascades.
    pub subject: String,
    pub description: String,
    pub confidence: f64,
}

impl Pattern {
    /// Turn the pattern into an insight.
    pub fn to_insight(&self) -> Insight {
        let (title, recommendation) = match self.kind {
            PatternType::ChronicFailure => (
                format!("Avoid {}", self.subject),
                format!(
                    "The action '{}' has been failing frequently. Check prerequisites, \
                     inventory and surroundings before attempting it.",
                    self.subject
                ),
            ),
            PatternType::CommonError => (
                format!("Common error: {}", self.subject),
                format!(
                    "The error '{}' occurs frequently and likely has a systematic cause.",
                    self.subject
                ),
            ),
            PatternType::FailureCascade => (
                "Failure cascade detected".to_string(),
                "Multiple failures in sequence suggest an early failure led to later ones. \
                 Validate state between steps and recover earlier."
                    .to_string(),
            ),
            PatternType::ParameterCorrelation => (
                format!("Parameter issue in {}", self.subject),
                format!("{}. Validate or adjust this parameter.", self.description),
            ),
        };
        Insight::new(title, recommendation, self.kind.category(), self.confidence)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.2}] {}", self.confidence, self.description)
    }
}

/// Derives patterns and insights from a [`FailureTracker`] and stores them in
/// a [`KnowledgeBase`]. Holds only thresholds; the executor owns the data.
#[derive(Debug, Clone, Default)]
pub struct LearningSystem {
    config: LearningConfig,
}

impl LearningSystem {
    pub fn new(config: LearningConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn identify_patterns(&self, tracker: &FailureTracker) -> Vec<Pattern> {
        let mut patterns = self.chronic_failures(tracker);
        patterns.extend(self.common_errors(tracker));
        patterns.extend(self.failure_cascade(tracker));
        patterns.extend(self.parameter_correlations(tracker));
        patterns
    }

    fn chronic_failures(&self, tracker: &FailureTracker) -> Vec<Pattern> {
        tracker
            .most_common_failures(self.config.candidate_pool)
            .into_iter()
            .filter(|(_, count)| *count >= self.config.min_samples)
            .filter_map(|(action, _)| {
                let rate = tracker.failure_rate(&action, self.config.rate_window);
                (rate > self.config.high_failure_rate).then(|| Pattern {
                    kind: PatternType::ChronicFailure,
                    description: format!("Action '{action}' has high failure rate: {rate:.1}%"),
                    subject: action,
                    confidence: rate / 100.0,
                })
            })
            .collect()
    }

    fn common_errors(&self, tracker: &FailureTracker) -> Vec<Pattern> {
        tracker
            .most_common_errors(self.config.candidate_pool)
            .into_iter()
            .filter(|(_, count)| *count >= self.config.min_samples)
            .map(|(error, count)| Pattern {
                kind: PatternType::CommonError,
                description: format!("Common error: '{error}' occurred {count} times"),
                subject: error,
                confidence: (count as f64 / 10.0).min(1.0),
            })
            .collect()
    }

    fn failure_cascade(&self, tracker: &FailureTracker) -> Option<Pattern> {
        let recent = tracker.recent(self.config.cascade_window);
        if recent.len() < self.config.cascade_min_failures {
            return None;
        }

        let kinds: BTreeSet<&str> = recent.iter().map(|r| r.action.as_str()).collect();
        if kinds.len() <= 1 {
            return None;
        }

        Some(Pattern {
            kind: PatternType::FailureCascade,
            subject: "multiple".to_string(),
            description: format!(
                "Chain of {} failures detected involving: {}",
                recent.len(),
                kinds.into_iter().collect::<Vec<_>>().join(", ")
            ),
            confidence: 0.8,
        })
    }

    fn parameter_correlations(&self, tracker: &FailureTracker) -> Vec<Pattern> {
        let mut by_action: BTreeMap<&str, Vec<&FailureRecord>> = BTreeMap::new();
        for record in tracker.recent(self.config.parameter_window) {
            by_action.entry(record.action.as_str()).or_default().push(record);
        }

        let mut patterns = Vec::new();
        for (action, records) in by_action {
            if records.len() < self.config.min_samples {
                continue;
            }

            let mut pairs: BTreeMap<String, usize> = BTreeMap::new();
            for record in &records {
                for (key, value) in &record.parameters {
                    *pairs.entry(format!("{key}={value}")).or_default() += 1;
                }
            }

            for (pair, count) in pairs {
                if count >= self.config.min_samples {
                    patterns.push(Pattern {
                        kind: PatternType::ParameterCorrelation,
                        subject: action.to_string(),
                        description: format!("Action '{action}' often fails with parameter: {pair}"),
                        confidence: 0.6,
                    });
                }
            }
        }
        patterns
    }

    fn floor(&self, kind: PatternType) -> f64 {
        let floors = &self.config.floors;
        match kind {
            PatternType::ChronicFailure => floors.chronic_failure,
            PatternType::CommonError => floors.common_error,
            PatternType::FailureCascade => floors.failure_cascade,
            PatternType::ParameterCorrelation => floors.parameter_correlation,
        }
    }

    /// Mine patterns, keep those at or above their class floor, and store the
    /// resulting insights. Returns every insight produced this pass, including
    /// ones the knowledge base already had.
    pub fn generate_insights(
        &self,
        tracker: &FailureTracker,
        knowledge: &mut KnowledgeBase,
    ) -> Vec<Insight> {
        let insights: Vec<Insight> = self
            .identify_patterns(tracker)
            .iter()
            .filter(|p| p.confidence >= self.floor(p.kind))
            .map(Pattern::to_insight)
            .collect();

        let added = insights
            .iter()
            .filter(|insight| knowledge.add_insight((*insight).clone()))
            .count();

        tracing::debug!(
            agent = %knowledge.agent(),
            produced = insights.len(),
            added,
            total = knowledge.insight_count(),
            "Learning analysis complete"
        );
        insights
    }

    /// Newest recommendation per category among the ten most recent insights.
    pub fn recommendations(&self, knowledge: &KnowledgeBase) -> Vec<String> {
        let recent = knowledge.recent_insights(10);
        if recent.is_empty() {
            return vec!["No learning insights available yet. Keep working to gather data.".into()];
        }

        let mut newest: BTreeMap<InsightCategory, &Insight> = BTreeMap::new();
        for insight in recent {
            newest.entry(insight.category).or_insert(insight);
        }
        newest
            .into_values()
            .map(|i| i.recommendation.clone())
            .collect()
    }

    /// Learning veto on retries. `attempt` counts retries already made.
    pub fn should_retry(&self, tracker: &FailureTracker, action: &str, attempt: u32) -> bool {
        let rate = tracker.failure_rate(action, self.config.rate_window);
        if rate > self.config.retry_veto_rate && attempt >= 2 {
            tracing::warn!(action, rate, "Failure rate too high, stopping retries");
            return false;
        }

        if tracker.has_recent_failure(action, 3) && attempt >= 3 {
            tracing::warn!(action, "Action failed recently, limiting retries");
            return false;
        }

        attempt < self.config.retry_hard_cap
    }
}
