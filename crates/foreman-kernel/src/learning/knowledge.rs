//! Persistent store of learned insights, per-action tips and success counts.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::store::{read_json, write_json_atomic};

pub const KNOWLEDGE_VERSION: u32 = 1;
pub const DEFAULT_MAX_INSIGHTS: usize = 200;
pub const DEFAULT_MAX_TIPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    Avoidance,
    ErrorMitigation,
    ChainPrevention,
    ParameterAdjustment,
}

impl InsightCategory {
    pub const ALL: [InsightCategory; 4] = [
        InsightCategory::Avoidance,
        InsightCategory::ErrorMitigation,
        InsightCategory::ChainPrevention,
        InsightCategory::ParameterAdjustment,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Avoidance => "avoidance",
            Self::ErrorMitigation => "error_mitigation",
            Self::ChainPrevention => "chain_prevention",
            Self::ParameterAdjustment => "parameter_adjustment",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for InsightCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A recommendation derived from a failure pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    pub recommendation: String,
    pub category: InsightCategory,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl Insight {
    pub fn new(
        title: impl Into<String>,
        recommendation: impl Into<String>,
        category: InsightCategory,
        confidence: f64,
    ) -> Self {
        Self {
            title: title.into(),
            recommendation: recommendation.into(),
            category,
            confidence: clamp_confidence(confidence),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Insight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.0}% confidence] {}: {}",
            self.confidence * 100.0,
            self.title,
            self.recommendation
        )
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// On-disk layout of the knowledge base.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KnowledgeDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    insights: Vec<Insight>,
    #[serde(default)]
    action_tips: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    success_counts: BTreeMap<String, u64>,
}

#[derive(Debug)]
pub struct KnowledgeBase {
    agent: String,
    max_insights: usize,
    max_tips: usize,
    insights: Vec<Insight>,
    action_tips: BTreeMap<String, Vec<String>>,
    success_counts: BTreeMap<String, u64>,
    path: Option<PathBuf>,
}

impl KnowledgeBase {
    pub fn new(agent: impl Into<String>) -> Self {
        Self::with_limits(agent, DEFAULT_MAX_INSIGHTS, DEFAULT_MAX_TIPS)
    }

    pub fn with_limits(agent: impl Into<String>, max_insights: usize, max_tips: usize) -> Self {
        Self {
            agent: agent.into(),
            max_insights: max_insights.max(1),
            max_tips: max_tips.max(1),
            insights: Vec::new(),
            action_tips: BTreeMap::new(),
            success_counts: BTreeMap::new(),
            path: None,
        }
    }

    /// Knowledge base persisted at `path`, loading what is already there.
    pub fn open(
        agent: impl Into<String>,
        path: &Path,
        max_insights: usize,
        max_tips: usize,
    ) -> StoreResult<Self> {
        let mut kb = Self::with_limits(agent, max_insights, max_tips);
        if let Some(doc) = read_json::<KnowledgeDocument>(path)? {
            kb.insights = doc.insights;
            kb.action_tips = doc.action_tips;
            kb.success_counts = doc.success_counts;
            for insight in &mut kb.insights {
                insight.confidence = clamp_confidence(insight.confidence);
            }
            tracing::info!(
                agent = %kb.agent,
                insights = kb.insights.len(),
                tips = kb.action_tips.len(),
                "Loaded knowledge base"
            );
        }
        kb.path = Some(path.to_path_buf());
        Ok(kb)
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Store `insight` unless one with the same title and category exists.
    /// Returns whether it was added.
    pub fn add_insight(&mut self, insight: Insight) -> bool {
        let exists = self
            .insights
            .iter()
            .any(|i| i.title == insight.title && i.category == insight.category);
        if exists {
            return false;
        }

        tracing::info!(agent = %self.agent, title = %insight.title, "Learned insight");
        self.insights.push(insight);

        while self.insights.len() > self.max_insights {
            // Lowest confidence goes first; among equals, the oldest.
            let weakest = self
                .insights
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.confidence.total_cmp(&b.confidence))
                .map(|(index, _)| index);
            if let Some(index) = weakest {
                self.insights.remove(index);
            }
        }

        self.persist();
        true
    }

    pub fn add_action_tip(&mut self, action: &str, tip: impl Into<String>) {
        let tips = self.action_tips.entry(action.to_string()).or_default();
        tips.push(tip.into());
        if tips.len() > self.max_tips {
            let excess = tips.len() - self.max_tips;
            tips.drain(..excess);
        }
        self.persist();
    }

    pub fn record_success(&mut self, action: &str) {
        *self.success_counts.entry(action.to_string()).or_default() += 1;
        self.persist();
    }

    pub fn tips_for(&self, action: &str) -> &[String] {
        self.action_tips
            .get(action)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn insights(&self) -> &[Insight] {
        &self.insights
    }

    pub fn insight_count(&self) -> usize {
        self.insights.len()
    }

    /// Newest first.
    pub fn recent_insights(&self, n: usize) -> Vec<&Insight> {
        let mut recent: Vec<&Insight> = self.insights.iter().rev().collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(n);
        recent
    }

    /// Highest confidence first.
    pub fn insights_by_category(&self, category: InsightCategory) -> Vec<&Insight> {
        self.sorted_by_confidence(|i| i.category == category)
    }

    /// Insights with confidence at or above `min`, highest first.
    pub fn high_confidence_insights(&self, min: f64) -> Vec<&Insight> {
        self.sorted_by_confidence(|i| i.confidence >= min)
    }

    fn sorted_by_confidence(&self, keep: impl Fn(&Insight) -> bool) -> Vec<&Insight> {
        let mut out: Vec<&Insight> = self.insights.iter().filter(|i| keep(i)).collect();
        out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        out
    }

    pub fn success_count(&self, action: &str) -> u64 {
        self.success_counts.get(action).copied().unwrap_or(0)
    }

    /// Action kinds by descending success count, ties by name.
    pub fn most_successful(&self, n: usize) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self
            .success_counts
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(n);
        entries
    }

    /// Planner-facing digest. Empty when nothing has been learned.
    pub fn summary(&self) -> String {
        if self.insights.is_empty() && self.action_tips.is_empty() {
            return String::new();
        }

        let mut out = String::from("\n=== LEARNED KNOWLEDGE ===\n");

        let top = self.high_confidence_insights(0.7);
        if !top.is_empty() {
            out.push_str("Key insights:\n");
            for insight in top.iter().take(5) {
                out.push_str(&format!("- {}\n", insight.recommendation));
            }
        }

        if !self.action_tips.is_empty() {
            out.push_str("\nAction tips:\n");
            for (action, tips) in self.action_tips.iter().take(5) {
                out.push_str(&format!("- {action}: {}\n", tips.join(", ")));
            }
        }

        let reliable = self.most_successful(3);
        if !reliable.is_empty() {
            out.push_str("\nMost reliable actions:\n");
            for (action, count) in reliable {
                out.push_str(&format!("- {action} ({count} successes)\n"));
            }
        }

        out
    }

    pub fn clear(&mut self) {
        self.insights.clear();
        self.action_tips.clear();
        self.success_counts.clear();
        self.persist();
    }

    /// Write the current state to disk now.
    pub fn save(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let doc = KnowledgeDocument {
            version: KNOWLEDGE_VERSION,
            insights: self.insights.clone(),
            action_tips: self.action_tips.clone(),
            success_counts: self.success_counts.clone(),
        };
        write_json_atomic(path, &doc)
    }

    fn persist(&self) {
        if let Err(error) = self.save() {
            tracing::warn!(agent = %self.agent, %error, "Failed to save knowledge base");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_title_and_category_is_ignored() {
        let mut kb = KnowledgeBase::new("test");
        assert!(kb.add_insight(Insight::new("Avoid mine", "a", InsightCategory::Avoidance, 0.9)));
        assert!(!kb.add_insight(Insight::new("Avoid mine", "b", InsightCategory::Avoidance, 0.5)));
        assert!(kb.add_insight(Insight::new(
            "Avoid mine",
            "c",
            InsightCategory::ErrorMitigation,
            0.5
        )));
        assert_eq!(kb.insight_count(), 2);
        assert_eq!(kb.insights()[0].recommendation, "a");
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(Insight::new("t", "r", InsightCategory::Avoidance, 1.7).confidence, 1.0);
        assert_eq!(Insight::new("t", "r", InsightCategory::Avoidance, -0.2).confidence, 0.0);
        assert_eq!(Insight::new("t", "r", InsightCategory::Avoidance, f64::NAN).confidence, 0.0);
    }

    #[test]
    fn overflow_prunes_lowest_confidence() {
        let mut kb = KnowledgeBase::with_limits("test", 3, 10);
        for (i, confidence) in [0.9, 0.2, 0.6, 0.7].into_iter().enumerate() {
            kb.add_insight(Insight::new(
                format!("insight {i}"),
                "r",
                InsightCategory::Avoidance,
                confidence,
            ));
        }

        let titles: Vec<_> = kb.insights().iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["insight 0", "insight 2", "insight 3"]);
    }

    #[test]
    fn tips_keep_the_newest() {
        let mut kb = KnowledgeBase::with_limits("test", 10, 2);
        kb.add_action_tip("mine", "bring a pickaxe");
        kb.add_action_tip("mine", "avoid lava");
        kb.add_action_tip("mine", "light the tunnel");
        assert_eq!(kb.tips_for("mine"), ["avoid lava", "light the tunnel"]);
        assert!(kb.tips_for("craft").is_empty());
    }

    #[test]
    fn summary_mentions_reliable_actions() {
        let mut kb = KnowledgeBase::new("test");
        assert_eq!(kb.summary(), "");

        kb.add_insight(Insight::new(
            "Avoid mine",
            "Check tools first",
            InsightCategory::Avoidance,
            0.9,
        ));
        kb.record_success("craft");
        kb.record_success("craft");

        let summary = kb.summary();
        assert!(summary.contains("=== LEARNED KNOWLEDGE ==="));
        assert!(summary.contains("- Check tools first"));
        assert!(summary.contains("- craft (2 successes)"));
        assert_eq!(kb.success_count("craft"), 2);
    }
}
