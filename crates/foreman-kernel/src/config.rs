//! Agent configuration loading and management.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Project-relative location of the config file.
pub const CONFIG_PATH: &str = ".foreman/config.yaml";

/// Main configuration, loaded from .foreman/config.yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForemanConfig {
    /// Config version
    pub version: Option<String>,

    /// Agent name; names the per-agent log files
    #[serde(default = "default_agent")]
    pub agent: String,

    /// Data directory for failure logs, knowledge and events (relative to project root)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Host tick rate
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_agent() -> String {
    "steve".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".foreman/data")
}
fn default_tick_hz() -> u32 {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Bounded action history length
    pub history_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            history_capacity: foreman_core::history::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Failure tracking and pattern mining thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Run insight generation every N ticks (200 = 10 s at 20 Hz)
    pub analysis_interval_ticks: u64,
    /// Retained failure records per agent
    pub max_failures: usize,
    /// Retained insights per agent
    pub max_insights: usize,
    /// Tips kept per action type
    pub max_tips_per_action: usize,
    /// Minimum occurrences before anything counts as a pattern
    pub min_samples: usize,
    /// Failure rate (percent) above which an action is chronically failing
    pub high_failure_rate: f64,
    /// Window (records) for failure rates
    pub rate_window: usize,
    /// Top-N kinds and errors considered per pass
    pub candidate_pool: usize,
    /// Window (records) checked for failure cascades
    pub cascade_window: usize,
    /// Failures needed inside the cascade window before a cascade is considered
    pub cascade_min_failures: usize,
    /// Window (records) mined for parameter correlations
    pub parameter_window: usize,
    /// Failure rate (percent) above which retries stop after two attempts
    pub retry_veto_rate: f64,
    /// Absolute retry cap applied by the learning veto. Retries are only asked
    /// for right after a failure of the same kind, so the recent-failure veto
    /// already stops them at attempt 3 whatever this is set to.
    pub retry_hard_cap: u32,
    pub floors: ConfidenceFloors,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            analysis_interval_ticks: 200,
            max_failures: 500,
            max_insights: 200,
            max_tips_per_action: 10,
            min_samples: 3,
            high_failure_rate: 50.0,
            rate_window: 20,
            candidate_pool: 10,
            cascade_window: 10,
            cascade_min_failures: 3,
            parameter_window: 50,
            retry_veto_rate: 75.0,
            retry_hard_cap: 5,
            floors: ConfidenceFloors::default(),
        }
    }
}

/// Minimum confidence for a pattern of each class to become an insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceFloors {
    pub chronic_failure: f64,
    pub common_error: f64,
    pub failure_cascade: f64,
    pub parameter_correlation: f64,
}

impl Default for ConfidenceFloors {
    fn default() -> Self {
        Self {
            chronic_failure: 0.5,
            common_error: 0.3,
            failure_cascade: 0.8,
            parameter_correlation: 0.6,
        }
    }
}

/// Adaptive retry ceilings and backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub default_max_retries: u32,
    /// Subtracted from the ceiling for chronically failing kinds
    pub high_rate_penalty: u32,
    /// Added to the ceiling for reliable kinds
    pub low_rate_bonus: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction (0..1) above which a kind counts as high-failure
    pub high_failure_threshold: f64,
    /// Fraction (0..1) below which a kind counts as reliable
    pub low_failure_threshold: f64,
    /// Window (records) for the failure rate
    pub rate_window: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            high_rate_penalty: 2,
            low_rate_bonus: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            high_failure_threshold: 0.6,
            low_failure_threshold: 0.2,
            rate_window: 20,
        }
    }
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            version: None,
            agent: default_agent(),
            data_dir: default_data_dir(),
            tick_hz: default_tick_hz(),
            scheduler: SchedulerConfig::default(),
            learning: LearningConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ForemanConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load from project root (looks for .foreman/config.yaml)
    pub fn load_from_project(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(CONFIG_PATH);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write this config as YAML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Resolve paths relative to project root
    pub fn resolve_paths(&mut self, project_root: &Path) {
        self.data_dir = project_root.join(&self.data_dir);
    }

    pub fn failure_log_path(&self) -> PathBuf {
        self.data_dir
            .join("failures")
            .join(format!("{}_failures.jsonl", self.agent))
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.data_dir
            .join("knowledge")
            .join(format!("{}_knowledge.json", self.agent))
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir
            .join("events")
            .join(format!("{}.jsonl", self.agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ForemanConfig::load_from_project(dir.path()).unwrap();
        assert_eq!(config, ForemanConfig::default());
        assert_eq!(config.learning.analysis_interval_ticks, 200);
        assert_eq!(config.retry.max_delay_ms, 10_000);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_PATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "agent: alex\nlearning:\n  rate_window: 10\n  floors:\n    common_error: 0.5\n",
        )
        .unwrap();

        let mut config = ForemanConfig::load_from_project(dir.path()).unwrap();
        assert_eq!(config.agent, "alex");
        assert_eq!(config.learning.rate_window, 10);
        assert_eq!(config.learning.min_samples, 3);
        assert_eq!(config.learning.cascade_min_failures, 3);
        assert_eq!(config.learning.floors.common_error, 0.5);
        assert_eq!(config.learning.floors.failure_cascade, 0.8);
        assert_eq!(config.tick_hz, 20);

        config.resolve_paths(dir.path());
        assert_eq!(
            config.failure_log_path(),
            dir.path().join(".foreman/data/failures/alex_failures.jsonl")
        );
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_PATH);
        let mut config = ForemanConfig::default();
        config.retry.default_max_retries = 4;

        config.save(&path).unwrap();
        assert_eq!(ForemanConfig::load(&path).unwrap(), config);
    }
}
