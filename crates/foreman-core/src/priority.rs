use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Scheduling priority. Lower level means more urgent.
///
/// The derived `Ord` follows the level, so `Critical < Background`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ActionPriority {
    /// Immediate danger response (combat, hazard avoidance).
    Critical,
    /// User-directed commands.
    High,
    /// Ordinary autonomous tasks.
    #[default]
    Normal,
    /// Optional and idle behavior.
    Low,
    /// Passive background monitoring.
    Background,
}

impl ActionPriority {
    /// All levels, most urgent first.
    pub const ALL: [ActionPriority; 5] = [
        ActionPriority::Critical,
        ActionPriority::High,
        ActionPriority::Normal,
        ActionPriority::Low,
        ActionPriority::Background,
    ];

    pub fn level(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
            Self::Background => 4,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        Self::ALL.get(level as usize).copied()
    }

    /// A level may only preempt strictly less urgent work, never peers.
    pub fn can_preempt(self, other: ActionPriority) -> bool {
        self.level() < other.level()
    }

    /// Whether scheduling at this level triggers preemption of running work.
    pub fn is_preemptive(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Background => "background",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ActionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(level={})", self.name().to_uppercase(), self.level())
    }
}
