//! Execution lanes.
//!
//! A lane is a bounded concurrency partition for dispatch. Lane counters are
//! process-local; after a restart they are reconstructed from outstanding
//! runs in the repository, not persisted.

use serde::{Deserialize, Serialize};

/// The fixed set of dispatch lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneId {
    /// Default serial lane.
    Main,
    /// Small independent items that can run in parallel.
    Subagent,
    /// Scheduled/background work.
    Cron,
    /// Interactive or extra-large items.
    Session,
}

impl LaneId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Subagent => "subagent",
            Self::Cron => "cron",
            Self::Session => "session",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "main" => Some(Self::Main),
            "subagent" => Some(Self::Subagent),
            "cron" => Some(Self::Cron),
            "session" => Some(Self::Session),
            _ => None,
        }
    }

    /// All lanes in a stable display order.
    pub fn all() -> [LaneId; 4] {
        [Self::Main, Self::Subagent, Self::Cron, Self::Session]
    }

    /// Default max concurrency per lane.
    pub fn default_max_concurrency(&self) -> usize {
        match self {
            Self::Subagent => 3,
            Self::Main | Self::Cron | Self::Session => 1,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Main => "Main",
            Self::Subagent => "Subagent",
            Self::Cron => "Cron",
            Self::Session => "Session",
        }
    }
}

/// Point-in-time view of one lane, as reported to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneSnapshot {
    pub id: LaneId,
    pub display_name: String,
    pub max_concurrency: usize,
    pub active_count: usize,
    pub queued_count: usize,
    pub available: bool,
}
