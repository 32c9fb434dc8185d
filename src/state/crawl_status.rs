/// Crawl status definitions for tracking one crawl attempt chain
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current status of a Crawl record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    // ===== Active States =====
    /// Created by a submission, waiting for an attempt (or for a retry)
    Queued,

    /// An attempt is executing
    Running,

    // ===== Terminal States =====
    /// Page analyzed and results persisted
    Done,

    /// The final attempt failed
    Error,

    /// Stopped by an explicit request
    Stopped,
}

impl CrawlStatus {
    /// Returns true if no further transition may leave this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Stopped)
    }

    /// Returns true if the crawl still counts against the one-active-crawl-per-URL rule
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
