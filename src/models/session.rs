use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::AppKind;

/// A session that ran to completion, kept for the history listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSession {
    pub id: String,
    pub app: AppKind,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub planned_ms: u64,
    pub cycle_count: u32,
    pub created_at: DateTime<Utc>,
}

impl CompletedSession {
    /// Wall-clock span including any time spent paused.
    pub fn wall_ms(&self) -> u64 {
        u64::try_from((self.completed_at - self.started_at).num_milliseconds()).unwrap_or(0)
    }
}
