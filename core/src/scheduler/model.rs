use crate::store::Record;
use crate::types::IntentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A durable "clear this intent at its deadline" job
///
/// Persisted at publish time so a restart between publish and clearing
/// cannot strand an intent in AUCTION.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearingJob {
    pub intent_id: IntentId,
    pub due_at: DateTime<Utc>,
    pub state: JobState,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ClearingJob {
    pub fn new(intent_id: IntentId, due_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            intent_id,
            due_at,
            state: JobState::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == JobState::Pending
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && now >= self.due_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Done,
}

impl Record for ClearingJob {
    type Key = IntentId;
    const KIND: &'static str = "clearing job";
    const COLLECTION: &'static str = "clearing_jobs";

    fn key(&self) -> &IntentId {
        &self.intent_id
    }
}
