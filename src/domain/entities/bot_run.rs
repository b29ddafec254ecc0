//! BotRun / BotStatus (spec §3, §4.11, §9) — the orchestrator's own
//! lifecycle record, used to enforce the at-most-one-active-run invariant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotRunStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl BotRunStatus {
    /// §9: one active run per operator — "active" means not in a terminal state.
    pub fn is_active(self) -> bool {
        matches!(self, BotRunStatus::Starting | BotRunStatus::Running | BotRunStatus::Stopping)
    }

    pub fn can_transition_to(self, next: BotRunStatus) -> bool {
        matches!(
            (self, next),
            (BotRunStatus::Starting, BotRunStatus::Running)
                | (BotRunStatus::Starting, BotRunStatus::Failed)
                | (BotRunStatus::Running, BotRunStatus::Stopping)
                | (BotRunStatus::Running, BotRunStatus::Failed)
                | (BotRunStatus::Stopping, BotRunStatus::Stopped)
                | (BotRunStatus::Stopping, BotRunStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRun {
    pub id: Uuid,
    pub configuration_id: Uuid,
    pub operator_id: Uuid,
    pub status: BotRunStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_heartbeat: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl BotRun {
    pub fn start(configuration_id: Uuid, operator_id: Uuid, now: DateTime<Utc>) -> Self {
        BotRun {
            id: Uuid::new_v4(),
            configuration_id,
            operator_id,
            status: BotRunStatus::Starting,
            started_at: now,
            stopped_at: None,
            last_heartbeat: now,
            error_message: None,
        }
    }

    pub fn transition(&mut self, next: BotRunStatus, now: DateTime<Utc>) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!("cannot transition bot run from {:?} to {:?}", self.status, next));
        }
        self.status = next;
        if matches!(next, BotRunStatus::Stopped | BotRunStatus::Failed) {
            self.stopped_at = Some(now);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    pub is_running: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub exchange_api_status: String,
    pub api_response_time_ms: Option<i64>,
    pub consecutive_errors: u32,
}
