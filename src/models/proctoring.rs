// src/models/proctoring.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// In-memory record of an active session as seen by the proctoring monitor.
/// Advisory only; never consulted for grading.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProctoringEntry {
    pub session_id: Uuid,
    pub user_id: i64,
    pub exam_id: i64,
    pub estimated_minutes: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Session deadline; the entry is dropped once it passes.
    pub expires_at: DateTime<Utc>,
    pub tab_switches: u32,
}

impl ProctoringEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ExcessiveTabSwitches,
    FastSubmit,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::ExcessiveTabSwitches => "excessive_tab_switches",
            AnomalyKind::FastSubmit => "fast_submit",
        }
    }
}

/// One detected anomaly. Written to the audit log and broadcast to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub session_id: Uuid,
    pub user_id: i64,
    pub exam_id: i64,
    pub event_type: AnomalyKind,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// Messages pushed to observers over the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    SessionStarted {
        session_id: Uuid,
        user_id: i64,
        exam_id: i64,
        timestamp: DateTime<Utc>,
    },
    CheatingDetected(AnomalyEvent),
    SessionEnded {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

/// Synchronous acknowledgement of a tab switch.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TabSwitchResponse {
    pub session_id: Uuid,
    pub tab_switches: u32,
}
