use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::posture::PostureType;
use crate::session::{Session, SessionId, SessionKind, SessionSnapshot};

/// Every observable change in the coordinator produces an Event.
/// Display and feedback collaborators subscribe to them; delivery never
/// blocks the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SessionStarted {
        session_id: SessionId,
        generation: u64,
        kind: SessionKind,
        planned_ms: u64,
        at: DateTime<Utc>,
    },
    /// An unhealthy run crossed a threshold multiple.
    WarningFired {
        session_id: Option<SessionId>,
        posture: PostureType,
        unhealthy_ms: u64,
        at: DateTime<Utc>,
    },
    /// Emitted exactly once per session, after the statistics hand-off.
    SessionCompleted { session: Session },
    StateChanged { snapshot: SessionSnapshot },
    Fault { reason: String, at: DateTime<Utc> },
}

impl Event {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SessionStarted { .. } => "session_started",
            Event::WarningFired { .. } => "warning_fired",
            Event::SessionCompleted { .. } => "session_completed",
            Event::StateChanged { .. } => "state_changed",
            Event::Fault { .. } => "fault",
        }
    }
}
