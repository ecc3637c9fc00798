use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{SessionId, SessionKind};
use super::state_machine::LifecycleState;
use crate::posture::PostureType;

/// Read-only projection of the coordinator's merged state.
///
/// Rebuilt after every mutation and published as a whole, so readers never
/// see a half-applied update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: LifecycleState,
    pub session_id: Option<SessionId>,
    pub kind: Option<SessionKind>,
    pub generation: u64,
    pub remaining_ms: u64,
    /// `None` until a classification arrives, or while classification is
    /// unavailable.
    pub current_posture: Option<PostureType>,
    pub bad_posture_ms: u64,
    pub last_error: Option<String>,
    pub at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn idle(at: DateTime<Utc>) -> Self {
        Self {
            state: LifecycleState::Idle,
            session_id: None,
            kind: None,
            generation: 0,
            remaining_ms: 0,
            current_posture: None,
            bad_posture_ms: 0,
            last_error: None,
            at,
        }
    }
}
