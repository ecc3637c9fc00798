//! Session lifecycle built on [`SessionTimer`].
//!
//! ```text
//! Idle --start--> Running <--pause/resume--> Paused
//!                    |                          |
//!        expire / complete                   complete
//!                    v                          v
//!                Completed <--------------------+
//!
//! any --fault--> Error(reason)
//! Running | Paused | Completed | Error --reset--> Idle
//! ```
//!
//! Rejected commands leave the machine untouched and return
//! [`SessionError`]; none of them panic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::model::{Session, SessionKind};
use crate::error::SessionError;
use crate::timer::{SessionTimer, TimerEvent, TimerStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum LifecycleState {
    Idle,
    Running,
    Paused,
    Completed,
    Error(String),
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Running => "running",
            LifecycleState::Paused => "paused",
            LifecycleState::Completed => "completed",
            LifecycleState::Error(_) => "error",
        }
    }

    /// Running or paused: a session exists and can still change.
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Paused)
    }
}

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: LifecycleState,
    timer: SessionTimer,
    session: Option<Session>,
    generation: u64,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
            timer: SessionTimer::new(),
            session: None,
            generation: 0,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// Bumped on every successful `start`; stale ticks carry an old value.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The active session, or the last completed one.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Mutable access to the active session only.
    pub(crate) fn session_mut(&mut self) -> Option<&mut Session> {
        if self.state.is_active() {
            self.session.as_mut()
        } else {
            None
        }
    }

    pub fn remaining_ms(&self, now: DateTime<Utc>) -> u64 {
        self.timer.remaining_ms(now)
    }

    /// Running time of the active session as of `now`.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        self.timer.elapsed_ms(now)
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(
        &mut self,
        kind: SessionKind,
        duration_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<&Session, SessionError> {
        match self.state {
            LifecycleState::Running | LifecycleState::Paused => {
                return Err(SessionError::SessionAlreadyActive)
            }
            LifecycleState::Error(_) => {
                return Err(SessionError::invalid_transition(self.state.name(), "start"))
            }
            LifecycleState::Idle | LifecycleState::Completed => {}
        }
        if duration_ms == 0 {
            return Err(SessionError::invalid_config(
                format!("{kind}_duration"),
                "must be greater than zero",
            ));
        }

        self.timer.reset();
        self.timer.start(duration_ms, now)?;
        self.generation += 1;
        self.state = LifecycleState::Running;
        let session = self.session.insert(Session::begin(kind, now, duration_ms));
        info!(
            session_id = %session.id(),
            %kind,
            duration_ms,
            generation = self.generation,
            "session started"
        );
        Ok(session)
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.state != LifecycleState::Running {
            return Err(SessionError::invalid_transition(self.state.name(), "pause"));
        }
        self.timer.pause(now)?;
        self.state = LifecycleState::Paused;
        info!(remaining_ms = self.timer.remaining_ms(now), "session paused");
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.state != LifecycleState::Paused {
            return Err(SessionError::invalid_transition(self.state.name(), "resume"));
        }
        self.timer.resume(now)?;
        self.state = LifecycleState::Running;
        info!(remaining_ms = self.timer.remaining_ms(now), "session resumed");
        Ok(())
    }

    /// Advance the timer of a running session.
    ///
    /// On expiry the state stays `Running` until the caller applies the
    /// completion with [`complete`](Self::complete) at the reported instant,
    /// which lets it close the open posture record first.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<TimerEvent> {
        if self.state != LifecycleState::Running {
            return None;
        }
        self.timer.tick(now)
    }

    /// Finish the active session and return the immutable result.
    ///
    /// Used both for manual completion and for applying a timer expiry.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<Session, SessionError> {
        if !self.state.is_active() {
            return Err(SessionError::invalid_transition(self.state.name(), "complete"));
        }
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::invalid_transition(self.state.name(), "complete"));
        };

        let active_ms = if self.timer.status() == TimerStatus::Expired {
            self.timer.duration_ms()
        } else {
            self.timer.halt(now)
        };
        session.finish(now, active_ms);
        self.state = LifecycleState::Completed;
        info!(session_id = %session.id(), active_ms, "session completed");
        Ok(session.clone())
    }

    /// Return to idle from any state. Returns the discarded in-progress
    /// session, if there was one.
    pub fn reset(&mut self) -> Option<Session> {
        let was_active = self.state.is_active();
        self.timer.reset();
        self.state = LifecycleState::Idle;
        let session = self.session.take();
        if was_active {
            if let Some(discarded) = &session {
                info!(session_id = %discarded.id(), "session discarded");
            }
            session
        } else {
            None
        }
    }

    /// Enter `Error(reason)` from any state, discarding an active session.
    pub fn fault(&mut self, reason: impl Into<String>) -> Option<Session> {
        let reason = reason.into();
        let was_active = self.state.is_active();
        self.timer.reset();
        error!(%reason, "session fault");
        self.state = LifecycleState::Error(reason);
        let session = self.session.take();
        if was_active {
            session
        } else {
            None
        }
    }
}
