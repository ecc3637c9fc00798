//! Countdown timer for a single work or break interval.
//!
//! Like the rest of the core, the timer owns no thread. The caller passes
//! "now" into every command and calls `tick()` at [`TICK_INTERVAL`].
//!
//! Remaining time is never decremented per tick. It is derived from the
//! value frozen at the last resume and the running time since, so late,
//! missed or duplicate ticks cannot skew it and pauses add nothing.
//!
//! ```text
//! Idle -> Running <-> Paused
//!            |
//!            v
//!         Expired
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use super::millis_between;

/// Cadence at which the driver ticks a running timer.
pub const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    Idle,
    Running,
    Paused,
    Expired,
}

impl TimerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerStatus::Idle => "idle",
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
            TimerStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerEvent {
    Tick { remaining_ms: u64 },
    /// Emitted once, carrying the instant the countdown actually hit zero.
    Expired { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTimer {
    status: TimerStatus,
    duration_ms: u64,
    /// Remaining time frozen at the last start/resume/pause.
    remaining_at_anchor_ms: u64,
    /// Set only while running.
    resumed_at: Option<DateTime<Utc>>,
}

impl Default for SessionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTimer {
    pub fn new() -> Self {
        Self {
            status: TimerStatus::Idle,
            duration_ms: 0,
            remaining_at_anchor_ms: 0,
            resumed_at: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn status(&self) -> TimerStatus {
        self.status
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn remaining_ms(&self, now: DateTime<Utc>) -> u64 {
        match (self.status, self.resumed_at) {
            (TimerStatus::Running, Some(resumed_at)) => self
                .remaining_at_anchor_ms
                .saturating_sub(millis_between(resumed_at, now)),
            (TimerStatus::Expired, _) => 0,
            _ => self.remaining_at_anchor_ms,
        }
    }

    /// Running time accumulated so far, never more than the duration.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        self.duration_ms.saturating_sub(self.remaining_ms(now))
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&mut self, duration_ms: u64, now: DateTime<Utc>) -> Result<(), SessionError> {
        if matches!(self.status, TimerStatus::Running | TimerStatus::Paused) {
            return Err(SessionError::invalid_transition(self.status.as_str(), "start timer"));
        }
        if duration_ms == 0 {
            return Err(SessionError::invalid_config("duration", "must be greater than zero"));
        }
        *self = Self {
            status: TimerStatus::Running,
            duration_ms,
            remaining_at_anchor_ms: duration_ms,
            resumed_at: Some(now),
        };
        Ok(())
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.status != TimerStatus::Running {
            return Err(SessionError::invalid_transition(self.status.as_str(), "pause timer"));
        }
        self.remaining_at_anchor_ms = self.remaining_ms(now);
        self.resumed_at = None;
        self.status = TimerStatus::Paused;
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.status != TimerStatus::Paused {
            return Err(SessionError::invalid_transition(self.status.as_str(), "resume timer"));
        }
        self.resumed_at = Some(now);
        self.status = TimerStatus::Running;
        Ok(())
    }

    /// Back to a zero-length idle timer. Valid from any state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Stop counting without expiring, e.g. for a manual completion.
    /// Returns the running time accumulated up to `now`.
    pub fn halt(&mut self, now: DateTime<Utc>) -> u64 {
        let elapsed = self.elapsed_ms(now);
        self.remaining_at_anchor_ms = self.remaining_ms(now);
        self.resumed_at = None;
        self.status = TimerStatus::Idle;
        elapsed
    }

    /// Advance the countdown. Only a running timer produces events.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<TimerEvent> {
        if self.status != TimerStatus::Running {
            return None;
        }
        let remaining = self.remaining_ms(now);
        if remaining > 0 {
            return Some(TimerEvent::Tick {
                remaining_ms: remaining,
            });
        }

        let expired_at = self
            .resumed_at
            .map(|resumed_at| resumed_at + Duration::milliseconds(self.remaining_at_anchor_ms as i64))
            .unwrap_or(now);
        self.status = TimerStatus::Expired;
        self.remaining_at_anchor_ms = 0;
        self.resumed_at = None;
        Some(TimerEvent::Expired { at: expired_at })
    }
}
