//! Unhealthy-posture duration tracking with repeating warnings.
//!
//! The monitor treats every observation as ground truth. A single healthy
//! sample ends the current unhealthy run; smoothing is the classifier's job.
//!
//! ```text
//! threshold = 10s, lookingDown from t=0
//! t=0 .. t=9   no warning
//! t=10         warning #1
//! t=20         warning #2
//! excellent    run cleared, next run counts from 0
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::PostureType;
use crate::error::SessionError;
use crate::timer::millis_between;

/// Thresholds consumed by [`PostureWarningMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningThresholdConfig {
    /// Continuous unhealthy time before a warning, and the repeat cadence.
    pub warning_threshold_secs: u64,
    /// How often the last posture is re-observed when nothing new arrives.
    pub check_interval_secs: u64,
}

impl Default for WarningThresholdConfig {
    fn default() -> Self {
        Self {
            warning_threshold_secs: 10,
            check_interval_secs: 1,
        }
    }
}

impl WarningThresholdConfig {
    /// Build a validated config. Both values must be positive.
    pub fn new(warning_threshold_secs: u64, check_interval_secs: u64) -> Result<Self, SessionError> {
        let config = Self {
            warning_threshold_secs,
            check_interval_secs,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.warning_threshold_secs == 0 {
            return Err(SessionError::invalid_config(
                "warning_threshold_secs",
                "must be greater than zero",
            ));
        }
        if self.check_interval_secs == 0 {
            return Err(SessionError::invalid_config(
                "check_interval_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn threshold_ms(&self) -> u64 {
        self.warning_threshold_secs.saturating_mul(1000)
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_interval_secs)
    }
}

/// Emitted each time an unhealthy run crosses a threshold multiple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureWarning {
    pub posture: PostureType,
    /// Length of the unhealthy run when the warning fired.
    pub unhealthy_ms: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PostureWarningMonitor {
    config: WarningThresholdConfig,
    unhealthy_since: Option<DateTime<Utc>>,
    last_warning_at: Option<DateTime<Utc>>,
    last_posture: Option<PostureType>,
    suspended_at: Option<DateTime<Utc>>,
}

impl PostureWarningMonitor {
    pub fn new(config: WarningThresholdConfig) -> Self {
        Self {
            config,
            unhealthy_since: None,
            last_warning_at: None,
            last_posture: None,
            suspended_at: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn config(&self) -> &WarningThresholdConfig {
        &self.config
    }

    pub fn last_posture(&self) -> Option<PostureType> {
        self.last_posture
    }

    pub fn unhealthy_since(&self) -> Option<DateTime<Utc>> {
        self.unhealthy_since
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended_at.is_some()
    }

    /// Length of the current unhealthy run as of `now`.
    ///
    /// While suspended the run is frozen at the suspension instant.
    pub fn unhealthy_duration_ms(&self, now: DateTime<Utc>) -> u64 {
        let now = self.suspended_at.unwrap_or(now);
        self.unhealthy_since
            .map(|since| millis_between(since, now))
            .unwrap_or(0)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Feed one classification. Returns a warning when a threshold is crossed.
    ///
    /// Observations made while suspended are ignored.
    pub fn observe(&mut self, posture: PostureType, at: DateTime<Utc>) -> Option<PostureWarning> {
        if self.suspended_at.is_some() {
            trace!(%posture, "monitor suspended, observation dropped");
            return None;
        }
        self.last_posture = Some(posture);

        if posture.is_healthy() {
            if self.unhealthy_since.take().is_some() {
                debug!(%posture, "unhealthy run cleared");
            }
            self.last_warning_at = None;
            return None;
        }

        let since = *self.unhealthy_since.get_or_insert(at);
        let elapsed = millis_between(since, at);
        let threshold = self.config.threshold_ms();
        if elapsed < threshold {
            return None;
        }

        let window_open = self
            .last_warning_at
            .map_or(true, |last| millis_between(last, at) >= threshold);
        if !window_open {
            return None;
        }

        self.last_warning_at = Some(at);
        debug!(%posture, unhealthy_ms = elapsed, "posture warning threshold crossed");
        Some(PostureWarning {
            posture,
            unhealthy_ms: elapsed,
            at,
        })
    }

    /// Freeze the current run. Repeated calls keep the first instant.
    pub fn suspend(&mut self, at: DateTime<Utc>) {
        if self.suspended_at.is_none() {
            self.suspended_at = Some(at);
        }
    }

    /// Thaw the run, shifting its anchors past the suspended span.
    pub fn resume(&mut self, at: DateTime<Utc>) {
        let Some(suspended_at) = self.suspended_at.take() else {
            return;
        };
        let gap = Duration::milliseconds(millis_between(suspended_at, at) as i64);
        if let Some(since) = self.unhealthy_since.as_mut() {
            *since += gap;
        }
        if let Some(last) = self.last_warning_at.as_mut() {
            *last += gap;
        }
    }

    /// Forget the current run and the last posture. Suspension is kept.
    pub fn clear_run(&mut self) {
        self.unhealthy_since = None;
        self.last_warning_at = None;
        self.last_posture = None;
    }

    pub fn reset(&mut self) {
        self.clear_run();
        self.suspended_at = None;
    }
}
