use serde::{Deserialize, Serialize};

use super::model::SessionKind;
use crate::error::SessionError;
use crate::posture::WarningThresholdConfig;

/// Resolved configuration the coordinator reads once per `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub work_duration_secs: u64,
    pub break_duration_secs: u64,
    pub thresholds: WarningThresholdConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            work_duration_secs: 25 * 60,
            break_duration_secs: 5 * 60,
            thresholds: WarningThresholdConfig::default(),
        }
    }
}

impl SessionSettings {
    /// All durations and thresholds must be positive.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.work_duration_secs == 0 {
            return Err(SessionError::invalid_config(
                "work_duration_secs",
                "must be greater than zero",
            ));
        }
        if self.break_duration_secs == 0 {
            return Err(SessionError::invalid_config(
                "break_duration_secs",
                "must be greater than zero",
            ));
        }
        self.thresholds.validate()
    }

    pub fn duration_ms(&self, kind: SessionKind) -> u64 {
        let secs = match kind {
            SessionKind::Work => self.work_duration_secs,
            SessionKind::Break => self.break_duration_secs,
        };
        secs.saturating_mul(1000)
    }
}
