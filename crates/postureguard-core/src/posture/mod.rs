//! Posture classifications and the intervals recorded for them.

mod monitor;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use monitor::{PostureWarning, PostureWarningMonitor, WarningThresholdConfig};

/// A discrete posture label produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PostureType {
    Excellent,
    LookingDown,
    Tilted,
    TooClose,
    /// Subject not detected. Counts as unhealthy for warnings but is
    /// reported separately in statistics.
    Absent,
}

impl PostureType {
    pub const ALL: [PostureType; 5] = [
        PostureType::Excellent,
        PostureType::LookingDown,
        PostureType::Tilted,
        PostureType::TooClose,
        PostureType::Absent,
    ];

    pub fn is_healthy(self) -> bool {
        matches!(self, PostureType::Excellent)
    }

    /// Stable wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            PostureType::Excellent => "excellent",
            PostureType::LookingDown => "lookingDown",
            PostureType::Tilted => "tilted",
            PostureType::TooClose => "tooClose",
            PostureType::Absent => "absent",
        }
    }

    /// Human-readable label for display collaborators.
    pub fn label(self) -> &'static str {
        match self {
            PostureType::Excellent => "Excellent posture",
            PostureType::LookingDown => "Looking down",
            PostureType::Tilted => "Head tilted",
            PostureType::TooClose => "Too close to screen",
            PostureType::Absent => "Not detected",
        }
    }
}

impl fmt::Display for PostureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_' && *c != ' ')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "excellent" | "good" => Ok(PostureType::Excellent),
            "lookingdown" => Ok(PostureType::LookingDown),
            "tilted" => Ok(PostureType::Tilted),
            "tooclose" => Ok(PostureType::TooClose),
            "absent" => Ok(PostureType::Absent),
            _ => Err(format!("unknown posture: {s}")),
        }
    }
}

/// A closed interval of a single posture within a session.
///
/// `offset_ms` is measured on the session's running clock, so paused time
/// never appears between two records:
/// `records[i].offset_ms + records[i].duration_ms == records[i + 1].offset_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureRecord {
    pub posture: PostureType,
    pub started_at: DateTime<Utc>,
    pub offset_ms: u64,
    pub duration_ms: u64,
}

impl PostureRecord {
    /// Wall-clock end of the interval.
    pub fn ended_at(&self) -> DateTime<Utc> {
        self.started_at + Duration::milliseconds(self.duration_ms as i64)
    }

    pub fn end_offset_ms(&self) -> u64 {
        self.offset_ms.saturating_add(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_excellent_is_healthy() {
        let healthy: Vec<_> = PostureType::ALL.iter().filter(|p| p.is_healthy()).collect();
        assert_eq!(healthy, vec![&PostureType::Excellent]);
    }

    #[test]
    fn parses_wire_names_and_aliases() {
        assert_eq!("lookingDown".parse::<PostureType>(), Ok(PostureType::LookingDown));
        assert_eq!("looking-down".parse::<PostureType>(), Ok(PostureType::LookingDown));
        assert_eq!("TOO_CLOSE".parse::<PostureType>(), Ok(PostureType::TooClose));
        assert_eq!(" absent ".parse::<PostureType>(), Ok(PostureType::Absent));
        assert!("slouching".parse::<PostureType>().is_err());
    }

    #[test]
    fn serde_uses_camel_case() {
        let json = serde_json::to_string(&PostureType::TooClose).unwrap();
        assert_eq!(json, "\"tooClose\"");
        for posture in PostureType::ALL {
            assert_eq!(posture.as_str().parse::<PostureType>(), Ok(posture));
        }
    }

    #[test]
    fn record_end_follows_duration() {
        let start = Utc::now();
        let record = PostureRecord {
            posture: PostureType::Tilted,
            started_at: start,
            offset_ms: 2_000,
            duration_ms: 1_500,
        };
        assert_eq!(record.ended_at(), start + Duration::milliseconds(1_500));
        assert_eq!(record.end_offset_ms(), 3_500);
    }
}
