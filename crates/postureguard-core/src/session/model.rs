use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::posture::{PostureRecord, PostureType};

/// Unique identifier of a session. Completion is deduplicated on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Work,
    Break,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Work => "work",
            SessionKind::Break => "break",
        }
    }

    /// Kind that follows this one in the work/break cycle.
    pub fn next(self) -> Self {
        match self {
            SessionKind::Work => SessionKind::Break,
            SessionKind::Break => SessionKind::Work,
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "work" | "focus" => Ok(SessionKind::Work),
            "break" | "rest" => Ok(SessionKind::Break),
            other => Err(format!("unknown session kind: {other}")),
        }
    }
}

/// One timed work or break interval with its posture history.
///
/// Only the coordinator appends to the posture log, and only while the
/// session is active. Completed sessions are handed out by value and never
/// change again. Every metric is computed from the log on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    kind: SessionKind,
    started_at: DateTime<Utc>,
    planned_ms: u64,
    posture_log: Vec<PostureRecord>,
    completed_at: Option<DateTime<Utc>>,
    /// Running time at completion. Paused spans are excluded.
    active_ms: Option<u64>,
}

impl Session {
    pub(crate) fn begin(kind: SessionKind, started_at: DateTime<Utc>, planned_ms: u64) -> Self {
        Self {
            id: SessionId::new(),
            kind,
            started_at,
            planned_ms,
            posture_log: Vec::new(),
            completed_at: None,
            active_ms: None,
        }
    }

    /// Rebuild a finished session from storage.
    pub fn restore(
        id: SessionId,
        kind: SessionKind,
        started_at: DateTime<Utc>,
        planned_ms: u64,
        posture_log: Vec<PostureRecord>,
        completed_at: DateTime<Utc>,
        active_ms: u64,
    ) -> Self {
        Self {
            id,
            kind,
            started_at,
            planned_ms,
            posture_log,
            completed_at: Some(completed_at),
            active_ms: Some(active_ms),
        }
    }

    pub(crate) fn append(&mut self, record: PostureRecord) {
        debug_assert!(self.completed_at.is_none(), "completed sessions are immutable");
        self.posture_log.push(record);
    }

    pub(crate) fn finish(&mut self, completed_at: DateTime<Utc>, active_ms: u64) {
        self.completed_at = Some(completed_at);
        self.active_ms = Some(active_ms);
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn planned_ms(&self) -> u64 {
        self.planned_ms
    }

    pub fn posture_log(&self) -> &[PostureRecord] {
        &self.posture_log
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn active_ms(&self) -> Option<u64> {
        self.active_ms
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    // ── Derived metrics ──────────────────────────────────────────────

    /// Sum of all recorded posture intervals.
    pub fn tracked_ms(&self) -> u64 {
        self.posture_log.iter().map(|r| r.duration_ms).sum()
    }

    pub fn healthy_ms(&self) -> u64 {
        self.posture_log
            .iter()
            .filter(|r| r.posture.is_healthy())
            .map(|r| r.duration_ms)
            .sum()
    }

    /// Healthy time as a percentage of elapsed time (0.0 ..= 100.0).
    ///
    /// Elapsed time is the running time at completion, or the tracked time
    /// for a session still in progress.
    pub fn health_score(&self) -> f64 {
        let elapsed = self.active_ms.unwrap_or_else(|| self.tracked_ms());
        if elapsed == 0 {
            return 0.0;
        }
        (self.healthy_ms() as f64 / elapsed as f64 * 100.0).min(100.0)
    }

    /// Time spent in each posture. Postures never observed are absent.
    pub fn breakdown(&self) -> BTreeMap<PostureType, u64> {
        let mut totals = BTreeMap::new();
        for record in &self.posture_log {
            *totals.entry(record.posture).or_insert(0) += record.duration_ms;
        }
        totals
    }

    /// Whether consecutive records line up on the running clock.
    pub fn is_contiguous(&self) -> bool {
        self.posture_log
            .windows(2)
            .all(|pair| pair[0].end_offset_ms() == pair[1].offset_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(posture: PostureType, offset_s: u64, secs: u64, base: DateTime<Utc>) -> PostureRecord {
        PostureRecord {
            posture,
            started_at: base + Duration::seconds(offset_s as i64),
            offset_ms: offset_s * 1000,
            duration_ms: secs * 1000,
        }
    }

    fn sample_session() -> Session {
        let base = Utc::now();
        let mut session = Session::begin(SessionKind::Work, base, 60_000);
        session.append(record(PostureType::Excellent, 0, 30, base));
        session.append(record(PostureType::LookingDown, 30, 15, base));
        session.append(record(PostureType::Excellent, 45, 10, base));
        session.append(record(PostureType::Absent, 55, 5, base));
        session.finish(base + Duration::seconds(60), 60_000);
        session
    }

    #[test]
    fn health_score_is_healthy_over_elapsed() {
        let session = sample_session();
        assert_eq!(session.healthy_ms(), 40_000);
        let score = session.health_score();
        assert!((score - 66.666).abs() < 0.01, "score={score}");
    }

    #[test]
    fn breakdown_sums_per_posture() {
        let breakdown = sample_session().breakdown();
        assert_eq!(breakdown[&PostureType::Excellent], 40_000);
        assert_eq!(breakdown[&PostureType::LookingDown], 15_000);
        assert_eq!(breakdown[&PostureType::Absent], 5_000);
        assert!(!breakdown.contains_key(&PostureType::Tilted));
    }

    #[test]
    fn contiguity_detects_gaps() {
        let session = sample_session();
        assert!(session.is_contiguous());
        assert_eq!(session.tracked_ms(), session.active_ms().unwrap());

        let base = Utc::now();
        let mut gappy = Session::begin(SessionKind::Break, base, 10_000);
        gappy.append(record(PostureType::Excellent, 0, 2, base));
        gappy.append(record(PostureType::Tilted, 3, 2, base));
        assert!(!gappy.is_contiguous());
    }

    #[test]
    fn empty_session_scores_zero() {
        let session = Session::begin(SessionKind::Work, Utc::now(), 1_000);
        assert_eq!(session.health_score(), 0.0);
        assert!(session.is_contiguous());
    }

    #[test]
    fn kind_cycles_and_parses() {
        assert_eq!(SessionKind::Work.next(), SessionKind::Break);
        assert_eq!(SessionKind::Break.next(), SessionKind::Work);
        assert_eq!("Focus".parse::<SessionKind>(), Ok(SessionKind::Work));
        assert!("nap".parse::<SessionKind>().is_err());
    }

    #[test]
    fn session_ids_are_unique_and_roundtrip() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<SessionId>().unwrap(), a);
    }
}
