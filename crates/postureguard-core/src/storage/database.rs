//! SQLite-based session storage and statistics.
//!
//! Provides persistent storage for:
//! - Completed sessions and their posture logs
//! - Aggregate statistics (daily and all-time)

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{data_dir, migrations};
use crate::error::{CoreError, DatabaseError, Result};
use crate::posture::{PostureRecord, PostureType};
use crate::session::{Session, SessionId, SessionKind, StatisticsSink};

/// One row of the session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub kind: SessionKind,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub planned_ms: u64,
    pub active_ms: u64,
    pub health_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureTotal {
    pub posture: PostureType,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_sessions: u64,
    pub work_sessions: u64,
    pub break_sessions: u64,
    pub total_focus_ms: u64,
    pub total_break_ms: u64,
    /// Mean health score over work sessions, 0 when there are none.
    pub average_health_score: f64,
    /// Time per posture across all sessions, in `PostureType` order.
    pub posture_totals: Vec<PostureTotal>,
    pub today_sessions: u64,
    pub today_focus_ms: u64,
}

/// SQLite database for session storage.
///
/// Stores completed sessions and provides statistics. The connection sits
/// behind a mutex so the database can serve as the coordinator's
/// [`StatisticsSink`].
pub struct Database {
    conn: Mutex<Connection>,
}

fn corrupt(table: &str, message: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::CorruptRow {
        table: table.to_string(),
        message: message.to_string(),
    }
}

fn parse_time(table: &str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(table, format!("bad timestamp '{raw}': {e}")))
}

fn today_start() -> String {
    format!("{}T00:00:00+00:00", Utc::now().format("%Y-%m-%d"))
}

struct SessionRow {
    id: String,
    kind: String,
    started_at: String,
    completed_at: String,
    planned_ms: u64,
    active_ms: u64,
    health_score: f64,
}

impl SessionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            started_at: row.get(2)?,
            completed_at: row.get(3)?,
            planned_ms: row.get(4)?,
            active_ms: row.get(5)?,
            health_score: row.get(6)?,
        })
    }

    fn into_summary(self) -> Result<SessionSummary, DatabaseError> {
        Ok(SessionSummary {
            id: self.id.parse().map_err(|e| corrupt("sessions", e))?,
            kind: self.kind.parse().map_err(|e: String| corrupt("sessions", e))?,
            started_at: parse_time("sessions", &self.started_at)?,
            completed_at: parse_time("sessions", &self.completed_at)?,
            planned_ms: self.planned_ms,
            active_ms: self.active_ms,
            health_score: self.health_score,
        })
    }
}

const SESSION_COLUMNS: &str =
    "id, kind, started_at, completed_at, planned_ms, active_ms, health_score";

impl Database {
    /// Open the database at `~/.config/postureguard/postureguard.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("postureguard.db");
        Ok(Self::open_at(&path)?)
    }

    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "database opened");
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a completed session with its posture log.
    ///
    /// Idempotent on the session id: returns `false` if the session was
    /// already stored, leaving the stored copy untouched.
    ///
    /// # Errors
    /// Returns an error if the session is not completed or the insert fails.
    pub fn record_session(&self, session: &Session) -> Result<bool, DatabaseError> {
        let (Some(completed_at), Some(active_ms)) = (session.completed_at(), session.active_ms())
        else {
            return Err(DatabaseError::QueryFailed(format!(
                "session {} is not completed",
                session.id()
            )));
        };

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO sessions
                (id, kind, started_at, completed_at, planned_ms, active_ms, health_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id().to_string(),
                session.kind().as_str(),
                session.started_at().to_rfc3339(),
                completed_at.to_rfc3339(),
                session.planned_ms(),
                active_ms,
                session.health_score(),
            ],
        )?;
        if inserted == 0 {
            debug!(session_id = %session.id(), "session already stored");
            return Ok(false);
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO posture_records
                    (session_id, seq, posture, started_at, offset_ms, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (seq, record) in session.posture_log().iter().enumerate() {
                stmt.execute(params![
                    session.id().to_string(),
                    seq as i64,
                    record.posture.as_str(),
                    record.started_at.to_rfc3339(),
                    record.offset_ms,
                    record.duration_ms,
                ])?;
            }
        }
        tx.commit()?;
        info!(
            session_id = %session.id(),
            records = session.posture_log().len(),
            "session stored"
        );
        Ok(true)
    }

    /// Most recently completed sessions first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY completed_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], SessionRow::from_row)?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?.into_summary()?);
        }
        Ok(summaries)
    }

    /// Rebuild a stored session with its full posture log.
    pub fn load_session(&self, id: &SessionId) -> Result<Option<Session>, DatabaseError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id.to_string()],
                SessionRow::from_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let summary = row.into_summary()?;

        let mut stmt = conn.prepare(
            "SELECT posture, started_at, offset_ms, duration_ms
             FROM posture_records WHERE session_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u64>(2)?,
                row.get::<_, u64>(3)?,
            ))
        })?;
        let mut log = Vec::new();
        for row in rows {
            let (posture, started_at, offset_ms, duration_ms) = row?;
            log.push(PostureRecord {
                posture: posture
                    .parse()
                    .map_err(|e: String| corrupt("posture_records", e))?,
                started_at: parse_time("posture_records", &started_at)?,
                offset_ms,
                duration_ms,
            });
        }

        Ok(Some(Session::restore(
            summary.id,
            summary.kind,
            summary.started_at,
            summary.planned_ms,
            log,
            summary.completed_at,
            summary.active_ms,
        )))
    }

    pub fn stats_today(&self) -> Result<Stats, DatabaseError> {
        let since = today_start();
        let mut stats = self.collect_stats(Some(&since))?;
        stats.today_sessions = stats.work_sessions;
        stats.today_focus_ms = stats.total_focus_ms;
        Ok(stats)
    }

    pub fn stats_all(&self) -> Result<Stats, DatabaseError> {
        let mut stats = self.collect_stats(None)?;

        let conn = self.conn();
        let (count, focus_ms) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(active_ms), 0)
             FROM sessions
             WHERE kind = 'work' AND completed_at >= ?1",
            params![today_start()],
            |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?)),
        )?;
        stats.today_sessions = count;
        stats.today_focus_ms = focus_ms;
        Ok(stats)
    }

    fn collect_stats(&self, since: Option<&str>) -> Result<Stats, DatabaseError> {
        // RFC 3339 strings from `to_rfc3339` share one format and sort by time.
        let since = since.unwrap_or("");
        let conn = self.conn();
        let mut stats = Stats::default();

        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*), COALESCE(SUM(active_ms), 0), COALESCE(AVG(health_score), 0)
             FROM sessions
             WHERE completed_at >= ?1
             GROUP BY kind",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, u64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;
        for row in rows {
            let (kind, count, active_ms, avg_score) = row?;
            stats.total_sessions += count;
            match kind.as_str() {
                "work" => {
                    stats.work_sessions += count;
                    stats.total_focus_ms += active_ms;
                    stats.average_health_score = avg_score;
                }
                "break" => {
                    stats.break_sessions += count;
                    stats.total_break_ms += active_ms;
                }
                other => return Err(corrupt("sessions", format!("unknown kind '{other}'"))),
            }
        }

        let mut stmt = conn.prepare(
            "SELECT r.posture, COALESCE(SUM(r.duration_ms), 0)
             FROM posture_records r
             JOIN sessions s ON s.id = r.session_id
             WHERE s.completed_at >= ?1
             GROUP BY r.posture",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;
        let mut totals = BTreeMap::new();
        for row in rows {
            let (posture, duration_ms) = row?;
            let posture: PostureType = posture
                .parse()
                .map_err(|e: String| corrupt("posture_records", e))?;
            totals.insert(posture, duration_ms);
        }
        stats.posture_totals = totals
            .into_iter()
            .map(|(posture, duration_ms)| PostureTotal {
                posture,
                duration_ms,
            })
            .collect();

        Ok(stats)
    }
}

impl StatisticsSink for Database {
    fn record_completed(&self, session: &Session) -> Result<()> {
        self.record_session(session)
            .map(|_| ())
            .map_err(CoreError::from)
    }
}
