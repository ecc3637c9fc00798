//! Database schema migrations for postureguard.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};
use tracing::{info, warn};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        info!(from = current_version, to = SCHEMA_VERSION, "database schema migrated");
    }
    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (initial database).
pub(crate) fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: sessions and their posture logs.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id           TEXT PRIMARY KEY,
            kind         TEXT NOT NULL,
            started_at   TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            planned_ms   INTEGER NOT NULL,
            active_ms    INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS posture_records (
            session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            seq         INTEGER NOT NULL,
            posture     TEXT NOT NULL,
            started_at  TEXT NOT NULL,
            offset_ms   INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            PRIMARY KEY (session_id, seq)
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_completed_at ON sessions(completed_at);
        CREATE INDEX IF NOT EXISTS idx_sessions_kind ON sessions(kind);",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: store the health score with the session for cheap listing.
///
/// Backfills existing rows from their posture records.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch("ALTER TABLE sessions ADD COLUMN health_score REAL NOT NULL DEFAULT 0;")?;
    tx.execute(
        "UPDATE sessions
         SET health_score = MIN(100.0, COALESCE((
             SELECT SUM(duration_ms) FROM posture_records
             WHERE session_id = sessions.id AND posture = 'excellent'
         ), 0) * 100.0 / active_ms)
         WHERE active_ms > 0",
        [],
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}
