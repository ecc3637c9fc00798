use clap::Subcommand;
use postureguard_core::storage::Database;
use postureguard_core::SessionId;
use serde_json::json;

#[derive(Subcommand)]
pub enum StatsAction {
    /// Aggregate statistics
    Summary {
        /// Only sessions completed today (UTC)
        #[arg(long)]
        today: bool,
    },
    /// Recent sessions, newest first
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// One session with its full posture log
    Show {
        /// Session ID
        id: String,
    },
}

pub fn run(action: StatsAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;

    match action {
        StatsAction::Summary { today } => {
            let stats = if today {
                db.stats_today()?
            } else {
                db.stats_all()?
            };
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        StatsAction::List { limit } => {
            let sessions = db.list_sessions(limit)?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        StatsAction::Show { id } => {
            let id: SessionId = id
                .parse()
                .map_err(|e| format!("invalid session id '{id}': {e}"))?;
            let Some(session) = db.load_session(&id)? else {
                return Err(format!("session not found: {id}").into());
            };
            let report = json!({
                "session": session,
                "health_score": session.health_score(),
                "breakdown": session.breakdown(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
