use std::io::{BufRead, Write};
use std::sync::Arc;

use clap::Args;
use postureguard_core::runtime::{parse_feed_line, FeedEvent, SessionDriver};
use postureguard_core::storage::{Config, Database};
use postureguard_core::{
    Clock, Event, LifecycleState, MemorySink, SessionCoordinator, SessionKind, StatisticsSink,
    SystemClock,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Args)]
pub struct RunArgs {
    /// Session kind to start with
    #[arg(long, default_value = "work")]
    kind: SessionKind,
    /// Override the configured duration for this session, in seconds
    #[arg(long)]
    duration: Option<u64>,
    /// Keep completed sessions in memory instead of the database
    #[arg(long)]
    no_store: bool,
    /// Also print a snapshot after every state change
    #[arg(long)]
    snapshots: bool,
}

pub fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let mut settings = config.settings()?;
    if let Some(secs) = args.duration {
        match args.kind {
            SessionKind::Work => settings.work_duration_secs = secs,
            SessionKind::Break => settings.break_duration_secs = secs,
        }
    }
    settings.validate()?;

    let sink: Arc<dyn StatisticsSink> = if args.no_store {
        Arc::new(MemorySink::new())
    } else {
        Arc::new(Database::open()?)
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_session(args, settings, sink))
}

/// Feed stdin to the driver from a plain thread. A read blocked on an idle
/// terminal then cannot hold up runtime shutdown once the session is over.
fn spawn_stdin_feed(clock: Arc<dyn Clock>) -> mpsc::Receiver<FeedEvent> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(%err, "classification feed read failed");
                    break;
                }
            };
            match parse_feed_line(&line, clock.now()) {
                Ok(Some(event)) => {
                    if tx.blocking_send(event).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(line = %line, %err, "skipping unreadable feed line"),
            }
        }
    });
    rx
}

fn print_event(event: &Event) -> Result<(), Box<dyn std::error::Error>> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", serde_json::to_string(event)?)?;
    out.flush()?;
    Ok(())
}

async fn run_session(
    args: RunArgs,
    settings: postureguard_core::SessionSettings,
    sink: Arc<dyn StatisticsSink>,
) -> Result<(), Box<dyn std::error::Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let coordinator = SessionCoordinator::new(settings, sink, clock.clone())?;
    let mut events = coordinator.subscribe();

    // Start before the driver reads stdin, so feed commands always apply
    // to this session.
    coordinator.select_kind(args.kind);
    let ticket = coordinator.start()?;
    info!(session_id = %ticket.session_id, kind = %ticket.kind, "reading postures from stdin");

    let driver = SessionDriver::spawn(coordinator.clone(), spawn_stdin_feed(clock));

    let outcome = loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "output fell behind, events dropped");
                continue;
            }
            Err(RecvError::Closed) => break Ok(()),
        };

        let printable = args.snapshots || !matches!(event, Event::StateChanged { .. });
        if printable {
            print_event(&event)?;
        }

        match &event {
            Event::SessionCompleted { .. } => break Ok(()),
            Event::Fault { reason, .. } => break Err(format!("session faulted: {reason}")),
            Event::StateChanged { snapshot } if snapshot.state == LifecycleState::Idle => {
                info!("session reset, nothing stored");
                break Ok(());
            }
            _ => {}
        }
    };

    driver.shutdown().await?;
    outcome.map_err(Into::into)
}
