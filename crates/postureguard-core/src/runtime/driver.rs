//! Background task that keeps a [`SessionCoordinator`] moving.
//!
//! The coordinator owns no thread; this task feeds it ticks, periodic
//! posture re-checks and classifications. The generation it ticks with is
//! armed from the coordinator's own notifications, so a tick can never
//! reach a session it was not armed for.

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::source::{ClassificationSource, ControlCommand, FeedEvent};
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::session::SessionCoordinator;
use crate::timer::TICK_INTERVAL;

pub struct SessionDriver;

impl SessionDriver {
    /// Spawn the driver on the current tokio runtime.
    pub fn spawn<S>(coordinator: SessionCoordinator, source: S) -> DriverHandle
    where
        S: ClassificationSource + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(drive(coordinator, source, shutdown_rx));
        DriverHandle {
            shutdown_tx,
            handle,
        }
    }
}

/// Owner's handle to a running driver.
pub struct DriverHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DriverHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task to stop and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.handle
            .await
            .map_err(|err| CoreError::Custom(format!("session driver failed to join: {err}")))
    }
}

fn interval(period: std::time::Duration) -> Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Generation to tick with, if a session is running or paused.
fn armed_from_snapshot(coordinator: &SessionCoordinator) -> Option<u64> {
    let snapshot = coordinator.snapshot();
    snapshot.state.is_active().then_some(snapshot.generation)
}

async fn drive<S>(
    coordinator: SessionCoordinator,
    mut source: S,
    mut shutdown: watch::Receiver<bool>,
) where
    S: ClassificationSource,
{
    let mut events = coordinator.subscribe();
    let mut armed = armed_from_snapshot(&coordinator);
    let mut ticker = interval(TICK_INTERVAL);
    let mut recheck = interval(coordinator.check_interval());
    let mut source_open = true;
    info!(?armed, "session driver started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Some(generation) = armed {
                    coordinator.tick(generation);
                }
            }
            _ = recheck.tick() => {
                if armed.is_some() {
                    coordinator.recheck_posture();
                }
            }
            event = events.recv() => match event {
                Ok(Event::SessionStarted { generation, .. }) => {
                    armed = Some(generation);
                    recheck = interval(coordinator.check_interval());
                    debug!(generation, "driver armed");
                }
                Ok(Event::SessionCompleted { .. } | Event::Fault { .. }) => {
                    armed = None;
                }
                Ok(Event::StateChanged { snapshot }) => {
                    if !snapshot.state.is_active() {
                        armed = None;
                    }
                }
                Ok(Event::WarningFired { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "driver lagged behind coordinator events");
                    armed = armed_from_snapshot(&coordinator);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            feed = source.next_event(), if source_open => match feed {
                Some(feed) => apply(&coordinator, feed),
                None => {
                    source_open = false;
                    info!("classification source ended, continuing on timer only");
                }
            },
        }
    }
    info!("session driver stopped");
}

fn apply(coordinator: &SessionCoordinator, feed: FeedEvent) {
    match feed {
        FeedEvent::Posture { posture, at } => {
            coordinator.observe_classification(posture, at);
        }
        FeedEvent::Unavailable { reason, .. } => {
            coordinator.classification_unavailable(reason);
        }
        FeedEvent::Fault { reason } => coordinator.fault(reason),
        FeedEvent::Control(command) => {
            // Rejections are already logged and recorded in the snapshot.
            let _ = match command {
                ControlCommand::Start => coordinator.start().map(|_| ()),
                ControlCommand::Pause => coordinator.pause(),
                ControlCommand::Resume => coordinator.resume(),
                ControlCommand::Complete => coordinator.complete().map(|_| ()),
                ControlCommand::Reset => {
                    coordinator.reset();
                    Ok(())
                }
                ControlCommand::SelectKind(kind) => {
                    coordinator.select_kind(kind);
                    Ok(())
                }
            };
        }
    }
}
