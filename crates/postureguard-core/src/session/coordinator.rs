//! The session coordinator.
//!
//! Merges three independently evolving inputs into one consistent state:
//! control commands, timer ticks from the driver, and classifications from
//! the posture producer.
//!
//! All mutations go through a single mutex. After each one the merged
//! [`SessionSnapshot`] is rebuilt and published on a `watch` channel, so
//! `snapshot()` never waits for a mutation. Notifications go out on a
//! `broadcast` channel and a slow subscriber only loses old events.
//!
//! Completed sessions are handed to the [`StatisticsSink`] outside the lock.
//! The id of the last completed session is claimed under the lock, so a
//! duplicate tick racing a manual `complete()` still yields a single hand-off.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn};

use super::model::{Session, SessionId, SessionKind};
use super::settings::SessionSettings;
use super::sink::StatisticsSink;
use super::snapshot::SessionSnapshot;
use super::state_machine::{LifecycleState, SessionStateMachine};
use crate::error::SessionError;
use crate::events::Event;
use crate::posture::{PostureRecord, PostureType, PostureWarning, PostureWarningMonitor};
use crate::timer::{Clock, TimerEvent};

const EVENT_CAPACITY: usize = 256;

/// Identifies the session a `start()` created. Ticks must present the
/// generation to be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTicket {
    pub session_id: SessionId,
    pub generation: u64,
    pub kind: SessionKind,
    pub planned_ms: u64,
}

#[derive(Debug, Clone)]
struct OpenRecord {
    posture: PostureType,
    started_at: DateTime<Utc>,
    offset_ms: u64,
}

struct CoordinatorState {
    machine: SessionStateMachine,
    monitor: PostureWarningMonitor,
    /// Applied at the next `start()`.
    settings: SessionSettings,
    next_kind: SessionKind,
    open_record: Option<OpenRecord>,
    /// What the display shows; cleared while classification is unavailable.
    current_posture: Option<PostureType>,
    /// What the posture log continues with across gaps.
    last_known_posture: Option<PostureType>,
    classification_unavailable: bool,
    last_error: Option<String>,
    last_completed: Option<SessionId>,
}

struct Shared {
    state: Mutex<CoordinatorState>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<Event>,
    sink: Arc<dyn StatisticsSink>,
    clock: Arc<dyn Clock>,
}

/// Cloneable handle to one coordinator instance.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Shared>,
}

impl SessionCoordinator {
    pub fn new(
        settings: SessionSettings,
        sink: Arc<dyn StatisticsSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionError> {
        settings.validate()?;
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::idle(clock.now()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = CoordinatorState {
            machine: SessionStateMachine::new(),
            monitor: PostureWarningMonitor::new(settings.thresholds),
            settings,
            next_kind: SessionKind::Work,
            open_record: None,
            current_posture: None,
            last_known_posture: None,
            classification_unavailable: false,
            last_error: None,
            last_completed: None,
        };
        Ok(Self {
            inner: Arc::new(Shared {
                state: Mutex::new(state),
                snapshot_tx,
                events,
                sink,
                clock,
            }),
        })
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Latest published snapshot. Never blocks on a mutation in progress.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn settings(&self) -> SessionSettings {
        self.lock().settings
    }

    /// Check interval of the session in progress (or of the next one).
    pub fn check_interval(&self) -> std::time::Duration {
        let state = self.lock();
        if state.machine.state().is_active() {
            state.monitor.config().check_interval()
        } else {
            state.settings.thresholds.check_interval()
        }
    }

    pub fn generation(&self) -> u64 {
        self.lock().machine.generation()
    }

    // ── Control ──────────────────────────────────────────────────────

    /// Start the next session using the current settings.
    pub fn start(&self) -> Result<SessionTicket, SessionError> {
        let now = self.now();
        let mut state = self.lock();

        if state.machine.state().is_active() {
            return Err(self.reject(&mut state, now, SessionError::SessionAlreadyActive));
        }
        let settings = state.settings;
        if let Err(err) = settings.validate() {
            return Err(self.reject(&mut state, now, err));
        }

        let kind = state.next_kind;
        let planned_ms = settings.duration_ms(kind);
        let session_id = match state.machine.start(kind, planned_ms, now) {
            Ok(session) => session.id().clone(),
            Err(err) => return Err(self.reject(&mut state, now, err)),
        };
        let generation = state.machine.generation();

        state.monitor = PostureWarningMonitor::new(settings.thresholds);
        state.open_record = None;
        state.last_error = None;
        let mut events = vec![Event::SessionStarted {
            session_id: session_id.clone(),
            generation,
            kind,
            planned_ms,
            at: now,
        }];
        if let Some(posture) = state.last_known_posture {
            state.open_record = Some(OpenRecord {
                posture,
                started_at: now,
                offset_ms: 0,
            });
            if let Some(warning) = state.monitor.observe(posture, now) {
                events.push(warning_event(Some(&session_id), warning));
            }
        }

        self.publish(&state, now, events);
        Ok(SessionTicket {
            session_id,
            generation,
            kind,
            planned_ms,
        })
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        let now = self.now();
        let mut state = self.lock();
        if *state.machine.state() == LifecycleState::Running {
            close_open_record(&mut state, now);
        }
        if let Err(err) = state.machine.pause(now) {
            return Err(self.reject(&mut state, now, err));
        }
        state.monitor.suspend(now);
        self.publish(&state, now, Vec::new());
        Ok(())
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        let now = self.now();
        let mut state = self.lock();
        if let Err(err) = state.machine.resume(now) {
            return Err(self.reject(&mut state, now, err));
        }
        state.monitor.resume(now);
        let mut events = Vec::new();
        if let Some(posture) = state.last_known_posture {
            let offset_ms = state.machine.elapsed_ms(now);
            state.open_record = Some(OpenRecord {
                posture,
                started_at: now,
                offset_ms,
            });
            // The monitor dropped whatever arrived during the pause.
            let observed = if state.classification_unavailable {
                None
            } else {
                state.monitor.observe(posture, now)
            };
            if let Some(warning) = observed {
                let session_id = state.machine.session().map(|s| s.id().clone());
                events.push(warning_event(session_id.as_ref(), warning));
            }
        }
        self.publish(&state, now, events);
        Ok(())
    }

    /// Discard any in-progress session and return to idle. Always succeeds.
    pub fn reset(&self) {
        let now = self.now();
        let mut state = self.lock();
        if let Some(discarded) = state.machine.reset() {
            info!(
                session_id = %discarded.id(),
                records = discarded.posture_log().len(),
                "in-progress session dropped without hand-off"
            );
        }
        state.open_record = None;
        state.monitor.reset();
        state.last_error = None;
        self.publish(&state, now, Vec::new());
    }

    /// Operator-triggered early completion.
    pub fn complete(&self) -> Result<Session, SessionError> {
        let now = self.now();
        let session = {
            let mut state = self.lock();
            match self.finish(&mut state, now) {
                Ok(session) => session,
                Err(err) => return Err(self.reject(&mut state, now, err)),
            }
        };
        self.hand_off(session.clone());
        Ok(session)
    }

    /// Apply one timer tick for the session identified by `generation`.
    ///
    /// Ticks for any other generation, or for a session that is not
    /// running, are ignored and return `None`.
    pub fn tick(&self, generation: u64) -> Option<TimerEvent> {
        let now = self.now();
        let mut completed = None;
        let event = {
            let mut state = self.lock();
            if state.machine.generation() != generation
                || *state.machine.state() != LifecycleState::Running
            {
                trace!(generation, "stale tick ignored");
                return None;
            }
            let event = state.machine.tick(now)?;
            match &event {
                TimerEvent::Tick { remaining_ms } => {
                    trace!(remaining_ms, "tick");
                    self.publish(&state, now, Vec::new());
                }
                TimerEvent::Expired { at } => match self.finish(&mut state, *at) {
                    Ok(session) => completed = Some(session),
                    Err(err) => {
                        error!(%err, "timer expired but session could not complete");
                    }
                },
            }
            event
        };
        if let Some(session) = completed {
            self.hand_off(session);
        }
        Some(event)
    }

    // ── Classification input ─────────────────────────────────────────

    /// Feed one classification from the producer.
    pub fn observe_classification(
        &self,
        posture: PostureType,
        at: DateTime<Utc>,
    ) -> Option<PostureWarning> {
        let mut state = self.lock();
        state.current_posture = Some(posture);
        state.last_known_posture = Some(posture);
        if state.classification_unavailable {
            state.classification_unavailable = false;
            state.last_error = None;
            info!("posture classification available again");
        }

        let mut events = Vec::new();
        let mut warning = None;
        if *state.machine.state() == LifecycleState::Running {
            let changed = state
                .open_record
                .as_ref()
                .map_or(true, |open| open.posture != posture);
            if changed {
                let offset_ms = close_open_record(&mut state, at)
                    .unwrap_or_else(|| state.machine.elapsed_ms(at));
                debug!(%posture, offset_ms, "posture changed");
                state.open_record = Some(OpenRecord {
                    posture,
                    started_at: at,
                    offset_ms,
                });
            }
            warning = state.monitor.observe(posture, at);
            if let Some(w) = &warning {
                let session_id = state.machine.session().map(|s| s.id().clone());
                events.push(warning_event(session_id.as_ref(), w.clone()));
            }
        }

        self.publish(&state, at, events);
        warning
    }

    /// Re-observe the last known posture so unhealthy time accrues
    /// without new classifications.
    ///
    /// Nothing accrues while classification is unavailable. Without a
    /// warning only the watched snapshot is refreshed; subscribers already
    /// get a `StateChanged` from every tick.
    pub fn recheck_posture(&self) -> Option<PostureWarning> {
        let now = self.now();
        let mut state = self.lock();
        if *state.machine.state() != LifecycleState::Running || state.classification_unavailable {
            return None;
        }
        let posture = state.monitor.last_posture()?;
        match state.monitor.observe(posture, now) {
            Some(warning) => {
                let session_id = state.machine.session().map(|s| s.id().clone());
                let event = warning_event(session_id.as_ref(), warning.clone());
                self.publish(&state, now, vec![event]);
                Some(warning)
            }
            None => {
                self.inner.snapshot_tx.send_replace(project(&state, now));
                None
            }
        }
    }

    /// The producer cannot classify right now. The session keeps running
    /// on the timer alone.
    ///
    /// The unhealthy run ends here: no warnings fire until a classification
    /// arrives, and that classification starts a new run.
    pub fn classification_unavailable(&self, reason: impl Into<String>) -> SessionError {
        let now = self.now();
        let err = SessionError::ClassificationUnavailable(reason.into());
        let mut state = self.lock();
        if !state.classification_unavailable {
            warn!(%err, "continuing in timer-only mode");
            state.monitor.clear_run();
        }
        state.classification_unavailable = true;
        state.current_posture = None;
        state.last_error = Some(err.to_string());
        self.publish(&state, now, Vec::new());
        err
    }

    /// A collaborator reported an unrecoverable condition for this session.
    pub fn fault(&self, reason: impl Into<String>) {
        let now = self.now();
        let reason = reason.into();
        let mut state = self.lock();
        if let Some(discarded) = state.machine.fault(reason.clone()) {
            info!(session_id = %discarded.id(), "session dropped by fault");
        }
        state.open_record = None;
        state.monitor.reset();
        state.last_error = Some(reason.clone());
        self.publish(&state, now, vec![Event::Fault { reason, at: now }]);
    }

    // ── Settings ─────────────────────────────────────────────────────

    /// Replace the settings used by the next `start()`.
    pub fn update_settings(&self, settings: SessionSettings) -> Result<(), SessionError> {
        let now = self.now();
        let mut state = self.lock();
        if let Err(err) = settings.validate() {
            return Err(self.reject(&mut state, now, err));
        }
        state.settings = settings;
        info!(?settings, "settings updated for next session");
        Ok(())
    }

    /// Choose whether the next `start()` runs a work or a break session.
    pub fn select_kind(&self, kind: SessionKind) {
        self.lock().next_kind = kind;
    }

    pub fn next_kind(&self) -> SessionKind {
        self.lock().next_kind
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the log, complete the machine and claim the completion.
    fn finish(
        &self,
        state: &mut CoordinatorState,
        at: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let already_claimed = match (state.machine.session(), &state.last_completed) {
            (Some(session), Some(last)) => session.id() == last,
            _ => false,
        };
        if already_claimed {
            return Err(SessionError::invalid_transition("completed", "complete"));
        }
        if state.machine.state().is_active() {
            close_open_record(state, at);
        }
        let session = state.machine.complete(at)?;

        state.last_completed = Some(session.id().clone());
        state.next_kind = session.kind().next();
        state.monitor.suspend(at);
        self.publish(state, at, Vec::new());
        Ok(session)
    }

    fn hand_off(&self, session: Session) {
        if let Err(err) = self.inner.sink.record_completed(&session) {
            error!(session_id = %session.id(), %err, "statistics hand-off failed");
            let now = self.now();
            let mut state = self.lock();
            state.last_error = Some(format!("statistics hand-off failed: {err}"));
            self.publish(&state, now, Vec::new());
        }
        let _ = self.inner.events.send(Event::SessionCompleted { session });
    }

    fn reject(
        &self,
        state: &mut CoordinatorState,
        now: DateTime<Utc>,
        err: SessionError,
    ) -> SessionError {
        warn!(%err, "session command rejected");
        state.last_error = Some(err.to_string());
        self.publish(state, now, Vec::new());
        err
    }

    fn publish(&self, state: &CoordinatorState, now: DateTime<Utc>, events: Vec<Event>) {
        let snapshot = project(state, now);
        self.inner.snapshot_tx.send_replace(snapshot.clone());
        for event in events {
            let _ = self.inner.events.send(event);
        }
        let _ = self.inner.events.send(Event::StateChanged { snapshot });
    }
}

/// Close the open record at `at` on the running clock and append it.
/// Returns the offset where the next record starts.
fn close_open_record(state: &mut CoordinatorState, at: DateTime<Utc>) -> Option<u64> {
    let open = state.open_record.take()?;
    let end_ms = state.machine.elapsed_ms(at).max(open.offset_ms);
    let record = PostureRecord {
        posture: open.posture,
        started_at: open.started_at,
        offset_ms: open.offset_ms,
        duration_ms: end_ms - open.offset_ms,
    };
    if let Some(session) = state.machine.session_mut() {
        session.append(record);
    }
    Some(end_ms)
}

fn project(state: &CoordinatorState, now: DateTime<Utc>) -> SessionSnapshot {
    let machine_state = state.machine.state().clone();
    let bad_posture_ms = if machine_state.is_active() {
        state.monitor.unhealthy_duration_ms(now)
    } else {
        0
    };
    let session = state.machine.session();
    SessionSnapshot {
        session_id: session.map(|s| s.id().clone()),
        kind: session.map(Session::kind),
        generation: state.machine.generation(),
        remaining_ms: state.machine.remaining_ms(now),
        current_posture: state.current_posture,
        bad_posture_ms,
        last_error: state.last_error.clone(),
        state: machine_state,
        at: now,
    }
}

fn warning_event(session_id: Option<&SessionId>, warning: PostureWarning) -> Event {
    Event::WarningFired {
        session_id: session_id.cloned(),
        posture: warning.posture,
        unhealthy_ms: warning.unhealthy_ms,
        at: warning.at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posture::WarningThresholdConfig;
    use crate::session::MemorySink;
    use crate::timer::ManualClock;

    struct Harness {
        coordinator: SessionCoordinator,
        clock: ManualClock,
        sink: Arc<MemorySink>,
    }

    fn harness(settings: SessionSettings) -> Harness {
        let clock = ManualClock::new(Utc::now());
        let sink = Arc::new(MemorySink::new());
        let coordinator =
            SessionCoordinator::new(settings, sink.clone(), Arc::new(clock.clone())).unwrap();
        Harness {
            coordinator,
            clock,
            sink,
        }
    }

    fn short_settings() -> SessionSettings {
        SessionSettings {
            work_duration_secs: 60,
            break_duration_secs: 30,
            thresholds: WarningThresholdConfig::new(10, 1).unwrap(),
        }
    }

    #[test]
    fn start_twice_reports_already_active() {
        let h = harness(short_settings());
        h.coordinator.start().unwrap();
        assert_eq!(
            h.coordinator.start().unwrap_err(),
            SessionError::SessionAlreadyActive
        );
        let snap = h.coordinator.snapshot();
        assert_eq!(snap.state, LifecycleState::Running);
        assert!(snap.last_error.is_some());
    }

    #[test]
    fn invalid_settings_rejected_without_change() {
        let h = harness(short_settings());
        let bad = SessionSettings {
            work_duration_secs: 0,
            ..short_settings()
        };
        assert!(matches!(
            h.coordinator.update_settings(bad),
            Err(SessionError::InvalidConfiguration { .. })
        ));
        assert_eq!(h.coordinator.settings(), short_settings());
        assert!(SessionCoordinator::new(bad, h.sink.clone(), Arc::new(h.clock.clone())).is_err());
    }

    #[test]
    fn expiry_completes_once_and_alternates_kind() {
        let h = harness(short_settings());
        let ticket = h.coordinator.start().unwrap();
        assert_eq!(ticket.kind, SessionKind::Work);
        h.coordinator
            .observe_classification(PostureType::Excellent, h.clock.now());

        for _ in 0..60 {
            h.clock.advance_secs(1);
            h.coordinator.tick(ticket.generation);
        }
        assert_eq!(h.coordinator.snapshot().state, LifecycleState::Completed);
        assert_eq!(h.sink.len(), 1);

        h.clock.advance_secs(1);
        assert!(h.coordinator.tick(ticket.generation).is_none());
        assert!(h.coordinator.complete().is_err());
        assert_eq!(h.sink.len(), 1);

        assert_eq!(h.coordinator.next_kind(), SessionKind::Break);
        let next = h.coordinator.start().unwrap();
        assert_eq!(next.kind, SessionKind::Break);
        assert_eq!(next.planned_ms, 30_000);
    }

    #[test]
    fn classification_while_idle_only_updates_display() {
        let h = harness(short_settings());
        h.coordinator
            .observe_classification(PostureType::Tilted, h.clock.now());
        let snap = h.coordinator.snapshot();
        assert_eq!(snap.current_posture, Some(PostureType::Tilted));
        assert_eq!(snap.bad_posture_ms, 0);
        assert!(h.coordinator.recheck_posture().is_none());

        // The known posture seeds the first record of the next session.
        h.coordinator.start().unwrap();
        h.clock.advance_secs(5);
        let session = h.coordinator.complete().unwrap();
        assert_eq!(session.posture_log().len(), 1);
        assert_eq!(session.posture_log()[0].posture, PostureType::Tilted);
        assert_eq!(session.posture_log()[0].duration_ms, 5_000);
    }

    #[test]
    fn unavailable_classification_keeps_timer_running() {
        let h = harness(short_settings());
        let ticket = h.coordinator.start().unwrap();
        h.coordinator
            .observe_classification(PostureType::Excellent, h.clock.now());
        let err = h.coordinator.classification_unavailable("camera permission denied");
        assert!(matches!(err, SessionError::ClassificationUnavailable(_)));

        h.clock.advance_secs(3);
        h.coordinator.tick(ticket.generation);
        let snap = h.coordinator.snapshot();
        assert_eq!(snap.state, LifecycleState::Running);
        assert_eq!(snap.current_posture, None);
        assert_eq!(snap.remaining_ms, 57_000);
        assert!(snap.last_error.unwrap().contains("unavailable"));

        h.coordinator
            .observe_classification(PostureType::Excellent, h.clock.now());
        assert!(h.coordinator.snapshot().last_error.is_none());
    }

    #[test]
    fn fault_discards_session_until_reset() {
        let h = harness(short_settings());
        let mut events = h.coordinator.subscribe();
        h.coordinator.start().unwrap();
        h.coordinator.fault("sensor hardware failure");

        assert_eq!(
            h.coordinator.snapshot().state,
            LifecycleState::Error("sensor hardware failure".into())
        );
        assert!(h.coordinator.start().is_err());
        assert!(h.coordinator.complete().is_err());
        assert!(h.sink.is_empty());

        let mut saw_fault = false;
        while let Ok(event) = events.try_recv() {
            saw_fault |= matches!(event, Event::Fault { .. });
        }
        assert!(saw_fault);

        h.coordinator.reset();
        assert_eq!(h.coordinator.snapshot().state, LifecycleState::Idle);
        assert!(h.coordinator.start().is_ok());
    }

    #[test]
    fn completion_ledger_keeps_only_latest_session() {
        let h = harness(short_settings());
        let first = h.coordinator.start().unwrap();
        h.clock.advance_secs(5);
        h.coordinator.complete().unwrap();
        let second = h.coordinator.start().unwrap();
        h.clock.advance_secs(5);
        h.coordinator.complete().unwrap();

        assert_eq!(
            h.coordinator.lock().last_completed.as_ref(),
            Some(&second.session_id)
        );
        assert_ne!(first.session_id, second.session_id);
        assert!(h.coordinator.complete().is_err());
        assert!(h.coordinator.tick(second.generation).is_none());
        assert_eq!(h.sink.len(), 2);
    }

    #[test]
    fn quiet_recheck_refreshes_snapshot_without_broadcast() {
        let h = harness(short_settings());
        h.coordinator.start().unwrap();
        h.coordinator
            .observe_classification(PostureType::Tilted, h.clock.now());
        let mut events = h.coordinator.subscribe();

        h.clock.advance_secs(3);
        assert!(h.coordinator.recheck_posture().is_none());
        assert!(events.try_recv().is_err());
        assert_eq!(h.coordinator.snapshot().bad_posture_ms, 3_000);

        h.clock.advance_secs(7);
        assert!(h.coordinator.recheck_posture().is_some());
        assert!(matches!(events.try_recv(), Ok(Event::WarningFired { .. })));
        assert!(matches!(events.try_recv(), Ok(Event::StateChanged { .. })));
    }

    #[test]
    fn settings_change_applies_to_next_session_only() {
        let h = harness(short_settings());
        let ticket = h.coordinator.start().unwrap();
        h.coordinator
            .update_settings(SessionSettings {
                work_duration_secs: 120,
                ..short_settings()
            })
            .unwrap();
        assert_eq!(ticket.planned_ms, 60_000);
        assert_eq!(h.coordinator.snapshot().remaining_ms, 60_000);

        h.coordinator.complete().unwrap();
        h.coordinator.select_kind(SessionKind::Work);
        let next = h.coordinator.start().unwrap();
        assert_eq!(next.planned_ms, 120_000);
    }
}
