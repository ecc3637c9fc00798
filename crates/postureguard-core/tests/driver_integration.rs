//! The tokio driver running a coordinator on paused time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use postureguard_core::posture::WarningThresholdConfig;
use postureguard_core::runtime::{ControlCommand, FeedEvent, ScriptedSource, SessionDriver};
use postureguard_core::{
    Clock, Event, LifecycleState, MemorySink, PostureType, SessionCoordinator, SessionKind,
    SessionSettings, SystemClock,
};
use tokio::sync::{broadcast, mpsc};

fn coordinator(work_secs: u64, sink: Arc<MemorySink>, clock: Arc<SystemClock>) -> SessionCoordinator {
    let settings = SessionSettings {
        work_duration_secs: work_secs,
        break_duration_secs: 5,
        thresholds: WarningThresholdConfig::new(10, 1).unwrap(),
    };
    SessionCoordinator::new(settings, sink, clock).unwrap()
}

fn posture(posture: PostureType) -> FeedEvent {
    FeedEvent::Posture {
        posture,
        at: Utc::now(),
    }
}

async fn next_completion(events: &mut broadcast::Receiver<Event>) -> Event {
    loop {
        match events.recv().await {
            Ok(event @ Event::SessionCompleted { .. }) => return event,
            Ok(_) => continue,
            Err(err) => panic!("event stream failed: {err}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn driver_runs_session_to_expiry() {
    let clock = Arc::new(SystemClock::new());
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(30, sink.clone(), clock.clone());
    let mut events = coordinator.subscribe();

    let source = ScriptedSource::new(
        clock.clone(),
        [
            (Duration::ZERO, posture(PostureType::Excellent)),
            (Duration::ZERO, FeedEvent::Control(ControlCommand::Start)),
            (Duration::from_secs(10), posture(PostureType::LookingDown)),
        ],
    );
    let driver = SessionDriver::spawn(coordinator.clone(), source);

    let Event::SessionCompleted { session } = next_completion(&mut events).await else {
        unreachable!()
    };
    driver.shutdown().await.unwrap();

    assert_eq!(session.kind(), SessionKind::Work);
    assert_eq!(session.active_ms(), Some(30_000));
    assert!(session.is_contiguous());
    assert_eq!(session.tracked_ms(), 30_000);
    assert_eq!(session.breakdown()[&PostureType::LookingDown], 20_000);
    assert_eq!(sink.len(), 1);
    assert_eq!(coordinator.snapshot().state, LifecycleState::Completed);
}

#[tokio::test(start_paused = true)]
async fn recheck_fires_warnings_without_new_classifications() {
    let clock = Arc::new(SystemClock::new());
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(60, sink, clock.clone());
    let mut events = coordinator.subscribe();

    let (tx, rx) = mpsc::channel(8);
    let driver = SessionDriver::spawn(coordinator.clone(), rx);
    tx.send(FeedEvent::Control(ControlCommand::Start)).await.unwrap();
    tx.send(FeedEvent::Posture {
        posture: PostureType::Tilted,
        at: clock.now(),
    })
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(25_500)).await;
    driver.shutdown().await.unwrap();

    let mut warnings = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::WarningFired { unhealthy_ms, .. } = event {
            warnings.push(unhealthy_ms / 1000);
        }
    }
    assert_eq!(warnings, vec![10, 20]);
}

#[tokio::test(start_paused = true)]
async fn source_end_leaves_timer_running() {
    let clock = Arc::new(SystemClock::new());
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(20, sink.clone(), clock.clone());
    let mut events = coordinator.subscribe();

    let (tx, rx) = mpsc::channel(8);
    let driver = SessionDriver::spawn(coordinator.clone(), rx);
    tx.send(FeedEvent::Control(ControlCommand::Start)).await.unwrap();
    drop(tx);

    next_completion(&mut events).await;
    assert_eq!(sink.len(), 1);
    assert!(!driver.is_finished());
    driver.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reset_through_feed_disarms_ticks() {
    let clock = Arc::new(SystemClock::new());
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(10, sink.clone(), clock.clone());

    let source = ScriptedSource::new(
        clock.clone(),
        [
            (Duration::ZERO, FeedEvent::Control(ControlCommand::Start)),
            (Duration::from_secs(5), FeedEvent::Control(ControlCommand::Reset)),
        ],
    );
    let driver = SessionDriver::spawn(coordinator.clone(), source);

    tokio::time::sleep(Duration::from_secs(30)).await;
    driver.shutdown().await.unwrap();

    assert!(sink.is_empty());
    assert_eq!(coordinator.snapshot().state, LifecycleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_from_feed() {
    let clock = Arc::new(SystemClock::new());
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(10, sink.clone(), clock.clone());
    let mut events = coordinator.subscribe();

    let source = ScriptedSource::new(
        clock.clone(),
        [
            (Duration::ZERO, FeedEvent::Control(ControlCommand::Start)),
            (Duration::from_secs(4), FeedEvent::Control(ControlCommand::Pause)),
            (Duration::from_secs(100), FeedEvent::Control(ControlCommand::Resume)),
        ],
    );
    let started = tokio::time::Instant::now();
    let driver = SessionDriver::spawn(coordinator.clone(), source);

    let Event::SessionCompleted { session } = next_completion(&mut events).await else {
        unreachable!()
    };
    driver.shutdown().await.unwrap();

    assert_eq!(session.active_ms(), Some(10_000));
    let wall = started.elapsed().as_secs();
    assert!((110..=111).contains(&wall), "wall={wall}");
}
