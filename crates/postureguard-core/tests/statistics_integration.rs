//! Completed sessions flowing from the coordinator into the on-disk store.

use std::sync::Arc;

use chrono::Utc;
use postureguard_core::storage::Config;
use postureguard_core::{
    Clock, Database, ManualClock, PostureType, SessionCoordinator, SessionKind,
};

fn open_db(dir: &tempfile::TempDir) -> Arc<Database> {
    Arc::new(Database::open_at(&dir.path().join("postureguard.db")).unwrap())
}

#[test]
fn coordinator_persists_each_session_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let clock = ManualClock::new(Utc::now());

    let mut config = Config::default();
    config.set("session.work_duration_secs", "60").unwrap();
    config.set("session.break_duration_secs", "20").unwrap();
    let coordinator =
        SessionCoordinator::new(config.settings().unwrap(), db.clone(), Arc::new(clock.clone()))
            .unwrap();

    coordinator.observe_classification(PostureType::Excellent, clock.now());
    let work = coordinator.start().unwrap();
    for second in 1..=60 {
        clock.advance_secs(1);
        if second == 45 {
            coordinator.observe_classification(PostureType::LookingDown, clock.now());
        }
        coordinator.tick(work.generation);
    }
    coordinator.tick(work.generation);

    let rest = coordinator.start().unwrap();
    assert_eq!(rest.kind, SessionKind::Break);
    clock.advance_secs(8);
    coordinator.complete().unwrap();

    let sessions = db.list_sessions(10).unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].kind, SessionKind::Break);
    assert_eq!(sessions[0].active_ms, 8_000);
    assert_eq!(sessions[1].id, work.session_id);
    assert!((sessions[1].health_score - 75.0).abs() < 1e-9);

    let stats = db.stats_all().unwrap();
    assert_eq!(stats.work_sessions, 1);
    assert_eq!(stats.break_sessions, 1);
    assert_eq!(stats.total_focus_ms, 60_000);
    assert_eq!(stats.total_break_ms, 8_000);
}

#[test]
fn stored_session_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(Utc::now());
    let session = {
        let db = open_db(&dir);
        let coordinator = SessionCoordinator::new(
            Config::default().settings().unwrap(),
            db,
            Arc::new(clock.clone()),
        )
        .unwrap();
        coordinator.observe_classification(PostureType::TooClose, clock.now());
        coordinator.start().unwrap();
        clock.advance_secs(12);
        coordinator.observe_classification(PostureType::Excellent, clock.now());
        clock.advance_secs(3);
        coordinator.complete().unwrap()
    };

    let db = open_db(&dir);
    let loaded = db.load_session(session.id()).unwrap().unwrap();
    assert_eq!(loaded, session);
    assert_eq!(loaded.breakdown()[&PostureType::TooClose], 12_000);
    assert!(loaded.is_contiguous());
}
