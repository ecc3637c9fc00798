use std::sync::{Mutex, PoisonError};

use super::model::Session;
use crate::error::Result;

/// Receives each completed session exactly once.
///
/// Implementations must treat the session id as unique. The coordinator
/// never updates or deletes what it handed over.
pub trait StatisticsSink: Send + Sync {
    fn record_completed(&self, session: &Session) -> Result<()>;
}

/// In-memory sink, for tests and for running without storage.
#[derive(Debug, Default)]
pub struct MemorySink {
    sessions: Mutex<Vec<Session>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StatisticsSink for MemorySink {
    fn record_completed(&self, session: &Session) -> Result<()> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session.clone());
        Ok(())
    }
}
