//! # PostureGuard Core Library
//!
//! This library coordinates timed work/break sessions with a live stream of
//! posture classifications. The CLI binary and any other front end are thin
//! layers over the same core.
//!
//! ## Architecture
//!
//! - **Timer**: A wall-clock countdown that requires the caller to invoke
//!   `tick()` periodically. Remaining time is derived, never decremented.
//! - **Posture**: Classification labels, recorded intervals and the
//!   unhealthy-duration warning monitor
//! - **Session**: The lifecycle state machine and the coordinator that merges
//!   control commands, ticks and classifications under one lock
//! - **Runtime**: A tokio driver task and pluggable classification sources
//! - **Storage**: SQLite session statistics and TOML configuration
//!
//! ## Key Components
//!
//! - [`SessionCoordinator`]: Single source of truth for one session at a time
//! - [`SessionDriver`]: Feeds ticks and classifications to a coordinator
//! - [`Database`]: Session and statistics persistence
//! - [`Config`]: Application configuration management

pub mod error;
pub mod events;
pub mod posture;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod timer;

pub use error::{ConfigError, CoreError, DatabaseError, SessionError};
pub use events::Event;
pub use posture::{PostureRecord, PostureType, PostureWarning, PostureWarningMonitor, WarningThresholdConfig};
pub use runtime::{ClassificationSource, DriverHandle, FeedEvent, LineSource, SessionDriver};
pub use session::{
    LifecycleState, MemorySink, Session, SessionCoordinator, SessionId, SessionKind,
    SessionSettings, SessionSnapshot, SessionTicket, StatisticsSink,
};
pub use storage::{Config, Database, Stats};
pub use timer::{Clock, ManualClock, SessionTimer, SystemClock};
