mod clock;
mod engine;

use chrono::{DateTime, Utc};

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{SessionTimer, TimerEvent, TimerStatus, TICK_INTERVAL};

/// Non-negative milliseconds from `from` to `to`.
pub(crate) fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}
