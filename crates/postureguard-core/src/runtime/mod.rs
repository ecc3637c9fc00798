//! Async plumbing around the coordinator: the driver task and the
//! classification producers it reads from.

mod driver;
mod source;

pub use driver::{DriverHandle, SessionDriver};
pub use source::{
    parse_feed_line, ClassificationSource, ControlCommand, FeedEvent, LineSource, ScriptedSource,
};
