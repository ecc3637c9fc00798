//! Producers of posture classifications.
//!
//! A producer may go quiet for any length of time. Silence means "no
//! posture update" and is never turned into an implicit `absent`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::posture::PostureType;
use crate::session::SessionKind;
use crate::timer::Clock;

/// Session control carried in-band with classifications, so a single
/// input stream can script a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Pause,
    Resume,
    Complete,
    Reset,
    SelectKind(SessionKind),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Posture {
        posture: PostureType,
        at: DateTime<Utc>,
    },
    /// The producer cannot classify, e.g. the camera is unavailable.
    Unavailable {
        reason: String,
        at: DateTime<Utc>,
    },
    /// Unrecoverable producer failure.
    Fault { reason: String },
    Control(ControlCommand),
}

#[async_trait]
pub trait ClassificationSource: Send {
    /// Wait for the next input. `None` means the producer is finished.
    ///
    /// Must be cancel-safe: the driver polls this inside `select!` and drops
    /// the future whenever another branch wins. Dropping it must not lose an
    /// input.
    async fn next_event(&mut self) -> Option<FeedEvent>;
}

#[async_trait]
impl ClassificationSource for mpsc::Receiver<FeedEvent> {
    async fn next_event(&mut self) -> Option<FeedEvent> {
        self.recv().await
    }
}

/// Parse one line of the text feed. Blank lines and `#` comments yield
/// `Ok(None)`.
///
/// Recognised words: any posture name, `unavailable [reason]`,
/// `fault <reason>`, `start`, `pause`, `resume`, `stop`/`complete`,
/// `reset`, `work`, `break`.
pub fn parse_feed_line(line: &str, at: DateTime<Utc>) -> Result<Option<FeedEvent>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let event = match word.to_ascii_lowercase().as_str() {
        "start" => FeedEvent::Control(ControlCommand::Start),
        "pause" => FeedEvent::Control(ControlCommand::Pause),
        "resume" => FeedEvent::Control(ControlCommand::Resume),
        "stop" | "complete" => FeedEvent::Control(ControlCommand::Complete),
        "reset" => FeedEvent::Control(ControlCommand::Reset),
        "work" => FeedEvent::Control(ControlCommand::SelectKind(SessionKind::Work)),
        "break" => FeedEvent::Control(ControlCommand::SelectKind(SessionKind::Break)),
        "unavailable" => FeedEvent::Unavailable {
            reason: if rest.is_empty() {
                "producer reported no classification".to_string()
            } else {
                rest.to_string()
            },
            at,
        },
        "fault" => {
            if rest.is_empty() {
                return Err("fault requires a reason".to_string());
            }
            FeedEvent::Fault {
                reason: rest.to_string(),
            }
        }
        _ => FeedEvent::Posture {
            posture: line.parse()?,
            at,
        },
    };
    Ok(Some(event))
}

/// Reads one classification or control word per line.
pub struct LineSource<R> {
    lines: Lines<R>,
    clock: Arc<dyn Clock>,
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R, clock: Arc<dyn Clock>) -> Self {
        Self {
            lines: reader.lines(),
            clock,
        }
    }
}

#[async_trait]
impl<R> ClassificationSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_event(&mut self) -> Option<FeedEvent> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(err) => {
                    warn!(%err, "classification feed read failed");
                    return None;
                }
            };
            match parse_feed_line(&line, self.clock.now()) {
                Ok(Some(event)) => return Some(event),
                Ok(None) => continue,
                Err(err) => {
                    warn!(line = %line, %err, "skipping unreadable feed line");
                }
            }
        }
    }
}

/// Replays a fixed list of inputs, each after a delay measured on tokio's
/// clock. Posture and unavailability timestamps are taken from `clock` when
/// the step fires.
///
/// A step's delay counts from the first poll after the previous step was
/// delivered. The deadline survives a cancelled poll.
pub struct ScriptedSource {
    steps: VecDeque<(std::time::Duration, FeedEvent)>,
    clock: Arc<dyn Clock>,
    deadline: Option<Instant>,
}

impl ScriptedSource {
    pub fn new(
        clock: Arc<dyn Clock>,
        steps: impl IntoIterator<Item = (std::time::Duration, FeedEvent)>,
    ) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            clock,
            deadline: None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

#[async_trait]
impl ClassificationSource for ScriptedSource {
    async fn next_event(&mut self) -> Option<FeedEvent> {
        let delay = self.steps.front()?.0;
        let deadline = *self.deadline.get_or_insert_with(|| Instant::now() + delay);
        if Instant::now() < deadline {
            tokio::time::sleep_until(deadline).await;
        }
        self.deadline = None;
        let (_, mut event) = self.steps.pop_front()?;
        match &mut event {
            FeedEvent::Posture { at, .. } | FeedEvent::Unavailable { at, .. } => {
                *at = self.clock.now();
            }
            FeedEvent::Fault { .. } | FeedEvent::Control(_) => {}
        }
        debug!(?event, "scripted input");
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualClock;

    #[test]
    fn parses_postures_and_control_words() {
        let at = Utc::now();
        assert_eq!(
            parse_feed_line("looking-down", at),
            Ok(Some(FeedEvent::Posture {
                posture: PostureType::LookingDown,
                at
            }))
        );
        assert_eq!(
            parse_feed_line("  PAUSE ", at),
            Ok(Some(FeedEvent::Control(ControlCommand::Pause)))
        );
        assert_eq!(
            parse_feed_line("stop", at),
            Ok(Some(FeedEvent::Control(ControlCommand::Complete)))
        );
        assert_eq!(
            parse_feed_line("break", at),
            Ok(Some(FeedEvent::Control(ControlCommand::SelectKind(
                SessionKind::Break
            ))))
        );
        assert_eq!(parse_feed_line("", at), Ok(None));
        assert_eq!(parse_feed_line("# warm-up", at), Ok(None));
        assert!(parse_feed_line("slouching", at).is_err());
        assert!(parse_feed_line("fault", at).is_err());
    }

    #[test]
    fn unavailable_keeps_reason() {
        let at = Utc::now();
        assert_eq!(
            parse_feed_line("unavailable camera permission denied", at),
            Ok(Some(FeedEvent::Unavailable {
                reason: "camera permission denied".into(),
                at
            }))
        );
        assert!(matches!(
            parse_feed_line("unavailable", at),
            Ok(Some(FeedEvent::Unavailable { .. }))
        ));
    }

    #[tokio::test]
    async fn line_source_skips_garbage_and_ends_at_eof() {
        let input: &[u8] = b"excellent\n\nnot-a-posture\npause\n";
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut source = LineSource::new(input, clock);

        assert!(matches!(
            source.next_event().await,
            Some(FeedEvent::Posture {
                posture: PostureType::Excellent,
                ..
            })
        ));
        assert_eq!(
            source.next_event().await,
            Some(FeedEvent::Control(ControlCommand::Pause))
        );
        assert_eq!(source.next_event().await, None);
    }

    #[tokio::test]
    async fn channel_receiver_is_a_source() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(FeedEvent::Control(ControlCommand::Start)).await.unwrap();
        drop(tx);
        assert_eq!(
            rx.next_event().await,
            Some(FeedEvent::Control(ControlCommand::Start))
        );
        assert_eq!(rx.next_event().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_source_waits_between_steps() {
        let started = tokio::time::Instant::now();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut source = ScriptedSource::new(clock, [
            (
                std::time::Duration::from_secs(5),
                FeedEvent::Control(ControlCommand::Start),
            ),
            (
                std::time::Duration::from_secs(3),
                FeedEvent::Control(ControlCommand::Reset),
            ),
        ]);
        source.next_event().await;
        assert_eq!(started.elapsed().as_secs(), 5);
        source.next_event().await;
        assert_eq!(started.elapsed().as_secs(), 8);
        assert_eq!(source.remaining(), 0);
        assert!(source.next_event().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_step_survives_cancelled_poll() {
        let started = tokio::time::Instant::now();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut source = ScriptedSource::new(clock, [(
            std::time::Duration::from_secs(5),
            FeedEvent::Control(ControlCommand::Reset),
        )]);

        for _ in 0..4 {
            let polled =
                tokio::time::timeout(std::time::Duration::from_secs(1), source.next_event()).await;
            assert!(polled.is_err());
            assert_eq!(source.remaining(), 1);
        }
        assert_eq!(
            source.next_event().await,
            Some(FeedEvent::Control(ControlCommand::Reset))
        );
        assert_eq!(started.elapsed().as_secs(), 5);
        assert_eq!(source.remaining(), 0);
    }
}
