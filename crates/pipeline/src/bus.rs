//! Event bus carrying status notifications from units to the supervisor.
//!
//! Events are delivered in the order they were posted. Any number of
//! `BusSender`s may exist; there is exactly one receiving end.

use crate::lifecycle::State;
use chrono::{DateTime, Utc};
use flume::{Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Error { message: String },
    EndOfStream,
    Warning { message: String },
    StateChanged { from: State, to: State },
    /// A unit created a dynamic output pad.
    PadCreated { pad: String },
}

/// An immutable status record posted by a unit (or by the pipeline itself).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Name of the originating unit.
    pub origin: String,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(origin: &str, kind: EventKind) -> Self {
        Self {
            kind,
            origin: origin.to_string(),
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn error(origin: &str, message: impl Into<String>) -> Self {
        Self::new(
            origin,
            EventKind::Error {
                message: message.into(),
            },
        )
    }

    pub fn warning(origin: &str, message: impl Into<String>) -> Self {
        Self::new(
            origin,
            EventKind::Warning {
                message: message.into(),
            },
        )
    }

    pub fn eos(origin: &str) -> Self {
        Self::new(origin, EventKind::EndOfStream)
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::Error { .. } => "error",
            EventKind::EndOfStream => "end-of-stream",
            EventKind::Warning { .. } => "warning",
            EventKind::StateChanged { .. } => "state-changed",
            EventKind::PadCreated { .. } => "pad-created",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::Error { message } => write!(f, "Error from {}: {}", self.origin, message)?,
            EventKind::EndOfStream => write!(f, "End of stream from {}", self.origin)?,
            EventKind::Warning { message } => {
                write!(f, "Warning from {}: {}", self.origin, message)?
            }
            EventKind::StateChanged { from, to } => {
                write!(f, "{} changed state {:?} -> {:?}", self.origin, from, to)?
            }
            EventKind::PadCreated { pad } => write!(f, "{} created pad '{}'", self.origin, pad)?,
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// Posting handle for the bus.
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: Sender<Event>,
}

impl BusSender {
    /// Post an event. Returns `false` when the bus has been dropped.
    pub fn post(&self, event: Event) -> bool {
        trace!(origin = %event.origin, kind = event.kind_name(), "Posting event");
        self.tx.send(event).is_ok()
    }
}

/// The pipeline's event queue.
#[derive(Debug)]
pub struct Bus {
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> BusSender {
        BusSender {
            tx: self.tx.clone(),
        }
    }

    /// Block until the next event arrives.
    pub fn recv(&self) -> Option<Event> {
        // The bus keeps its own sender, so this only fails if it is torn down.
        self.rx.recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Discard everything currently queued, returning what was dropped.
    pub fn drain(&self) -> Vec<Event> {
        self.rx.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_fifo() {
        let bus = Bus::new();
        let sender = bus.sender();
        sender.post(Event::warning("a", "first"));
        sender.post(Event::eos("b"));
        sender.post(Event::error("c", "third"));

        assert_eq!(bus.len(), 3);
        assert_eq!(bus.recv().unwrap().origin, "a");
        assert_eq!(bus.recv().unwrap().kind, EventKind::EndOfStream);
        assert_eq!(bus.recv().unwrap().origin, "c");
        assert!(bus.try_recv().is_none());
    }

    #[test]
    fn test_event_display_includes_detail() {
        let event = Event::error("decoder", "stream broken").with_detail("frame 12");
        assert_eq!(
            event.to_string(),
            "Error from decoder: stream broken (frame 12)"
        );
        assert_eq!(event.kind_name(), "error");
    }

    #[test]
    fn test_recv_timeout_on_empty_bus() {
        let bus = Bus::new();
        assert!(bus.recv_timeout(Duration::from_millis(5)).is_none());
    }
}
