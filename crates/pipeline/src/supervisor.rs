//! The supervisor loop: waits on the bus and decides when a run is over.

use crate::bus::{BusSender, Event, EventKind};
use crate::error::{FailureClass, PipelineResult};
use crate::graph::PipelineGraph;
use crate::lifecycle::State;
use std::io;
use std::ops::ControlFlow;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// End of stream reached.
    Completed { origin: String },
    /// A unit reported an error.
    Failed {
        origin: String,
        message: String,
        detail: Option<String>,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            RunOutcome::Completed { .. } => None,
            RunOutcome::Failed { .. } => Some(FailureClass::Runtime),
        }
    }
}

/// Posts a synthetic error if it is not dropped before the deadline.
struct DeadlineGuard {
    _cancel: flume::Sender<()>,
}

fn arm_deadline(bus: BusSender, pipeline: String, deadline: Duration) -> io::Result<DeadlineGuard> {
    let (cancel_tx, cancel_rx) = flume::bounded::<()>(1);
    thread::Builder::new()
        .name(format!("{}-deadline", pipeline))
        .spawn(move || {
            if let Err(flume::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(deadline) {
                bus.post(
                    Event::error(&pipeline, "deadline exceeded")
                        .with_detail(format!("no end of stream within {:?}", deadline)),
                );
            }
        })?;
    Ok(DeadlineGuard { _cancel: cancel_tx })
}

/// Single-threaded dispatcher over a pipeline's bus.
///
/// It knows nothing about specific unit types: end-of-stream and errors end
/// the run, warnings and state changes are logged, and pad notifications are
/// handed back to the graph to resolve deferred links.
#[derive(Debug, Default, Clone)]
pub struct Supervisor {
    deadline: Option<Duration>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject an error event if the run has not ended after `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Dispatch events until end-of-stream or an error arrives. Fails only
    /// if the deadline timer cannot be started.
    pub fn run(&self, graph: &mut PipelineGraph) -> PipelineResult<RunOutcome> {
        let _deadline = match self.deadline {
            Some(d) => Some(arm_deadline(graph.bus_sender(), graph.name().to_string(), d)?),
            None => None,
        };

        loop {
            let Some(event) = graph.bus().recv() else {
                return Ok(RunOutcome::Failed {
                    origin: graph.name().to_string(),
                    message: "bus closed".to_string(),
                    detail: None,
                });
            };
            if let ControlFlow::Break(outcome) = self.dispatch(graph, event) {
                return Ok(outcome);
            }
        }
    }

    fn dispatch(&self, graph: &mut PipelineGraph, event: Event) -> ControlFlow<RunOutcome> {
        match event.kind {
            EventKind::EndOfStream => {
                info!(origin = %event.origin, "End of stream");
                ControlFlow::Break(RunOutcome::Completed {
                    origin: event.origin,
                })
            }
            EventKind::Error { message } => {
                error!(origin = %event.origin, "ERROR from element {}: {}", event.origin, message);
                if let Some(detail) = &event.detail {
                    error!(origin = %event.origin, "Error details: {}", detail);
                }
                ControlFlow::Break(RunOutcome::Failed {
                    origin: event.origin,
                    message,
                    detail: event.detail,
                })
            }
            EventKind::Warning { message } => {
                warn!(origin = %event.origin, detail = ?event.detail, "Warning: {}", message);
                ControlFlow::Continue(())
            }
            EventKind::StateChanged { from, to } => {
                debug!(origin = %event.origin, ?from, ?to, "State changed");
                ControlFlow::Continue(())
            }
            EventKind::PadCreated { pad } => match graph.resolve_pending(&event.origin, &pad) {
                Ok(linked) => {
                    debug!(origin = %event.origin, pad = %pad, linked, "Pad created");
                    ControlFlow::Continue(())
                }
                Err(e) => {
                    error!(origin = %event.origin, pad = %pad, "Failed to link dynamic pad: {}", e);
                    ControlFlow::Break(RunOutcome::Failed {
                        origin: event.origin,
                        message: format!("failed to link dynamic pad '{}'", pad),
                        detail: Some(e.to_string()),
                    })
                }
            },
        }
    }

    /// Bring `graph` to Playing, run until the stream ends, then tear it
    /// down. A rejected transition tears the graph down and is returned as an
    /// error.
    pub fn drive(&self, graph: &mut PipelineGraph) -> PipelineResult<RunOutcome> {
        if let Err(e) = graph.set_state(State::Playing) {
            error!(pipeline = %graph.name(), "Failed to start pipeline: {}", e);
            if let Err(teardown) = graph.teardown() {
                warn!(pipeline = %graph.name(), "Teardown after failed start: {}", teardown);
            }
            return Err(e);
        }

        info!(pipeline = %graph.name(), "Running...");
        let outcome = self.run(graph);

        info!(pipeline = %graph.name(), "Returned, stopping playback");
        if let Err(e) = graph.teardown() {
            warn!(pipeline = %graph.name(), "Teardown reported a failure: {}", e);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;

    #[test]
    fn test_deadline_posts_error_from_pipeline() {
        let bus = Bus::new();
        let _guard = arm_deadline(bus.sender(), "clip".to_string(), Duration::from_millis(10)).unwrap();

        let event = bus.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.origin, "clip");
        assert_eq!(
            event.kind,
            EventKind::Error {
                message: "deadline exceeded".to_string()
            }
        );
    }

    #[test]
    fn test_dropped_deadline_posts_nothing() {
        let bus = Bus::new();
        let guard = arm_deadline(bus.sender(), "clip".to_string(), Duration::from_millis(200)).unwrap();
        drop(guard);
        assert!(bus.recv_timeout(Duration::from_millis(400)).is_none());
    }
}
