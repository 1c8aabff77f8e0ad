//! Lifecycle controller: drives every unit of a graph through
//! Idle -> Ready -> Paused -> Playing and back down.

use crate::bus::{Event, EventKind};
use crate::error::{PipelineError, PipelineResult};
use crate::graph::PipelineGraph;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Lifecycle state of a unit or of a whole graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Idle,
    Ready,
    Paused,
    Playing,
    /// Terminal: the graph has been torn down and every unit is idle again.
    Stopped,
}

impl State {
    fn rank(self) -> u8 {
        match self {
            State::Idle | State::Stopped => 0,
            State::Ready => 1,
            State::Paused => 2,
            State::Playing => 3,
        }
    }
}

/// A single step between two adjacent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Allocates runtime resources.
    IdleToReady,
    /// Prepares, but withholds data flow.
    ReadyToPaused,
    /// Starts data flow.
    PausedToPlaying,
    PlayingToPaused,
    PausedToReady,
    /// Releases runtime resources.
    ReadyToIdle,
}

impl Transition {
    pub fn from(self) -> State {
        match self {
            Transition::IdleToReady => State::Idle,
            Transition::ReadyToPaused | Transition::ReadyToIdle => State::Ready,
            Transition::PausedToPlaying | Transition::PausedToReady => State::Paused,
            Transition::PlayingToPaused => State::Playing,
        }
    }

    pub fn to(self) -> State {
        match self {
            Transition::IdleToReady | Transition::PausedToReady => State::Ready,
            Transition::ReadyToPaused | Transition::PlayingToPaused => State::Paused,
            Transition::PausedToPlaying => State::Playing,
            Transition::ReadyToIdle => State::Idle,
        }
    }

    pub fn is_upward(self) -> bool {
        matches!(
            self,
            Transition::IdleToReady | Transition::ReadyToPaused | Transition::PausedToPlaying
        )
    }

    pub fn reverse(self) -> Transition {
        match self {
            Transition::IdleToReady => Transition::ReadyToIdle,
            Transition::ReadyToPaused => Transition::PausedToReady,
            Transition::PausedToPlaying => Transition::PlayingToPaused,
            Transition::PlayingToPaused => Transition::PausedToPlaying,
            Transition::PausedToReady => Transition::ReadyToPaused,
            Transition::ReadyToIdle => Transition::IdleToReady,
        }
    }

    /// The first step on the way from `current` to `target`.
    pub fn next(current: State, target: State) -> Option<Transition> {
        match (current.rank(), target.rank()) {
            (c, t) if c == t => None,
            (0, _) => Some(Transition::IdleToReady),
            (1, t) if t > 1 => Some(Transition::ReadyToPaused),
            (1, _) => Some(Transition::ReadyToIdle),
            (2, 3) => Some(Transition::PausedToPlaying),
            (2, _) => Some(Transition::PausedToReady),
            _ => Some(Transition::PlayingToPaused),
        }
    }
}

impl PipelineGraph {
    /// Drive every unit to `target`, one step at a time.
    ///
    /// Each step is all-or-nothing: when a unit rejects it, the units that
    /// already moved are put back and the graph stays at the previous state.
    /// `State::Stopped` performs a full teardown.
    pub fn set_state(&mut self, target: State) -> PipelineResult<()> {
        if target == State::Stopped {
            return self.teardown();
        }
        if self.state == State::Stopped {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        if self.state == State::Idle && target != State::Idle {
            self.validate()?;
        }

        while let Some(step) = Transition::next(self.state, target) {
            self.apply_step(step)?;
        }
        Ok(())
    }

    fn apply_step(&mut self, step: Transition) -> PipelineResult<()> {
        let order: Vec<usize> = if step.is_upward() {
            (0..self.units.len()).collect()
        } else {
            (0..self.units.len()).rev().collect()
        };

        for (position, &index) in order.iter().enumerate() {
            if let Err(source) = self.units[index].set_state(step) {
                let unit = self.units[index].name().to_string();
                error!(pipeline = %self.name, unit = %unit, from = ?step.from(), to = ?step.to(), "Unit rejected transition: {}", source);

                for &done in order[..position].iter().rev() {
                    if let Err(e) = self.units[done].set_state(step.reverse()) {
                        warn!(unit = %self.units[done].name(), "Rollback failed: {}", e);
                    }
                }
                return Err(PipelineError::Transition {
                    unit,
                    from: step.from(),
                    to: step.to(),
                    source,
                });
            }
        }

        info!(pipeline = %self.name, from = ?step.from(), to = ?step.to(), "Pipeline changed state");
        self.bus.sender().post(Event::new(
            &self.name,
            EventKind::StateChanged {
                from: step.from(),
                to: step.to(),
            },
        ));
        self.state = step.to();
        Ok(())
    }

    /// Release everything: Playing -> Paused -> Ready -> Idle, each step in
    /// reverse creation order. Individual failures are logged and the
    /// teardown carries on; the first one is returned once it is done.
    pub fn teardown(&mut self) -> PipelineResult<()> {
        if self.state == State::Stopped {
            return Ok(());
        }
        info!(pipeline = %self.name, from = ?self.state, "Tearing down pipeline");

        let mut first_error = None;
        for step in [
            Transition::PlayingToPaused,
            Transition::PausedToReady,
            Transition::ReadyToIdle,
        ] {
            for unit in self.units.iter_mut().rev() {
                if unit.state() != step.from() {
                    continue;
                }
                if let Err(source) = unit.set_state(step) {
                    warn!(unit = %unit.name(), from = ?step.from(), to = ?step.to(), "Teardown step failed: {}", source);
                    first_error.get_or_insert(PipelineError::Transition {
                        unit: unit.name().to_string(),
                        from: step.from(),
                        to: step.to(),
                        source,
                    });
                }
            }
        }

        let leaked: Vec<&str> = self
            .units
            .iter()
            .filter(|u| u.state() != State::Idle)
            .map(|u| u.name())
            .collect();
        if !leaked.is_empty() {
            warn!(pipeline = %self.name, ?leaked, "Units did not return to Idle");
        }

        let from = self.state;
        self.state = State::Stopped;
        self.bus.sender().post(Event::new(
            &self.name,
            EventKind::StateChanged {
                from,
                to: State::Stopped,
            },
        ));
        info!(pipeline = %self.name, "Pipeline stopped");
        first_error.map_or(Ok(()), Err)
    }
}
