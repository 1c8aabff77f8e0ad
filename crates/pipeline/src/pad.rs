//! Pads: the named connection points of a processing unit.
//!
//! An input pad owns the channel its upstream peer sends into. An output pad
//! holds a clone of the peer's sender once linked; anything pushed before the
//! link exists is queued on the pad and flushed when the link is made.
//!
//! Both the inbox and the pre-link queue hold at most [`PAD_CAPACITY`] items.
//! A producer that outruns its consumer blocks in `push` until there is room.

use crate::data::DataItem;
use crate::error::{PipelineError, PipelineResult, UnitError};
use flume::{Receiver, RecvTimeoutError, Selector, Sender};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::Duration;

/// Items an input pad, or an unlinked output pad, holds before producers block.
pub const PAD_CAPACITY: usize = 64;

/// How often a producer blocked on an unlinked pad checks for the link.
const LINK_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    Input,
    Output,
}

/// When a pad comes into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Created together with the unit.
    Always,
    /// Created by the running unit once it knows its output shape.
    Sometimes,
    /// Created on explicit request, one slot per call.
    Request,
}

/// Describes the pads a unit can have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadTemplate {
    /// Pad name, or a pattern ending in `%u` for numbered pads.
    pub name: &'static str,
    pub direction: PadDirection,
    pub presence: PadPresence,
}

impl PadTemplate {
    pub const fn always(name: &'static str, direction: PadDirection) -> Self {
        Self {
            name,
            direction,
            presence: PadPresence::Always,
        }
    }

    pub const fn sometimes(name: &'static str) -> Self {
        Self {
            name,
            direction: PadDirection::Output,
            presence: PadPresence::Sometimes,
        }
    }

    pub const fn request(name: &'static str) -> Self {
        Self {
            name,
            direction: PadDirection::Input,
            presence: PadPresence::Request,
        }
    }

    /// Whether a concrete pad name is produced by this template.
    pub fn matches(&self, pad_name: &str) -> bool {
        match self.name.strip_suffix("%u") {
            Some(prefix) => pad_name
                .strip_prefix(prefix)
                .map(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(false),
            None => self.name == pad_name,
        }
    }

    /// Concrete name for the `index`-th pad of a numbered template.
    pub fn instance_name(&self, index: usize) -> String {
        match self.name.strip_suffix("%u") {
            Some(prefix) => format!("{prefix}{index}"),
            None => self.name.to_string(),
        }
    }
}

/// Result of a push that may be interrupted by a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Stopped,
}

#[derive(Default)]
struct PadLink {
    peer: Option<String>,
    sender: Option<Sender<DataItem>>,
    pending: VecDeque<DataItem>,
}

/// A named input or output pad belonging to exactly one unit.
pub struct Pad {
    unit: String,
    name: String,
    direction: PadDirection,
    presence: PadPresence,
    inbox: Option<(Sender<DataItem>, Receiver<DataItem>)>,
    link: Mutex<PadLink>,
}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pad")
            .field("name", &self.full_name())
            .field("direction", &self.direction)
            .field("presence", &self.presence)
            .field("peer", &self.peer())
            .finish()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Pad {
    pub fn new(unit: &str, name: &str, direction: PadDirection, presence: PadPresence) -> Self {
        let inbox = match direction {
            PadDirection::Input => Some(flume::bounded(PAD_CAPACITY)),
            PadDirection::Output => None,
        };
        Self {
            unit: unit.to_string(),
            name: name.to_string(),
            direction,
            presence,
            inbox,
            link: Mutex::new(PadLink::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// `unit.pad`, as used in configuration and log output.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.unit, self.name)
    }

    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    pub fn presence(&self) -> PadPresence {
        self.presence
    }

    pub fn is_linked(&self) -> bool {
        lock(&self.link).peer.is_some()
    }

    /// Full name of the pad on the other end of the link.
    pub fn peer(&self) -> Option<String> {
        lock(&self.link).peer.clone()
    }

    /// Receiving end of an input pad.
    pub fn receiver(&self) -> Option<Receiver<DataItem>> {
        self.inbox.as_ref().map(|(_, rx)| rx.clone())
    }

    /// Items pushed on an output pad that is not linked yet.
    pub fn pending(&self) -> usize {
        lock(&self.link).pending.len()
    }

    /// Send an item downstream, blocking while the peer's inbox is full.
    /// Until the pad is linked the item is held on the pad.
    pub fn push(&self, item: DataItem) -> Result<(), UnitError> {
        self.deliver(item, None).map(|_| ())
    }

    /// Like [`Pad::push`], but gives up as soon as `stop` receives.
    pub(crate) fn push_or_stop(&self, item: DataItem, stop: &Receiver<()>) -> Result<Delivery, UnitError> {
        self.deliver(item, Some(stop))
    }

    fn deliver(&self, item: DataItem, stop: Option<&Receiver<()>>) -> Result<Delivery, UnitError> {
        if self.direction != PadDirection::Output {
            return Err(UnitError::NoSuchPort(format!(
                "{} is not an output pad",
                self.full_name()
            )));
        }
        let gone = || UnitError::Resource(format!("peer of {} is gone", self.full_name()));
        loop {
            let mut link = lock(&self.link);
            if let Some(sender) = link.sender.clone() {
                // Never block while holding the link lock.
                drop(link);
                return match stop {
                    Some(stop) => Selector::new()
                        .send(&sender, item, |sent| sent.map(|_| Delivery::Sent).map_err(|_| gone()))
                        .recv(stop, |_| Ok(Delivery::Stopped))
                        .wait(),
                    None => sender.send(item).map(|_| Delivery::Sent).map_err(|_| gone()),
                };
            }
            if link.pending.len() < PAD_CAPACITY {
                link.pending.push_back(item);
                return Ok(Delivery::Sent);
            }
            drop(link);
            match stop {
                Some(stop) => match stop.recv_timeout(LINK_POLL) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return Ok(Delivery::Stopped),
                },
                None => thread::sleep(LINK_POLL),
            }
        }
    }

    /// Connect `output` to `input`. Each pad takes part in at most one link.
    pub(crate) fn link(output: &Pad, input: &Pad) -> PipelineResult<()> {
        if output.direction != PadDirection::Output || input.direction != PadDirection::Input {
            return Err(PipelineError::PortMismatch {
                from: output.full_name(),
                to: input.full_name(),
                reason: "links must run from an output pad to an input pad".to_string(),
            });
        }
        if output.unit == input.unit {
            return Err(PipelineError::PortMismatch {
                from: output.full_name(),
                to: input.full_name(),
                reason: "a unit cannot be linked to itself".to_string(),
            });
        }
        let sender = match &input.inbox {
            Some((tx, _)) => tx.clone(),
            None => {
                return Err(PipelineError::PortMismatch {
                    from: output.full_name(),
                    to: input.full_name(),
                    reason: "input pad has no channel".to_string(),
                })
            }
        };

        let mut out_link = lock(&output.link);
        if out_link.peer.is_some() {
            return Err(PipelineError::AlreadyLinked {
                pad: output.full_name(),
            });
        }
        let mut in_link = lock(&input.link);
        if in_link.peer.is_some() {
            return Err(PipelineError::AlreadyLinked {
                pad: input.full_name(),
            });
        }

        // The inbox is empty and at least as large as the pending queue, and
        // the input pad holds its own receiver, so none of these sends block.
        for item in out_link.pending.drain(..) {
            let _ = sender.try_send(item);
        }
        out_link.sender = Some(sender);
        out_link.peer = Some(input.full_name());
        in_link.peer = Some(output.full_name());
        Ok(())
    }
}

/// The pads of one unit, shared between the unit's owner and its worker.
pub struct PadTable {
    unit: String,
    templates: Vec<PadTemplate>,
    pads: RwLock<Vec<Arc<Pad>>>,
}

impl PadTable {
    /// Creates the table and every `Always` pad the templates declare.
    pub fn new(unit: &str, templates: Vec<PadTemplate>) -> Self {
        let pads = templates
            .iter()
            .filter(|t| t.presence == PadPresence::Always)
            .map(|t| Arc::new(Pad::new(unit, t.name, t.direction, t.presence)))
            .collect();
        Self {
            unit: unit.to_string(),
            templates,
            pads: RwLock::new(pads),
        }
    }

    pub fn templates(&self) -> &[PadTemplate] {
        &self.templates
    }

    pub fn template_for(&self, pad_name: &str) -> Option<&PadTemplate> {
        self.templates.iter().find(|t| t.matches(pad_name))
    }

    pub fn get(&self, pad_name: &str) -> Option<Arc<Pad>> {
        self.pads
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|p| p.name() == pad_name)
            .cloned()
    }

    /// All existing pads, in creation order.
    pub fn pads(&self) -> Vec<Arc<Pad>> {
        self.pads
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, presence: PadPresence) -> usize {
        self.pads
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|p| p.presence() == presence)
            .count()
    }

    /// Create a non-`Always` pad from the template matching `pad_name`.
    pub(crate) fn add(&self, pad_name: &str, presence: PadPresence) -> Result<Arc<Pad>, UnitError> {
        let template = self
            .templates
            .iter()
            .find(|t| t.presence == presence && t.matches(pad_name))
            .ok_or_else(|| UnitError::NoSuchPort(pad_name.to_string()))?;

        let mut pads = self
            .pads
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if pads.iter().any(|p| p.name() == pad_name) {
            return Err(UnitError::DuplicatePad(pad_name.to_string()));
        }
        let pad = Arc::new(Pad::new(&self.unit, pad_name, template.direction, presence));
        pads.push(pad.clone());
        Ok(pad)
    }

    /// First free concrete name for a numbered request template.
    pub(crate) fn next_request_name(&self) -> Option<String> {
        let template = self
            .templates
            .iter()
            .find(|t| t.presence == PadPresence::Request)?;
        (0..)
            .map(|index| template.instance_name(index))
            .find(|name| self.get(name).is_none())
    }
}
