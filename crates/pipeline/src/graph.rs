//! Pipeline graph construction and management.

use crate::bus::{Bus, BusSender};
use crate::error::{PipelineError, PipelineResult};
use crate::lifecycle::State;
use crate::pad::{Pad, PadDirection, PadPresence};
use crate::unit::ProcessingUnit;
use petgraph::algo::{connected_components, is_cyclic_directed};
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A `unit.pad` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub unit: String,
    pub pad: String,
}

impl PortRef {
    pub fn new(unit: &str, pad: &str) -> Self {
        Self {
            unit: unit.to_string(),
            pad: pad.to_string(),
        }
    }

    /// Parse `unit.pad`, or a bare `unit` which then refers to `default_pad`.
    pub fn parse(spec: &str, default_pad: &str) -> PipelineResult<Self> {
        let (unit, pad) = match spec.split_once('.') {
            Some((unit, pad)) => (unit, pad),
            None => (spec, default_pad),
        };
        if unit.is_empty() || pad.is_empty() {
            return Err(PipelineError::InvalidConfiguration {
                message: format!("Invalid pad reference '{}'. Format must be 'unit.pad'.", spec),
            });
        }
        Ok(Self::new(unit, pad))
    }
}

impl FromStr for PortRef {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, "")
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.unit, self.pad)
    }
}

/// A directed edge from an output pad to an input pad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub from: PortRef,
    pub to: PortRef,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// The units of a pipeline, the links between them, and the bus they
/// report on.
pub struct PipelineGraph {
    pub(crate) name: String,
    /// In creation order.
    pub(crate) units: Vec<ProcessingUnit>,
    links: Vec<Link>,
    pending: Vec<Link>,
    pub(crate) bus: Bus,
    pub(crate) state: State,
}

impl fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("units", &self.units.iter().map(|u| u.name()).collect::<Vec<_>>())
            .field("links", &self.links)
            .field("pending", &self.pending)
            .finish()
    }
}

impl PipelineGraph {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            units: Vec::new(),
            links: Vec::new(),
            pending: Vec::new(),
            bus: Bus::new(),
            state: State::Idle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// State last applied successfully to every unit.
    pub fn state(&self) -> State {
        self.state
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_sender(&self) -> BusSender {
        self.bus.sender()
    }

    /// Take ownership of a unit. Units can only be added while idle.
    pub fn add_unit(&mut self, mut unit: ProcessingUnit) -> PipelineResult<()> {
        if self.state != State::Idle {
            return Err(PipelineError::InvalidConfiguration {
                message: format!("Cannot add unit '{}' to a running pipeline", unit.name()),
            });
        }
        if self.unit(unit.name()).is_some() {
            return Err(PipelineError::DuplicateUnit {
                name: unit.name().to_string(),
            });
        }
        unit.attach(self.bus.sender());
        debug!(pipeline = %self.name, unit = %unit.name(), kind = ?unit.kind(), "Added unit");
        self.units.push(unit);
        Ok(())
    }

    pub fn unit(&self, name: &str) -> Option<&ProcessingUnit> {
        self.units.iter().find(|u| u.name() == name)
    }

    pub fn unit_mut(&mut self, name: &str) -> Option<&mut ProcessingUnit> {
        self.units.iter_mut().find(|u| u.name() == name)
    }

    fn require_unit(&self, name: &str) -> PipelineResult<&ProcessingUnit> {
        self.unit(name).ok_or_else(|| PipelineError::UnitNotFound {
            name: name.to_string(),
        })
    }

    /// Units in creation order.
    pub fn units(&self) -> impl Iterator<Item = &ProcessingUnit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Links made so far.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Declared links still waiting for their output pad to be created.
    pub fn pending_links(&self) -> &[Link] {
        &self.pending
    }

    /// Reserve a request pad on `unit`.
    pub fn request_pad(&mut self, unit: &str, name_hint: Option<&str>) -> PipelineResult<Arc<Pad>> {
        let target = self
            .unit_mut(unit)
            .ok_or_else(|| PipelineError::UnitNotFound {
                name: unit.to_string(),
            })?;
        target
            .request_pad(name_hint)
            .map_err(|e| PipelineError::unit(unit, e))
    }

    fn existing_pad(&self, port: &PortRef, direction: PadDirection) -> PipelineResult<Arc<Pad>> {
        let unit = self.require_unit(&port.unit)?;
        unit.pad(&port.pad)
            .filter(|p| p.direction() == direction)
            .ok_or_else(|| PipelineError::NoSuchPort {
                unit: port.unit.clone(),
                pad: port.pad.clone(),
            })
    }

    /// Link two existing pads.
    ///
    /// A dynamic output pad that has not been created yet does not exist, so
    /// linking it fails with `NoSuchPort`; use [`link_when_created`] for those.
    ///
    /// [`link_when_created`]: PipelineGraph::link_when_created
    pub fn link(&mut self, from: &PortRef, to: &PortRef) -> PipelineResult<()> {
        let output = self.existing_pad(from, PadDirection::Output)?;
        let input = self.existing_pad(to, PadDirection::Input)?;
        Pad::link(&output, &input)?;

        info!(pipeline = %self.name, "Linked {} -> {}", from, to);
        self.pending.retain(|l| l.from != *from);
        self.links.push(Link {
            from: from.clone(),
            to: to.clone(),
        });
        Ok(())
    }

    /// Link `from` as soon as its unit creates it. If the pad already exists
    /// the link is made immediately.
    pub fn link_when_created(&mut self, from: &PortRef, to: &PortRef) -> PipelineResult<()> {
        let producer = self.require_unit(&from.unit)?;
        match producer.presence_of(&from.pad) {
            Some(PadPresence::Sometimes) => {}
            Some(_) => {
                return Err(PipelineError::PortMismatch {
                    from: from.to_string(),
                    to: to.to_string(),
                    reason: "output pad is not dynamic".to_string(),
                })
            }
            None => {
                return Err(PipelineError::NoSuchPort {
                    unit: from.unit.clone(),
                    pad: from.pad.clone(),
                })
            }
        }
        if producer.pad(&from.pad).is_some() {
            return self.link(from, to);
        }

        let input = self.existing_pad(to, PadDirection::Input)?;
        if input.is_linked() || self.pending.iter().any(|l| l.to == *to) {
            return Err(PipelineError::AlreadyLinked { pad: to.to_string() });
        }
        if self.pending.iter().any(|l| l.from == *from) {
            return Err(PipelineError::AlreadyLinked {
                pad: from.to_string(),
            });
        }

        info!(pipeline = %self.name, "Deferred link {} -> {} until the pad is created", from, to);
        self.pending.push(Link {
            from: from.clone(),
            to: to.clone(),
        });
        Ok(())
    }

    /// Make the deferred links whose output pad is `unit.pad`. Returns how
    /// many links were made.
    pub fn resolve_pending(&mut self, unit: &str, pad: &str) -> PipelineResult<usize> {
        let ready: Vec<Link> = self
            .pending
            .iter()
            .filter(|l| l.from.unit == unit && l.from.pad == pad)
            .cloned()
            .collect();
        for link in &ready {
            self.link(&link.from, &link.to)?;
        }
        Ok(ready.len())
    }

    /// Link consecutive units through their default `src` and `sink` pads.
    pub fn link_many(&mut self, units: &[&str]) -> PipelineResult<()> {
        for pair in units.windows(2) {
            self.link(&PortRef::new(pair[0], "src"), &PortRef::new(pair[1], "sink"))?;
        }
        Ok(())
    }

    /// Check that the declared links form a single connected chain: no
    /// cycles, no fan-out, and fan-in only into units with request pads.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.units.is_empty() {
            return Err(PipelineError::InvalidTopology {
                message: "Pipeline must contain at least one unit".to_string(),
            });
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let mut node_map = HashMap::new();
        for unit in &self.units {
            node_map.insert(unit.name(), graph.add_node(unit.name()));
        }
        for link in self.links.iter().chain(self.pending.iter()) {
            if let (Some(&from), Some(&to)) = (
                node_map.get(link.from.unit.as_str()),
                node_map.get(link.to.unit.as_str()),
            ) {
                graph.add_edge(from, to, ());
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(PipelineError::CircularDependency);
        }
        if connected_components(&graph) != 1 {
            return Err(PipelineError::InvalidTopology {
                message: "Pipeline is not a single connected chain".to_string(),
            });
        }

        for unit in &self.units {
            let idx = node_map[unit.name()];
            let outgoing = graph
                .neighbors_directed(idx, petgraph::Direction::Outgoing)
                .count();
            let incoming = graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .count();
            if outgoing > 1 {
                return Err(PipelineError::InvalidTopology {
                    message: format!("Unit '{}' fans out to {} units", unit.name(), outgoing),
                });
            }
            if incoming > 1 && !unit.has_request_pads() {
                return Err(PipelineError::InvalidTopology {
                    message: format!(
                        "Unit '{}' has {} upstream units but cannot batch inputs",
                        unit.name(),
                        incoming
                    ),
                });
            }
            for pad in unit.pads() {
                let awaiting = self
                    .pending
                    .iter()
                    .any(|l| l.to.unit == unit.name() && l.to.pad == pad.name());
                if !pad.is_linked() && !awaiting {
                    warn!(
                        pipeline = %self.name,
                        "Pad '{}' is declared but not connected to any other pad.",
                        pad.full_name()
                    );
                }
            }
        }
        Ok(())
    }
}

impl Drop for PipelineGraph {
    fn drop(&mut self) {
        if self.state != State::Idle && self.state != State::Stopped {
            warn!(pipeline = %self.name, state = ?self.state, "Dropping a pipeline that was not torn down");
            let _ = self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnitError;
    use crate::lifecycle::Transition;
    use crate::pad::PadTemplate;
    use crate::unit::{UnitContext, UnitImpl, UnitKind};

    /// Unit with fixed pads that never does anything.
    struct Inert {
        templates: Vec<PadTemplate>,
    }

    impl UnitImpl for Inert {
        fn kind(&self) -> UnitKind {
            UnitKind::Parser
        }

        fn pad_templates(&self) -> Vec<PadTemplate> {
            self.templates.clone()
        }

        fn change_state(&mut self, _: Transition, _: &UnitContext) -> Result<(), UnitError> {
            Ok(())
        }
    }

    fn filter(name: &str) -> ProcessingUnit {
        ProcessingUnit::new(
            name,
            "inert",
            Box::new(Inert {
                templates: vec![
                    PadTemplate::always("sink", PadDirection::Input),
                    PadTemplate::always("src", PadDirection::Output),
                ],
            }),
        )
    }

    fn dynamic(name: &str) -> ProcessingUnit {
        ProcessingUnit::new(
            name,
            "inert",
            Box::new(Inert {
                templates: vec![
                    PadTemplate::always("sink", PadDirection::Input),
                    PadTemplate::sometimes("src"),
                ],
            }),
        )
    }

    fn batcher(name: &str) -> ProcessingUnit {
        ProcessingUnit::new(
            name,
            "inert",
            Box::new(Inert {
                templates: vec![
                    PadTemplate::request("sink_%u"),
                    PadTemplate::always("src", PadDirection::Output),
                ],
            }),
        )
    }

    #[test]
    fn test_port_ref_parsing() {
        assert_eq!(
            PortRef::parse("decoder.src", "sink").unwrap(),
            PortRef::new("decoder", "src")
        );
        assert_eq!(
            PortRef::parse("decoder", "sink").unwrap(),
            PortRef::new("decoder", "sink")
        );
        assert!(PortRef::parse(".src", "sink").is_err());
        assert_eq!(
            "mux.sink_0".parse::<PortRef>().unwrap(),
            PortRef::new("mux", "sink_0")
        );
        assert!("mux".parse::<PortRef>().is_err());
    }

    #[test]
    fn test_duplicate_unit_rejected() {
        let mut graph = PipelineGraph::new("test");
        graph.add_unit(filter("a")).unwrap();
        assert!(matches!(
            graph.add_unit(filter("a")),
            Err(PipelineError::DuplicateUnit { .. })
        ));
    }

    #[test]
    fn test_link_many_and_validate_chain() {
        let mut graph = PipelineGraph::new("test");
        for name in ["a", "b", "c"] {
            graph.add_unit(filter(name)).unwrap();
        }
        graph.link_many(&["a", "b", "c"]).unwrap();
        assert_eq!(graph.links().len(), 2);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_relinking_occupied_pad_fails() {
        let mut graph = PipelineGraph::new("test");
        for name in ["a", "b", "c"] {
            graph.add_unit(filter(name)).unwrap();
        }
        graph.link_many(&["a", "b"]).unwrap();
        assert!(matches!(
            graph.link(&PortRef::new("a", "src"), &PortRef::new("c", "sink")),
            Err(PipelineError::AlreadyLinked { .. })
        ));
    }

    #[test]
    fn test_dynamic_pad_cannot_be_linked_before_creation() {
        let mut graph = PipelineGraph::new("test");
        graph.add_unit(dynamic("decoder")).unwrap();
        graph.add_unit(filter("next")).unwrap();

        let from = PortRef::new("decoder", "src");
        let to = PortRef::new("next", "sink");
        assert!(matches!(
            graph.link(&from, &to),
            Err(PipelineError::NoSuchPort { .. })
        ));

        graph.link_when_created(&from, &to).unwrap();
        assert_eq!(graph.pending_links().len(), 1);
        assert!(matches!(
            graph.link_when_created(&from, &to),
            Err(PipelineError::AlreadyLinked { .. })
        ));
        // Nothing to resolve until the pad exists.
        assert!(matches!(
            graph.resolve_pending("decoder", "src"),
            Err(PipelineError::NoSuchPort { .. })
        ));
    }

    #[test]
    fn test_link_when_created_rejects_static_pad() {
        let mut graph = PipelineGraph::new("test");
        graph.add_unit(filter("a")).unwrap();
        graph.add_unit(filter("b")).unwrap();
        assert!(matches!(
            graph.link_when_created(&PortRef::new("a", "src"), &PortRef::new("b", "sink")),
            Err(PipelineError::PortMismatch { .. })
        ));
    }

    #[test]
    fn test_request_pad_must_be_requested_before_linking() {
        let mut graph = PipelineGraph::new("test");
        graph.add_unit(filter("a")).unwrap();
        graph.add_unit(batcher("mux")).unwrap();

        let from = PortRef::new("a", "src");
        let to = PortRef::new("mux", "sink_0");
        assert!(matches!(
            graph.link(&from, &to),
            Err(PipelineError::NoSuchPort { .. })
        ));
        graph.request_pad("mux", Some("sink_0")).unwrap();
        graph.link(&from, &to).unwrap();
    }

    #[test]
    fn test_validate_rejects_disconnected_units() {
        let mut graph = PipelineGraph::new("test");
        for name in ["a", "b", "c"] {
            graph.add_unit(filter(name)).unwrap();
        }
        graph.link_many(&["a", "b"]).unwrap();
        assert!(matches!(
            graph.validate(),
            Err(PipelineError::InvalidTopology { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let mut graph = PipelineGraph::new("test");
        for name in ["a", "b"] {
            graph.add_unit(filter(name)).unwrap();
        }
        graph.link_many(&["a", "b", "a"]).unwrap();
        assert!(matches!(
            graph.validate(),
            Err(PipelineError::CircularDependency)
        ));
    }

    #[test]
    fn test_validate_allows_fan_in_at_batcher_only() {
        let mut graph = PipelineGraph::new("test");
        for name in ["a", "b"] {
            graph.add_unit(filter(name)).unwrap();
        }
        graph.add_unit(batcher("mux")).unwrap();
        graph.request_pad("mux", None).unwrap();
        graph.request_pad("mux", None).unwrap();
        graph
            .link(&PortRef::new("a", "src"), &PortRef::new("mux", "sink_0"))
            .unwrap();
        graph
            .link(&PortRef::new("b", "src"), &PortRef::new("mux", "sink_1"))
            .unwrap();
        assert!(graph.validate().is_ok());
    }

    fn inert(name: &str, templates: Vec<PadTemplate>) -> ProcessingUnit {
        ProcessingUnit::new(name, "inert", Box::new(Inert { templates }))
    }

    #[test]
    fn test_validate_rejects_fan_out() {
        let mut graph = PipelineGraph::new("test");
        graph
            .add_unit(inert(
                "tee",
                vec![
                    PadTemplate::always("sink", PadDirection::Input),
                    PadTemplate::always("src_0", PadDirection::Output),
                    PadTemplate::always("src_1", PadDirection::Output),
                ],
            ))
            .unwrap();
        for name in ["b", "c"] {
            graph.add_unit(filter(name)).unwrap();
        }
        graph
            .link(&PortRef::new("tee", "src_0"), &PortRef::new("b", "sink"))
            .unwrap();
        graph
            .link(&PortRef::new("tee", "src_1"), &PortRef::new("c", "sink"))
            .unwrap();

        match graph.validate() {
            Err(PipelineError::InvalidTopology { message }) => {
                assert_eq!(message, "Unit 'tee' fans out to 2 units")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_fan_in_without_request_pads() {
        let mut graph = PipelineGraph::new("test");
        for name in ["a", "b"] {
            graph.add_unit(filter(name)).unwrap();
        }
        graph
            .add_unit(inert(
                "join",
                vec![
                    PadTemplate::always("left", PadDirection::Input),
                    PadTemplate::always("right", PadDirection::Input),
                    PadTemplate::always("src", PadDirection::Output),
                ],
            ))
            .unwrap();
        graph
            .link(&PortRef::new("a", "src"), &PortRef::new("join", "left"))
            .unwrap();
        graph
            .link(&PortRef::new("b", "src"), &PortRef::new("join", "right"))
            .unwrap();

        match graph.validate() {
            Err(PipelineError::InvalidTopology { message }) => {
                assert!(message.contains("'join'"), "{}", message);
                assert!(message.contains("cannot batch inputs"), "{}", message);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_validate_empty_graph() {
        let graph = PipelineGraph::new("empty");
        assert!(matches!(
            graph.validate(),
            Err(PipelineError::InvalidTopology { .. })
        ));
    }
}
