//! Core processing unit trait and types

use crate::bus::{BusSender, Event, EventKind};
use crate::data::DataItem;
use crate::error::UnitError;
use crate::lifecycle::{State, Transition};
use crate::pad::{Pad, PadDirection, PadPresence, PadTable, PadTemplate};
use flume::Receiver;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// The fixed set of stage types a pipeline is assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    Source,
    Parser,
    HardwareDecoder,
    BatchMuxer,
    InferenceEngine,
    Tracker,
    ColorSpaceConverter,
    OnScreenDisplay,
    HardwareEncoder,
    ContainerMuxer,
    Sink,
}

/// A configuration value.
///
/// Text carries no path type, so a value read from a file is `Int` or `Str`;
/// a path property accepts the string and converts it when the unit is
/// configured. A string and a path with the same text compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged, from = "TextValue")]
pub enum PropertyValue {
    Int(i64),
    Str(String),
    Path(PathBuf),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextValue {
    Int(i64),
    Str(String),
}

impl From<TextValue> for PropertyValue {
    fn from(value: TextValue) -> Self {
        match value {
            TextValue::Int(v) => PropertyValue::Int(v),
            TextValue::Str(s) => PropertyValue::Str(s),
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a == b,
            (PropertyValue::Str(a), PropertyValue::Str(b)) => a == b,
            (PropertyValue::Path(a), PropertyValue::Path(b)) => a == b,
            (PropertyValue::Str(s), PropertyValue::Path(p))
            | (PropertyValue::Path(p), PropertyValue::Str(s)) => p.as_os_str() == OsStr::new(s),
            _ => false,
        }
    }
}

impl PropertyValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            PropertyValue::Path(p) => p.to_str(),
            PropertyValue::Int(_) => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            PropertyValue::Path(p) => Some(p),
            PropertyValue::Str(s) => Some(Path::new(s)),
            PropertyValue::Int(_) => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Str(s) => write!(f, "{}", s),
            PropertyValue::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v.into())
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

impl From<PathBuf> for PropertyValue {
    fn from(v: PathBuf) -> Self {
        PropertyValue::Path(v)
    }
}

impl From<&Path> for PropertyValue {
    fn from(v: &Path) -> Self {
        PropertyValue::Path(v.to_path_buf())
    }
}

/// The value type a property accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Int { min: i64, max: i64 },
    Str,
    Path,
}

/// One configuration key a unit understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    pub key: &'static str,
    pub kind: PropertyKind,
    pub description: &'static str,
}

impl PropertySpec {
    pub const fn int(key: &'static str, min: i64, max: i64, description: &'static str) -> Self {
        Self {
            key,
            kind: PropertyKind::Int { min, max },
            description,
        }
    }

    pub const fn path(key: &'static str, description: &'static str) -> Self {
        Self {
            key,
            kind: PropertyKind::Path,
            description,
        }
    }

    pub const fn string(key: &'static str, description: &'static str) -> Self {
        Self {
            key,
            kind: PropertyKind::Str,
            description,
        }
    }

    /// Type-check `value`, converting strings to paths where a path is expected.
    pub fn check(&self, value: PropertyValue) -> Result<PropertyValue, UnitError> {
        let invalid = |reason: String| UnitError::InvalidValue {
            key: self.key.to_string(),
            reason,
        };
        match (self.kind, value) {
            (PropertyKind::Int { min, max }, PropertyValue::Int(v)) => {
                if v < min || v > max {
                    Err(invalid(format!("{} is outside {}..={}", v, min, max)))
                } else {
                    Ok(PropertyValue::Int(v))
                }
            }
            (PropertyKind::Str, PropertyValue::Str(s)) => Ok(PropertyValue::Str(s)),
            (PropertyKind::Path, PropertyValue::Path(p)) => {
                if p.as_os_str().is_empty() {
                    Err(invalid("empty path".to_string()))
                } else {
                    Ok(PropertyValue::Path(p))
                }
            }
            (PropertyKind::Path, PropertyValue::Str(s)) => {
                if s.is_empty() {
                    Err(invalid("empty path".to_string()))
                } else {
                    Ok(PropertyValue::Path(PathBuf::from(s)))
                }
            }
            (kind, other) => Err(invalid(format!("expected {:?}, got '{}'", kind, other))),
        }
    }
}

/// The behavior behind a processing unit. The pipeline only ever talks to
/// it through this contract; what happens to the data inside is opaque.
pub trait UnitImpl: Send {
    fn kind(&self) -> UnitKind;

    /// Every pad this unit has or can have.
    fn pad_templates(&self) -> Vec<PadTemplate>;

    /// Configuration keys this unit accepts.
    fn properties(&self) -> &'static [PropertySpec] {
        &[]
    }

    /// Apply an already type-checked property value.
    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<(), UnitError> {
        let _ = (key, value);
        Ok(())
    }

    /// How many request pads may be reserved; `None` means no limit.
    fn request_capacity(&self) -> Option<usize> {
        None
    }

    /// Perform one lifecycle step.
    fn change_state(&mut self, transition: Transition, ctx: &UnitContext) -> Result<(), UnitError>;
}

/// Everything a unit (and its worker) may touch outside itself.
#[derive(Clone)]
pub struct UnitContext {
    name: String,
    bus: BusSender,
    pads: Arc<PadTable>,
}

impl UnitContext {
    pub fn new(name: &str, bus: BusSender, pads: Arc<PadTable>) -> Self {
        Self {
            name: name.to_string(),
            bus,
            pads,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post(&self, event: Event) -> bool {
        self.bus.post(event)
    }

    pub fn post_error(&self, message: impl Into<String>, detail: Option<String>) {
        let mut event = Event::error(&self.name, message);
        event.detail = detail;
        self.bus.post(event);
    }

    pub fn post_warning(&self, message: impl Into<String>) {
        self.bus.post(Event::warning(&self.name, message));
    }

    pub fn post_eos(&self) {
        self.bus.post(Event::eos(&self.name));
    }

    pub fn pad(&self, name: &str) -> Result<Arc<Pad>, UnitError> {
        self.pads
            .get(name)
            .ok_or_else(|| UnitError::NoSuchPort(name.to_string()))
    }

    /// Receivers of every input pad, in pad creation order.
    pub fn inputs(&self) -> Vec<(String, Receiver<DataItem>)> {
        self.pads
            .pads()
            .into_iter()
            .filter(|p| p.direction() == PadDirection::Input)
            .filter_map(|p| p.receiver().map(|rx| (p.name().to_string(), rx)))
            .collect()
    }

    /// Create a dynamic output pad and announce it on the bus.
    pub fn create_sometimes_pad(&self, name: &str) -> Result<Arc<Pad>, UnitError> {
        let pad = self.pads.add(name, PadPresence::Sometimes)?;
        debug!(unit = %self.name, pad = name, "Created dynamic pad");
        self.bus.post(Event::new(
            &self.name,
            EventKind::PadCreated {
                pad: name.to_string(),
            },
        ));
        Ok(pad)
    }
}

/// One stage of a pipeline, as owned by the graph.
pub struct ProcessingUnit {
    id: Uuid,
    name: String,
    type_name: String,
    kind: UnitKind,
    state: State,
    /// Set once the unit has left Idle. Its lifecycle runs only once.
    started: bool,
    properties: BTreeMap<String, PropertyValue>,
    pads: Arc<PadTable>,
    bus: Option<BusSender>,
    inner: Box<dyn UnitImpl>,
}

impl fmt::Debug for ProcessingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("properties", &self.properties)
            .finish()
    }
}

impl ProcessingUnit {
    pub fn new(name: &str, type_name: &str, inner: Box<dyn UnitImpl>) -> Self {
        let pads = Arc::new(PadTable::new(name, inner.pad_templates()));
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            type_name: type_name.to_string(),
            kind: inner.kind(),
            state: State::Idle,
            started: false,
            properties: BTreeMap::new(),
            pads,
            bus: None,
            inner,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Set one configuration entry. Only legal before the unit first leaves
    /// Idle; a unit that has been torn down reports itself as `Stopped`.
    pub fn configure(
        &mut self,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), UnitError> {
        if self.state != State::Idle || self.started {
            let from = match self.state {
                State::Idle => State::Stopped,
                state => state,
            };
            return Err(UnitError::InvalidTransition {
                from,
                to: State::Idle,
            });
        }
        let spec = self
            .inner
            .properties()
            .iter()
            .find(|s| s.key == key)
            .ok_or_else(|| UnitError::InvalidKey(key.to_string()))?;
        let value = spec.check(value.into())?;
        self.inner.set_property(key, &value)?;
        debug!(unit = %self.name, key, value = %value, "Configured property");
        self.properties.insert(key.to_string(), value);
        Ok(())
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    /// Look up a pad that exists from creation.
    pub fn static_pad(&self, direction: PadDirection, name: &str) -> Result<Arc<Pad>, UnitError> {
        self.pads
            .get(name)
            .filter(|p| p.presence() == PadPresence::Always && p.direction() == direction)
            .ok_or_else(|| UnitError::NoSuchPort(name.to_string()))
    }

    /// Any existing pad: static, requested, or dynamically created.
    pub fn pad(&self, name: &str) -> Option<Arc<Pad>> {
        self.pads.get(name)
    }

    pub fn pads(&self) -> Vec<Arc<Pad>> {
        self.pads.pads()
    }

    pub fn pad_templates(&self) -> &[PadTemplate] {
        self.pads.templates()
    }

    /// Presence of the template a pad name belongs to.
    pub fn presence_of(&self, pad_name: &str) -> Option<PadPresence> {
        self.pads.template_for(pad_name).map(|t| t.presence)
    }

    pub fn has_request_pads(&self) -> bool {
        self.pads
            .templates()
            .iter()
            .any(|t| t.presence == PadPresence::Request)
    }

    /// Reserve one new input slot. With no hint, the next free slot is used.
    pub fn request_pad(&mut self, name_hint: Option<&str>) -> Result<Arc<Pad>, UnitError> {
        if let Some(limit) = self.inner.request_capacity() {
            if self.pads.count(PadPresence::Request) >= limit {
                return Err(UnitError::CapacityExceeded { limit });
            }
        }
        let name = match name_hint {
            Some(hint) => hint.to_string(),
            None => self
                .pads
                .next_request_name()
                .ok_or_else(|| UnitError::NoSuchPort("request pad".to_string()))?,
        };
        let pad = self.pads.add(&name, PadPresence::Request)?;
        info!(unit = %self.name, pad = %name, "Requested pad");
        Ok(pad)
    }

    pub(crate) fn attach(&mut self, bus: BusSender) {
        self.bus = Some(bus);
    }

    /// Perform one lifecycle step on this unit.
    pub fn set_state(&mut self, transition: Transition) -> Result<(), UnitError> {
        if transition.from() != self.state {
            return Err(UnitError::InvalidTransition {
                from: self.state,
                to: transition.to(),
            });
        }
        let bus = self
            .bus
            .clone()
            .ok_or_else(|| UnitError::Resource("unit is not part of a pipeline".to_string()))?;
        let ctx = UnitContext::new(&self.name, bus, self.pads.clone());
        self.inner.change_state(transition, &ctx)?;
        debug!(unit = %self.name, from = ?transition.from(), to = ?transition.to(), "Unit changed state");
        if matches!(transition, Transition::IdleToReady) {
            self.started = true;
        }
        self.state = transition.to();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;

    struct Sample;

    static SAMPLE_PROPERTIES: &[PropertySpec] = &[
        PropertySpec::int("width", 1, 8192, "Output width"),
        PropertySpec::path("location", "Where to read"),
        PropertySpec::string("label", "Free text"),
    ];

    impl UnitImpl for Sample {
        fn kind(&self) -> UnitKind {
            UnitKind::BatchMuxer
        }

        fn pad_templates(&self) -> Vec<PadTemplate> {
            vec![
                PadTemplate::request("sink_%u"),
                PadTemplate::always("src", PadDirection::Output),
            ]
        }

        fn properties(&self) -> &'static [PropertySpec] {
            SAMPLE_PROPERTIES
        }

        fn request_capacity(&self) -> Option<usize> {
            Some(2)
        }

        fn change_state(&mut self, _: Transition, _: &UnitContext) -> Result<(), UnitError> {
            Ok(())
        }
    }

    fn sample() -> ProcessingUnit {
        ProcessingUnit::new("sample", "sample", Box::new(Sample))
    }

    #[test]
    fn test_configure_checks_keys_and_types() {
        let mut unit = sample();
        assert!(unit.configure("width", 1920).is_ok());
        assert_eq!(unit.property("width"), Some(&PropertyValue::Int(1920)));

        assert_eq!(
            unit.configure("nope", 1),
            Err(UnitError::InvalidKey("nope".to_string()))
        );
        assert!(matches!(
            unit.configure("width", 0),
            Err(UnitError::InvalidValue { .. })
        ));
        assert!(matches!(
            unit.configure("width", "wide"),
            Err(UnitError::InvalidValue { .. })
        ));
        assert!(matches!(
            unit.configure("label", 3),
            Err(UnitError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_string_is_accepted_as_path() {
        let mut unit = sample();
        unit.configure("location", "/tmp/in.h264").unwrap();
        assert_eq!(
            unit.property("location"),
            Some(&PropertyValue::Path(PathBuf::from("/tmp/in.h264")))
        );
    }

    #[test]
    fn test_configure_rejected_after_idle() {
        let bus = Bus::new();
        let mut unit = sample();
        unit.attach(bus.sender());
        unit.set_state(Transition::IdleToReady).unwrap();

        assert_eq!(
            unit.configure("width", 640),
            Err(UnitError::InvalidTransition {
                from: State::Ready,
                to: State::Idle
            })
        );
        assert_eq!(unit.property("width"), None);
    }

    #[test]
    fn test_configure_rejected_after_returning_to_idle() {
        let bus = Bus::new();
        let mut unit = sample();
        unit.attach(bus.sender());
        unit.configure("width", 1280).unwrap();
        for transition in [
            Transition::IdleToReady,
            Transition::ReadyToPaused,
            Transition::PausedToPlaying,
            Transition::PlayingToPaused,
            Transition::PausedToReady,
            Transition::ReadyToIdle,
        ] {
            unit.set_state(transition).unwrap();
        }
        assert_eq!(unit.state(), State::Idle);

        assert_eq!(
            unit.configure("width", 640),
            Err(UnitError::InvalidTransition {
                from: State::Stopped,
                to: State::Idle
            })
        );
        assert_eq!(unit.property("width"), Some(&PropertyValue::Int(1280)));
    }

    #[test]
    fn test_request_pad_capacity() {
        let mut unit = sample();
        assert_eq!(unit.request_pad(Some("sink_0")).unwrap().name(), "sink_0");
        assert_eq!(unit.request_pad(None).unwrap().name(), "sink_1");
        assert_eq!(
            unit.request_pad(None).unwrap_err(),
            UnitError::CapacityExceeded { limit: 2 }
        );
    }

    #[test]
    fn test_static_pad_lookup() {
        let unit = sample();
        assert!(unit.static_pad(PadDirection::Output, "src").is_ok());
        assert_eq!(
            unit.static_pad(PadDirection::Input, "src").unwrap_err(),
            UnitError::NoSuchPort("src".to_string())
        );
        assert_eq!(unit.presence_of("sink_4"), Some(PadPresence::Request));
        assert!(unit.has_request_pads());
    }

    #[test]
    fn test_set_state_requires_matching_source_state() {
        let bus = Bus::new();
        let mut unit = sample();
        unit.attach(bus.sender());
        assert!(matches!(
            unit.set_state(Transition::ReadyToPaused),
            Err(UnitError::InvalidTransition { .. })
        ));
        assert_eq!(unit.state(), State::Idle);
    }
}
