//! Media pipeline graph for detect-and-track video processing.
//!
//! Processing units are created by type name from a registry, wired together
//! through their pads into a graph, driven through a shared lifecycle, and
//! supervised through an event bus until the stream ends or a unit fails.

pub mod bus;
pub mod config;
pub mod data;
pub mod error;
pub mod framework;
pub mod graph;
pub mod lifecycle;
pub mod pad;
pub mod registry;
pub mod supervisor;
pub mod unit;
pub mod units;


#[doc(hidden)]
pub use inventory;

// Re-export commonly used types
pub use bus::{Bus, BusSender, Event, EventKind};
pub use config::{LinkConfig, PipelineConfig, UnitConfig};
pub use data::{Buffer, DataItem};
pub use error::{FailureClass, PipelineError, PipelineResult, UnitError};
pub use framework::{init, is_initialized, Framework};
pub use graph::{Link, PipelineGraph, PortRef};
pub use lifecycle::{State, Transition};
pub use pad::{Delivery, Pad, PadDirection, PadPresence, PadTemplate, PAD_CAPACITY};
pub use registry::{UnitFactory, UnitRegistry};
pub use supervisor::{RunOutcome, Supervisor};
pub use unit::{
    ProcessingUnit, PropertyKind, PropertySpec, PropertyValue, UnitContext, UnitImpl, UnitKind,
};
