//! One-in, one-out units whose processing is opaque to the pipeline.
//!
//! Parsers, inference, tracking, conversion, overlay, encoding and container
//! muxing all share this shape; they differ in the properties they accept,
//! the ones they need before allocating resources, and the tag they leave on
//! each buffer.

use crate::data::DataItem;
use crate::error::UnitError;
use crate::lifecycle::Transition;
use crate::pad::{Delivery, PadDirection, PadTemplate};
use crate::registry::UnitFactory;
use crate::unit::{PropertySpec, PropertyValue, UnitContext, UnitImpl, UnitKind};
use crate::units::worker::{next_item, Next, Worker};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Static description of a filter unit type.
#[derive(Debug)]
pub struct FilterSpec {
    pub type_name: &'static str,
    pub kind: UnitKind,
    pub properties: &'static [PropertySpec],
    /// Properties that must be set before the unit can become ready.
    pub required: &'static [&'static str],
    /// Defaults applied at creation.
    pub defaults: &'static [(&'static str, i64)],
}

pub struct FilterFactory(pub &'static FilterSpec);

impl UnitFactory for FilterFactory {
    fn type_name(&self) -> &'static str {
        self.0.type_name
    }

    fn kind(&self) -> UnitKind {
        self.0.kind
    }

    fn create(&self, _name: &str) -> Result<Box<dyn UnitImpl>, UnitError> {
        Ok(Box::new(Filter::new(self.0)))
    }
}

pub struct Filter {
    spec: &'static FilterSpec,
    values: BTreeMap<&'static str, PropertyValue>,
    worker: Option<Worker>,
}

impl Filter {
    pub fn new(spec: &'static FilterSpec) -> Self {
        let values = spec
            .defaults
            .iter()
            .map(|(key, value)| (*key, PropertyValue::Int(*value)))
            .collect();
        Self {
            spec,
            values,
            worker: None,
        }
    }

    pub fn value(&self, key: &str) -> Option<&PropertyValue> {
        self.values.get(key)
    }

    fn check_required(&self) -> Result<(), UnitError> {
        for key in self.spec.required {
            if !self.values.contains_key(key) {
                return Err(UnitError::Resource(format!(
                    "property '{}' must be set before {} can start",
                    key, self.spec.type_name
                )));
            }
        }
        Ok(())
    }

    fn start(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let input = ctx.pad("sink")?.receiver().ok_or_else(|| {
            UnitError::NoSuchPort("sink".to_string())
        })?;
        let output = ctx.pad("src")?;
        let tag = self.spec.type_name;
        let worker_ctx = ctx.clone();

        let worker = Worker::spawn(ctx, move |stop| loop {
            match next_item(std::slice::from_ref(&input), &stop) {
                Next::Item(_, DataItem::Buffer(buffer)) => {
                    match stop.push(&output, DataItem::Buffer(buffer.tagged(tag))) {
                        Ok(Delivery::Sent) => {}
                        Ok(Delivery::Stopped) => break,
                        Err(e) => {
                            worker_ctx.post_error("failed to push buffer", Some(e.to_string()));
                            break;
                        }
                    }
                }
                Next::Item(_, DataItem::Eos) => {
                    debug!(unit = %worker_ctx.name(), "Forwarding end of stream");
                    if let Err(e) = stop.push(&output, DataItem::Eos) {
                        worker_ctx.post_error("failed to forward end of stream", Some(e.to_string()));
                    }
                    break;
                }
                Next::Stop => break,
            }
        })?;
        self.worker = Some(worker);
        Ok(())
    }
}

impl UnitImpl for Filter {
    fn kind(&self) -> UnitKind {
        self.spec.kind
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![
            PadTemplate::always("sink", PadDirection::Input),
            PadTemplate::always("src", PadDirection::Output),
        ]
    }

    fn properties(&self) -> &'static [PropertySpec] {
        self.spec.properties
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<(), UnitError> {
        let key = self
            .spec
            .properties
            .iter()
            .map(|p| p.key)
            .find(|k| *k == key)
            .ok_or_else(|| UnitError::InvalidKey(key.to_string()))?;
        self.values.insert(key, value.clone());
        Ok(())
    }

    fn change_state(&mut self, transition: Transition, ctx: &UnitContext) -> Result<(), UnitError> {
        match transition {
            Transition::IdleToReady => {
                self.check_required()?;
                info!(unit = %ctx.name(), unit_type = self.spec.type_name, "Allocated unit resources");
            }
            Transition::PausedToPlaying => self.start(ctx)?,
            Transition::PlayingToPaused => {
                if let Some(worker) = self.worker.take() {
                    worker.stop();
                }
            }
            Transition::ReadyToIdle => {
                info!(unit = %ctx.name(), unit_type = self.spec.type_name, "Released unit resources");
            }
            Transition::ReadyToPaused | Transition::PausedToReady => {}
        }
        Ok(())
    }
}
