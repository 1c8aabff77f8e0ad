//! Batching multiplexer.
//!
//! Gathers frames from any number of requested `sink_%u` inputs into one
//! output stream. The number of inputs is bounded by `batch-size`.

use crate::data::DataItem;
use crate::error::UnitError;
use crate::lifecycle::Transition;
use crate::pad::{Delivery, PadDirection, PadTemplate};
use crate::registry::UnitFactory;
use crate::unit::{PropertySpec, PropertyValue, UnitContext, UnitImpl, UnitKind};
use crate::units::worker::{next_item, Next, Worker};
use tracing::{debug, info, warn};

const TYPE_NAME: &str = "nvstreammux";

static PROPERTIES: &[PropertySpec] = &[
    PropertySpec::int("batch-size", 1, 1024, "Maximum number of frames in a batch"),
    PropertySpec::int("width", 1, 16384, "Width of the batched frames"),
    PropertySpec::int("height", 1, 16384, "Height of the batched frames"),
    PropertySpec::int(
        "batched-push-timeout",
        -1,
        i32::MAX as i64,
        "Microseconds to wait for a full batch, -1 to wait forever",
    ),
];

#[derive(Default)]
pub struct StreamMuxFactory;

impl UnitFactory for StreamMuxFactory {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn kind(&self) -> UnitKind {
        UnitKind::BatchMuxer
    }

    fn create(&self, _name: &str) -> Result<Box<dyn UnitImpl>, UnitError> {
        Ok(Box::new(StreamMux::default()))
    }
}

pub struct StreamMux {
    batch_size: usize,
    width: i64,
    height: i64,
    batched_push_timeout: i64,
    worker: Option<Worker>,
}

impl Default for StreamMux {
    fn default() -> Self {
        Self {
            batch_size: 1,
            width: 1920,
            height: 1080,
            batched_push_timeout: 40_000,
            worker: None,
        }
    }
}

impl StreamMux {
    fn start(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let (mut names, mut inputs): (Vec<String>, Vec<_>) = ctx.inputs().into_iter().unzip();
        if inputs.is_empty() {
            return Err(UnitError::Resource("no input pads were requested".to_string()));
        }
        let output = ctx.pad("src")?;
        let worker_ctx = ctx.clone();

        let worker = Worker::spawn(ctx, move |stop| loop {
            match next_item(&inputs, &stop) {
                Next::Item(_, DataItem::Buffer(buffer)) => {
                    match stop.push(&output, DataItem::Buffer(buffer.tagged(TYPE_NAME))) {
                        Ok(Delivery::Sent) => {}
                        Ok(Delivery::Stopped) => break,
                        Err(e) => {
                            worker_ctx.post_error("failed to push batch", Some(e.to_string()));
                            break;
                        }
                    }
                }
                Next::Item(index, DataItem::Eos) => {
                    inputs.remove(index);
                    let pad = names.remove(index);
                    debug!(unit = %worker_ctx.name(), pad = %pad, "Input reached end of stream");
                    if inputs.is_empty() {
                        if let Err(e) = stop.push(&output, DataItem::Eos) {
                            worker_ctx.post_error("failed to forward end of stream", Some(e.to_string()));
                        }
                        break;
                    }
                }
                Next::Stop => break,
            }
        })?;
        self.worker = Some(worker);
        Ok(())
    }
}

impl UnitImpl for StreamMux {
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
        PROPERTIES
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<(), UnitError> {
        let v = value.as_int().ok_or_else(|| UnitError::InvalidValue {
            key: key.to_string(),
            reason: "expected an integer".to_string(),
        })?;
        match key {
            "batch-size" => {
                self.batch_size = usize::try_from(v).map_err(|_| UnitError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("{} is not a valid batch size", v),
                })?
            }
            "width" => self.width = v,
            "height" => self.height = v,
            "batched-push-timeout" => self.batched_push_timeout = v,
            _ => return Err(UnitError::InvalidKey(key.to_string())),
        }
        Ok(())
    }

    fn request_capacity(&self) -> Option<usize> {
        Some(self.batch_size)
    }

    fn change_state(&mut self, transition: Transition, ctx: &UnitContext) -> Result<(), UnitError> {
        match transition {
            Transition::IdleToReady => {
                let inputs = ctx.inputs().len();
                if inputs == 0 {
                    warn!(unit = %ctx.name(), "No input pads requested");
                }
                info!(
                    unit = %ctx.name(),
                    batch_size = self.batch_size,
                    width = self.width,
                    height = self.height,
                    timeout_us = self.batched_push_timeout,
                    inputs,
                    "Configured batching"
                );
            }
            Transition::PausedToPlaying => self.start(ctx)?,
            Transition::PlayingToPaused => {
                if let Some(worker) = self.worker.take() {
                    worker.stop();
                }
            }
            _ => {}
        }
        Ok(())
    }
}
