//! Hardware video decoder.
//!
//! The decoder only learns its output format from the stream, so its `src`
//! pad does not exist until the first buffer arrives.

use crate::data::DataItem;
use crate::error::UnitError;
use crate::lifecycle::Transition;
use crate::pad::{Delivery, Pad, PadDirection, PadTemplate};
use crate::registry::UnitFactory;
use crate::unit::{UnitContext, UnitImpl, UnitKind};
use crate::units::worker::{next_item, Next, Worker};
use std::sync::Arc;
use tracing::debug;

const TYPE_NAME: &str = "nvv4l2decoder";

#[derive(Default)]
pub struct DecoderFactory;

impl UnitFactory for DecoderFactory {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn kind(&self) -> UnitKind {
        UnitKind::HardwareDecoder
    }

    fn create(&self, _name: &str) -> Result<Box<dyn UnitImpl>, UnitError> {
        Ok(Box::new(Decoder::default()))
    }
}

#[derive(Default)]
pub struct Decoder {
    worker: Option<Worker>,
}

/// The `src` pad, created on first use.
fn output_pad(ctx: &UnitContext) -> Result<Arc<Pad>, UnitError> {
    match ctx.pad("src") {
        Ok(pad) => Ok(pad),
        Err(_) => ctx.create_sometimes_pad("src"),
    }
}

impl Decoder {
    fn start(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let input = ctx
            .pad("sink")?
            .receiver()
            .ok_or_else(|| UnitError::NoSuchPort("sink".to_string()))?;
        let worker_ctx = ctx.clone();

        let worker = Worker::spawn(ctx, move |stop| loop {
            let item = match next_item(std::slice::from_ref(&input), &stop) {
                Next::Item(_, item) => item,
                Next::Stop => break,
            };
            let output = match output_pad(&worker_ctx) {
                Ok(pad) => pad,
                Err(e) => {
                    worker_ctx.post_error("failed to create output pad", Some(e.to_string()));
                    break;
                }
            };
            let eos = item.is_eos();
            let item = match item {
                DataItem::Buffer(buffer) => DataItem::Buffer(buffer.tagged(TYPE_NAME)),
                DataItem::Eos => DataItem::Eos,
            };
            match stop.push(&output, item) {
                Ok(Delivery::Sent) => {}
                Ok(Delivery::Stopped) => break,
                Err(e) => {
                    worker_ctx.post_error("failed to push decoded frame", Some(e.to_string()));
                    break;
                }
            }
            if eos {
                debug!(unit = %worker_ctx.name(), "Forwarded end of stream");
                break;
            }
        })?;
        self.worker = Some(worker);
        Ok(())
    }
}

impl UnitImpl for Decoder {
    fn kind(&self) -> UnitKind {
        UnitKind::HardwareDecoder
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![
            PadTemplate::always("sink", PadDirection::Input),
            PadTemplate::sometimes("src"),
        ]
    }

    fn change_state(&mut self, transition: Transition, ctx: &UnitContext) -> Result<(), UnitError> {
        match transition {
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
