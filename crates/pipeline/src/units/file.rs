//! File source and file sink units.

use crate::data::{Buffer, DataItem};
use crate::error::UnitError;
use crate::lifecycle::Transition;
use crate::pad::{lock, Delivery, PadDirection, PadTemplate};
use crate::registry::UnitFactory;
use crate::unit::{PropertySpec, PropertyValue, UnitContext, UnitImpl, UnitKind};
use crate::units::worker::{next_item, Next, Worker};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const DEFAULT_BLOCKSIZE: usize = 4096;

static FILESRC_PROPERTIES: &[PropertySpec] = &[
    PropertySpec::path("location", "Input file to read"),
    PropertySpec::int("blocksize", 1, 64 * 1024 * 1024, "Bytes read per buffer"),
];

static FILESINK_PROPERTIES: &[PropertySpec] = &[PropertySpec::path("location", "File to write")];

fn location(value: &PropertyValue) -> Result<PathBuf, UnitError> {
    value
        .as_path()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| UnitError::InvalidValue {
            key: "location".to_string(),
            reason: "expected a path".to_string(),
        })
}

/// Reads a file in fixed-size blocks.
#[derive(Default)]
pub struct FileSourceFactory;

impl UnitFactory for FileSourceFactory {
    fn type_name(&self) -> &'static str {
        "filesrc"
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Source
    }

    fn create(&self, _name: &str) -> Result<Box<dyn UnitImpl>, UnitError> {
        Ok(Box::new(FileSource::default()))
    }
}

pub struct FileSource {
    location: Option<PathBuf>,
    blocksize: usize,
    file: Option<File>,
    worker: Option<Worker>,
}

impl Default for FileSource {
    fn default() -> Self {
        Self {
            location: None,
            blocksize: DEFAULT_BLOCKSIZE,
            file: None,
            worker: None,
        }
    }
}

impl FileSource {
    fn open(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let path = self
            .location
            .as_ref()
            .ok_or_else(|| UnitError::Resource("no file location set".to_string()))?;
        let file = File::open(path).map_err(|e| {
            UnitError::Resource(format!("could not open '{}' for reading: {}", path.display(), e))
        })?;
        info!(unit = %ctx.name(), path = %path.display(), "Opened input file");
        self.file = Some(file);
        Ok(())
    }

    fn start(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let mut file = self
            .file
            .as_ref()
            .ok_or_else(|| UnitError::Resource("input file is not open".to_string()))?
            .try_clone()?;
        let output = ctx.pad("src")?;
        let blocksize = self.blocksize;
        let worker_ctx = ctx.clone();

        let worker = Worker::spawn(ctx, move |stop| {
            let mut block = vec![0u8; blocksize];
            let mut sequence = 0u64;
            while !stop.is_set() {
                let item = match file.read(&mut block) {
                    Ok(0) => {
                        debug!(unit = %worker_ctx.name(), "Reached end of file");
                        DataItem::Eos
                    }
                    Ok(read) => {
                        let buffer = Buffer::new(sequence, Bytes::copy_from_slice(&block[..read]));
                        sequence += 1;
                        DataItem::Buffer(buffer)
                    }
                    Err(e) => {
                        worker_ctx.post_error("could not read from resource", Some(e.to_string()));
                        break;
                    }
                };
                let eos = item.is_eos();
                match stop.push(&output, item) {
                    Ok(Delivery::Sent) if !eos => {}
                    Ok(_) => break,
                    Err(e) => {
                        worker_ctx.post_error("failed to push buffer", Some(e.to_string()));
                        break;
                    }
                }
            }
        })?;
        self.worker = Some(worker);
        Ok(())
    }
}

impl UnitImpl for FileSource {
    fn kind(&self) -> UnitKind {
        UnitKind::Source
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::always("src", PadDirection::Output)]
    }

    fn properties(&self) -> &'static [PropertySpec] {
        FILESRC_PROPERTIES
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<(), UnitError> {
        match key {
            "location" => self.location = Some(location(value)?),
            "blocksize" => {
                self.blocksize = value
                    .as_int()
                    .and_then(|v| usize::try_from(v).ok())
                    .ok_or_else(|| UnitError::InvalidValue {
                        key: key.to_string(),
                        reason: "expected a positive integer".to_string(),
                    })?
            }
            _ => return Err(UnitError::InvalidKey(key.to_string())),
        }
        Ok(())
    }

    fn change_state(&mut self, transition: Transition, ctx: &UnitContext) -> Result<(), UnitError> {
        match transition {
            Transition::IdleToReady => self.open(ctx)?,
            Transition::PausedToPlaying => self.start(ctx)?,
            Transition::PlayingToPaused => {
                if let Some(worker) = self.worker.take() {
                    worker.stop();
                }
            }
            Transition::ReadyToIdle => {
                self.file = None;
                info!(unit = %ctx.name(), "Closed input file");
            }
            Transition::ReadyToPaused | Transition::PausedToReady => {}
        }
        Ok(())
    }
}

/// Writes every buffer it receives to a file.
#[derive(Default)]
pub struct FileSinkFactory;

impl UnitFactory for FileSinkFactory {
    fn type_name(&self) -> &'static str {
        "filesink"
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Sink
    }

    fn create(&self, _name: &str) -> Result<Box<dyn UnitImpl>, UnitError> {
        Ok(Box::new(FileSink::default()))
    }
}

#[derive(Default)]
pub struct FileSink {
    location: Option<PathBuf>,
    writer: Option<Arc<Mutex<BufWriter<File>>>>,
    worker: Option<Worker>,
}

impl FileSink {
    fn create_file(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let path = self
            .location
            .as_ref()
            .ok_or_else(|| UnitError::Resource("no file location set".to_string()))?;
        let file = File::create(path).map_err(|e| {
            UnitError::Resource(format!("could not open '{}' for writing: {}", path.display(), e))
        })?;
        info!(unit = %ctx.name(), path = %path.display(), "Opened output file");
        self.writer = Some(Arc::new(Mutex::new(BufWriter::new(file))));
        Ok(())
    }

    fn start(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let writer = self
            .writer
            .clone()
            .ok_or_else(|| UnitError::Resource("output file is not open".to_string()))?;
        let input = ctx
            .pad("sink")?
            .receiver()
            .ok_or_else(|| UnitError::NoSuchPort("sink".to_string()))?;
        let worker_ctx = ctx.clone();

        let worker = Worker::spawn(ctx, move |stop| loop {
            match next_item(std::slice::from_ref(&input), &stop) {
                Next::Item(_, DataItem::Buffer(buffer)) => {
                    if let Err(e) = lock(&writer).write_all(&buffer.payload) {
                        worker_ctx.post_error("could not write to resource", Some(e.to_string()));
                        break;
                    }
                }
                Next::Item(_, DataItem::Eos) => {
                    match lock(&writer).flush() {
                        Ok(()) => worker_ctx.post_eos(),
                        Err(e) => worker_ctx.post_error("could not flush resource", Some(e.to_string())),
                    }
                    break;
                }
                Next::Stop => break,
            }
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn close(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        if let Some(writer) = self.writer.take() {
            lock(&writer).flush()?;
            info!(unit = %ctx.name(), "Closed output file");
        }
        Ok(())
    }
}

impl UnitImpl for FileSink {
    fn kind(&self) -> UnitKind {
        UnitKind::Sink
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::always("sink", PadDirection::Input)]
    }

    fn properties(&self) -> &'static [PropertySpec] {
        FILESINK_PROPERTIES
    }

    fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<(), UnitError> {
        match key {
            "location" => self.location = Some(location(value)?),
            _ => return Err(UnitError::InvalidKey(key.to_string())),
        }
        Ok(())
    }

    fn change_state(&mut self, transition: Transition, ctx: &UnitContext) -> Result<(), UnitError> {
        match transition {
            Transition::IdleToReady => self.create_file(ctx)?,
            Transition::PausedToPlaying => self.start(ctx)?,
            Transition::PlayingToPaused => {
                if let Some(worker) = self.worker.take() {
                    worker.stop();
                }
            }
            Transition::ReadyToIdle => self.close(ctx)?,
            Transition::ReadyToPaused | Transition::PausedToReady => {}
        }
        Ok(())
    }
}
