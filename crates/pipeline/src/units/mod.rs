//! Built-in processing units.
//!
//! These stand in for the hardware-accelerated stages of a detect-and-track
//! pipeline. They move buffers from source to sink, honor their lifecycle and
//! pad contracts, and mark every buffer with the stages it went through. The
//! media work itself is opaque to the pipeline and is not performed.

pub mod decoder;
pub mod file;
pub mod filter;
pub mod stream_mux;
pub(crate) mod worker;

use crate::register_unit;
use crate::unit::{PropertySpec, UnitKind};
use filter::{FilterFactory, FilterSpec};

pub static H264_PARSE: FilterSpec = FilterSpec {
    type_name: "h264parse",
    kind: UnitKind::Parser,
    properties: &[],
    required: &[],
    defaults: &[],
};

pub static INFERENCE: FilterSpec = FilterSpec {
    type_name: "nvinfer",
    kind: UnitKind::InferenceEngine,
    properties: &[
        PropertySpec::path("config-file-path", "Inference engine configuration file"),
        PropertySpec::int("batch-size", 1, 1024, "Frames inferred per batch"),
        PropertySpec::int("unique-id", 0, i32::MAX as i64, "Identifier attached to results"),
    ],
    required: &["config-file-path"],
    defaults: &[("batch-size", 1), ("unique-id", 1)],
};

pub static TRACKER: FilterSpec = FilterSpec {
    type_name: "nvtracker",
    kind: UnitKind::Tracker,
    properties: &[
        PropertySpec::path("ll-lib-file", "Low-level tracker library"),
        PropertySpec::path("ll-config-file", "Low-level tracker configuration"),
        PropertySpec::int("tracker-width", 32, 16384, "Tracker frame width"),
        PropertySpec::int("tracker-height", 32, 16384, "Tracker frame height"),
    ],
    required: &["ll-lib-file"],
    defaults: &[("tracker-width", 640), ("tracker-height", 384)],
};

pub static VIDEO_CONVERT: FilterSpec = FilterSpec {
    type_name: "nvvideoconvert",
    kind: UnitKind::ColorSpaceConverter,
    properties: &[],
    required: &[],
    defaults: &[],
};

pub static OSD: FilterSpec = FilterSpec {
    type_name: "nvdsosd",
    kind: UnitKind::OnScreenDisplay,
    properties: &[PropertySpec::int("display-text", 0, 1, "Draw object labels")],
    required: &[],
    defaults: &[("display-text", 1)],
};

pub static H264_ENCODER: FilterSpec = FilterSpec {
    type_name: "nvv4l2h264enc",
    kind: UnitKind::HardwareEncoder,
    properties: &[PropertySpec::int("bitrate", 1, i32::MAX as i64, "Target bitrate in bits per second")],
    required: &[],
    defaults: &[("bitrate", 4_000_000)],
};

pub static QT_MUX: FilterSpec = FilterSpec {
    type_name: "qtmux",
    kind: UnitKind::ContainerMuxer,
    properties: &[],
    required: &[],
    defaults: &[],
};

register_unit!(file::FileSourceFactory);
register_unit!(FilterFactory(&H264_PARSE));
register_unit!(decoder::DecoderFactory);
register_unit!(stream_mux::StreamMuxFactory);
register_unit!(FilterFactory(&INFERENCE));
register_unit!(FilterFactory(&TRACKER));
register_unit!(FilterFactory(&VIDEO_CONVERT));
register_unit!(FilterFactory(&OSD));
register_unit!(FilterFactory(&H264_ENCODER));
register_unit!(FilterFactory(&QT_MUX));
register_unit!(file::FileSinkFactory);
