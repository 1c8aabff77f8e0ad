//! Pipeline configuration types and serialization

use crate::error::{PipelineError, PipelineResult};
use crate::graph::{PipelineGraph, PortRef};
use crate::pad::PadPresence;
use crate::registry::UnitRegistry;
use crate::unit::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default inference engine configuration shipped with the SDK samples.
pub const DEFAULT_INFER_CONFIG: &str =
    "/opt/nvidia/deepstream/deepstream/sources/apps/sample_apps/deepstream-test1/dstest1_pgie_config.txt";

/// Default low-level tracker library.
pub const DEFAULT_TRACKER_LIB: &str =
    "/opt/nvidia/deepstream/deepstream/lib/libnvds_nvmultiobjecttracker.so";

pub const DEFAULT_OUTPUT: &str = "output.mp4";

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name, used as the origin of pipeline-level events
    #[serde(default = "default_name")]
    pub name: String,
    /// Unit declarations, in creation order
    pub units: Vec<UnitConfig>,
    /// Links, in the order they are made
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

fn default_name() -> String {
    "pipeline".to_string()
}

/// Individual unit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Unique unit name within the pipeline
    pub name: String,
    /// Registered type name
    #[serde(rename = "type")]
    pub unit_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

/// A link between two pads, written as `unit.pad`. A bare unit name means
/// its `src` pad on the `from` side and its `sink` pad on the `to` side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub from: String,
    pub to: String,
}

impl UnitConfig {
    pub fn new(name: &str, unit_type: &str) -> Self {
        Self {
            name: name.to_string(),
            unit_type: unit_type.to_string(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

impl LinkConfig {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn source(&self) -> PipelineResult<PortRef> {
        PortRef::parse(&self.from, "src")
    }

    pub fn target(&self) -> PipelineResult<PortRef> {
        PortRef::parse(&self.to, "sink")
    }
}

impl PipelineConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            units: Vec::new(),
            links: Vec::new(),
        }
    }

    /// The detect-and-track chain: file source, parser and decoder feeding
    /// the batching muxer through a dynamic link, then inference, tracking,
    /// overlay, re-encoding and a container written to `output`.
    pub fn detect_and_track(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        let mut config = Self::new("dstest-pipeline");
        config.units = vec![
            UnitConfig::new("file-source", "filesrc").with("location", input.as_ref()),
            UnitConfig::new("h264-parser", "h264parse"),
            UnitConfig::new("nvv4l2-decoder", "nvv4l2decoder"),
            UnitConfig::new("stream-muxer", "nvstreammux")
                .with("batch-size", 1)
                .with("width", 1920)
                .with("height", 1080)
                .with("batched-push-timeout", 40000),
            UnitConfig::new("primary-nvinference-engine", "nvinfer")
                .with("config-file-path", PathBuf::from(DEFAULT_INFER_CONFIG)),
            UnitConfig::new("tracker", "nvtracker")
                .with("ll-lib-file", PathBuf::from(DEFAULT_TRACKER_LIB)),
            UnitConfig::new("nvvideo-converter", "nvvideoconvert"),
            UnitConfig::new("nv-onscreendisplay", "nvdsosd"),
            UnitConfig::new("nvvideo-converter2", "nvvideoconvert"),
            UnitConfig::new("nvv4l2h264enc", "nvv4l2h264enc"),
            UnitConfig::new("h264parser2", "h264parse"),
            UnitConfig::new("qtmux", "qtmux"),
            UnitConfig::new("filesink", "filesink").with("location", output.as_ref()),
        ];
        config.links = vec![
            LinkConfig::new("file-source", "h264-parser"),
            LinkConfig::new("h264-parser", "nvv4l2-decoder"),
            LinkConfig::new("nvv4l2-decoder.src", "stream-muxer.sink_0"),
            LinkConfig::new("stream-muxer", "primary-nvinference-engine"),
            LinkConfig::new("primary-nvinference-engine", "tracker"),
            LinkConfig::new("tracker", "nvvideo-converter"),
            LinkConfig::new("nvvideo-converter", "nv-onscreendisplay"),
            LinkConfig::new("nv-onscreendisplay", "nvvideo-converter2"),
            LinkConfig::new("nvvideo-converter2", "nvv4l2h264enc"),
            LinkConfig::new("nvv4l2h264enc", "h264parser2"),
            LinkConfig::new("h264parser2", "qtmux"),
            LinkConfig::new("qtmux", "filesink"),
        ];
        config
    }

    pub fn unit(&self, name: &str) -> Option<&UnitConfig> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn unit_mut(&mut self, name: &str) -> Option<&mut UnitConfig> {
        self.units.iter_mut().find(|u| u.name == name)
    }

    /// Replace `{key}` with `value` in every string and path property.
    pub fn substitute(&mut self, key: &str, value: &str) {
        let placeholder = format!("{{{}}}", key);
        for unit in &mut self.units {
            for property in unit.properties.values_mut() {
                match property {
                    PropertyValue::Str(s) if s.contains(&placeholder) => {
                        *s = s.replace(&placeholder, value);
                    }
                    PropertyValue::Path(p) => {
                        let replaced = p
                            .to_str()
                            .filter(|s| s.contains(&placeholder))
                            .map(|s| s.replace(&placeholder, value));
                        if let Some(replaced) = replaced {
                            *p = PathBuf::from(replaced);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> PipelineResult<()> {
        if self.units.is_empty() {
            return Err(PipelineError::InvalidConfiguration {
                message: "Pipeline must contain at least one unit".to_string(),
            });
        }

        let mut names = HashSet::new();
        for unit in &self.units {
            if unit.name.is_empty() || unit.name.contains('.') {
                return Err(PipelineError::InvalidConfiguration {
                    message: format!("Invalid unit name '{}'", unit.name),
                });
            }
            if !names.insert(unit.name.as_str()) {
                return Err(PipelineError::DuplicateUnit {
                    name: unit.name.clone(),
                });
            }
        }

        for link in &self.links {
            for port in [link.source()?, link.target()?] {
                if !names.contains(port.unit.as_str()) {
                    return Err(PipelineError::InvalidConfiguration {
                        message: format!(
                            "Link '{}' -> '{}' references non-existent unit '{}'",
                            link.from, link.to, port.unit
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Create, configure and link every declared unit.
    ///
    /// Request pads named by a link are requested first. Links from dynamic
    /// pads are left pending until the producing unit announces the pad.
    pub fn build(&self, registry: &UnitRegistry) -> PipelineResult<PipelineGraph> {
        self.validate()?;
        let mut graph = PipelineGraph::new(&self.name);

        for decl in &self.units {
            let mut unit = registry.create(&decl.unit_type, &decl.name)?;
            for (key, value) in &decl.properties {
                unit.configure(key, value.clone())
                    .map_err(|e| PipelineError::unit(&decl.name, e))?;
            }
            debug!(unit = %decl.name, unit_type = %decl.unit_type, "Created unit");
            graph.add_unit(unit)?;
        }

        for decl in &self.links {
            let from = decl.source()?;
            let to = decl.target()?;

            let consumer = graph.unit(&to.unit).ok_or_else(|| PipelineError::UnitNotFound {
                name: to.unit.clone(),
            })?;
            if consumer.presence_of(&to.pad) == Some(PadPresence::Request)
                && consumer.pad(&to.pad).is_none()
            {
                graph.request_pad(&to.unit, Some(&to.pad))?;
            }

            let producer = graph.unit(&from.unit).ok_or_else(|| PipelineError::UnitNotFound {
                name: from.unit.clone(),
            })?;
            if producer.presence_of(&from.pad) == Some(PadPresence::Sometimes) {
                graph.link_when_created(&from, &to)?;
            } else {
                graph.link(&from, &to)?;
            }
        }

        graph.validate()?;
        info!(
            pipeline = %self.name,
            units = graph.len(),
            links = graph.links().len(),
            pending = graph.pending_links().len(),
            "Built pipeline"
        );
        Ok(graph)
    }

    /// Load pipeline configuration from YAML
    pub fn from_yaml(yaml: &str) -> PipelineResult<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load pipeline configuration from JSON
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a `.json` file as JSON and anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            _ => Self::from_yaml(&text),
        }
    }

    pub fn to_yaml(&self) -> PipelineResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Save pipeline configuration to JSON
    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology() {
        let config = PipelineConfig::detect_and_track("sample.h264", "out.mp4");
        assert_eq!(config.units.len(), 13);
        assert_eq!(config.links.len(), 12);
        assert!(config.validate().is_ok());

        let mux = config.unit("stream-muxer").unwrap();
        assert_eq!(mux.properties.get("batched-push-timeout"), Some(&PropertyValue::Int(40000)));
        assert_eq!(
            config.unit("filesink").unwrap().properties.get("location"),
            Some(&PropertyValue::Path(PathBuf::from("out.mp4")))
        );

        let dynamic = &config.links[2];
        assert_eq!(dynamic.source().unwrap(), PortRef::new("nvv4l2-decoder", "src"));
        assert_eq!(dynamic.target().unwrap(), PortRef::new("stream-muxer", "sink_0"));
    }

    #[test]
    fn test_duplicate_unit_rejected() {
        let mut config = PipelineConfig::new("test");
        config.units.push(UnitConfig::new("a", "h264parse"));
        config.units.push(UnitConfig::new("a", "qtmux"));
        assert!(matches!(
            config.validate(),
            Err(PipelineError::DuplicateUnit { .. })
        ));
    }

    #[test]
    fn test_link_to_unknown_unit_rejected() {
        let mut config = PipelineConfig::new("test");
        config.units.push(UnitConfig::new("a", "h264parse"));
        config.links.push(LinkConfig::new("a", "b.sink"));
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_yaml_with_placeholder() {
        let yaml = r#"
name: custom
units:
  - name: source
    type: filesrc
    properties:
      location: "{input}"
      blocksize: 1024
  - name: sink
    type: filesink
    properties:
      location: out.mp4
links:
  - from: source
    to: sink
"#;
        let mut config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, "custom");
        config.substitute("input", "/data/clip.h264");
        let source = config.unit("source").unwrap();
        assert_eq!(
            source.properties.get("location"),
            Some(&PropertyValue::Str("/data/clip.h264".to_string()))
        );
        assert_eq!(source.properties.get("blocksize"), Some(&PropertyValue::Int(1024)));
    }

    #[test]
    fn test_json_round_trip() {
        let config = PipelineConfig::detect_and_track("in.h264", "out.mp4");
        let json = config.to_json().unwrap();
        let parsed = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);

        // Paths come back as text and are typed again when configured.
        let location = &parsed.unit("file-source").unwrap().properties["location"];
        assert!(matches!(location, PropertyValue::Str(s) if s == "in.h264"));
        assert_eq!(location.as_path(), Some(Path::new("in.h264")));
    }

    #[test]
    fn test_invalid_port_reference() {
        let link = LinkConfig::new("decoder.", "mux.sink_0");
        assert!(matches!(
            link.source(),
            Err(PipelineError::InvalidConfiguration { .. })
        ));
    }
}
