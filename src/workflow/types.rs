/// Core workflow type definitions
///
/// Defines workflows, nodes, edges and target ports. These types are
/// serialized/deserialized from JSON for persistence and the HTTP API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model used by LLM nodes that do not pick one explicitly
pub const DEFAULT_LLM_MODEL: &str = "gemini-1.5-flash";

/// Prompt used by LLM nodes with neither a connected nor a configured prompt
pub const DEFAULT_LLM_PROMPT: &str = "Analyze this.";

/// A complete workflow definition containing nodes and their connections
///
/// Workflows are stored as JSON in SQLite and planned into dependency
/// layers at the start of every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-product-shots")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// List of nodes in this workflow
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// List of edges connecting nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A single node in the workflow DAG
///
/// The node definition is never mutated by execution; produced values live
/// in the run's execution context and in the persisted execution records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow
    pub id: String,
    /// Kind plus kind-specific configuration, tagged by `"type"`
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self { id: id.into(), kind }
    }
}

/// Available node kinds
///
/// Passive kinds only supply a literal value; active kinds run a job on the
/// external worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeKind {
    /// Literal text
    /// Expected config: { "text": "a red bicycle" }
    Text(TextConfig),

    /// Uploaded or linked image
    /// Expected config: { "url": "https://cdn.example.com/a.png" }
    ImageSource(MediaSourceConfig),

    /// Uploaded or linked video
    /// Expected config: { "url": "https://cdn.example.com/a.mp4" }
    VideoSource(MediaSourceConfig),

    /// LLM text generation (`generate-text` task)
    /// Expected config: { "model": "...", "prompt": "...", "system_instruction": "...", "temperature": 0.7 }
    Llm(LlmConfig),

    /// Percentage-based image crop (`crop-image` task)
    /// Expected config: { "x_percent": 10, "y_percent": 10, "width_percent": 50, "height_percent": 50 }
    Crop(CropConfig),

    /// Single frame extraction from a video (`extract-frame` task)
    /// Expected config: { "timestamp": 3.5 } or { "timestamp": "50%" }
    ExtractFrame(ExtractFrameConfig),
}

/// Output medium a node kind emits, and a port accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Text,
    Image,
    Video,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Medium::Text => write!(f, "text"),
            Medium::Image => write!(f, "image"),
            Medium::Video => write!(f, "video"),
        }
    }
}

impl NodeKind {
    /// Stable kind name, as used in JSON and persisted records
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Text(_) => "text",
            NodeKind::ImageSource(_) => "image-source",
            NodeKind::VideoSource(_) => "video-source",
            NodeKind::Llm(_) => "llm",
            NodeKind::Crop(_) => "crop",
            NodeKind::ExtractFrame(_) => "extract-frame",
        }
    }

    pub fn is_passive(&self) -> bool {
        matches!(
            self,
            NodeKind::Text(_) | NodeKind::ImageSource(_) | NodeKind::VideoSource(_)
        )
    }

    /// Medium this kind produces for downstream nodes
    pub fn emits(&self) -> Medium {
        match self {
            NodeKind::Text(_) | NodeKind::Llm(_) => Medium::Text,
            NodeKind::ImageSource(_) | NodeKind::Crop(_) | NodeKind::ExtractFrame(_) => {
                Medium::Image
            }
            NodeKind::VideoSource(_) => Medium::Video,
        }
    }

    /// Whether a node of this kind exposes the given input port
    pub fn has_port(&self, port: Port) -> bool {
        match self {
            NodeKind::Llm(_) => matches!(port, Port::Prompt | Port::SystemPrompt | Port::Image(_)),
            NodeKind::Crop(_) => matches!(port, Port::ImageUrl | Port::Image(_)),
            NodeKind::ExtractFrame(_) => matches!(port, Port::VideoUrl),
            NodeKind::Text(_) | NodeKind::ImageSource(_) | NodeKind::VideoSource(_) => false,
        }
    }

    /// Kind-specific configuration as JSON, for input snapshots
    pub fn config_json(&self) -> serde_json::Value {
        let config = match self {
            NodeKind::Text(c) => serde_json::to_value(c),
            NodeKind::ImageSource(c) | NodeKind::VideoSource(c) => serde_json::to_value(c),
            NodeKind::Llm(c) => serde_json::to_value(c),
            NodeKind::Crop(c) => serde_json::to_value(c),
            NodeKind::ExtractFrame(c) => serde_json::to_value(c),
        };
        config.unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextConfig {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaSourceConfig {
    /// CDN or data URL; sources without one produce no value
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub model: Option<String>,
    /// Used when no `prompt` edge supplies one
    #[serde(default)]
    pub prompt: Option<String>,
    /// First contributor to the system context
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

fn full_percent() -> f64 {
    100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropConfig {
    /// Used when no image edge supplies one
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub x_percent: f64,
    #[serde(default)]
    pub y_percent: f64,
    #[serde(default = "full_percent")]
    pub width_percent: f64,
    #[serde(default = "full_percent")]
    pub height_percent: f64,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            image_url: None,
            x_percent: 0.0,
            y_percent: 0.0,
            width_percent: 100.0,
            height_percent: 100.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractFrameConfig {
    /// Used when no video edge supplies one
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub timestamp: FrameTimestamp,
}

/// Position of the frame to extract: seconds, or a string holding either a
/// number of seconds ("5.5") or a percentage of the duration ("50%")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameTimestamp {
    Seconds(f64),
    Expression(String),
}

impl Default for FrameTimestamp {
    fn default() -> Self {
        FrameTimestamp::Seconds(0.0)
    }
}

/// Connection between two nodes
///
/// Data flows from `source` into the `target_port` input of `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node ID
    pub source: String,
    /// Target node ID
    pub target: String,
    /// Target input port (e.g., "prompt", "system-prompt", "image-0", "video_url")
    pub target_port: String,
}

impl Edge {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            target_port: target_port.into(),
        }
    }
}

/// Parsed target port id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    /// `prompt`: user prompt of an LLM node
    Prompt,
    /// `system-prompt`: system context of an LLM node
    SystemPrompt,
    /// `image-N`: N-th image slot
    Image(usize),
    /// `image_url`: the single image input of a crop node
    ImageUrl,
    /// `video_url`: the single video input of a frame extraction node
    VideoUrl,
}

impl Port {
    /// Medium a producer must emit to connect to this port
    pub fn accepts(&self) -> Medium {
        match self {
            Port::Prompt | Port::SystemPrompt => Medium::Text,
            Port::Image(_) | Port::ImageUrl => Medium::Image,
            Port::VideoUrl => Medium::Video,
        }
    }

    /// Ordering key among image ports; `image_url` sorts as slot 0
    pub fn image_slot(&self) -> Option<usize> {
        match self {
            Port::Image(i) => Some(*i),
            Port::ImageUrl => Some(0),
            _ => None,
        }
    }
}

impl FromStr for Port {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prompt" => Ok(Port::Prompt),
            "system-prompt" => Ok(Port::SystemPrompt),
            "image_url" => Ok(Port::ImageUrl),
            "video_url" => Ok(Port::VideoUrl),
            other => other
                .strip_prefix("image-")
                .and_then(|n| n.parse::<usize>().ok())
                .map(Port::Image)
                .ok_or_else(|| format!("unknown port '{}'", other)),
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Prompt => write!(f, "prompt"),
            Port::SystemPrompt => write!(f, "system-prompt"),
            Port::Image(i) => write!(f, "image-{}", i),
            Port::ImageUrl => write!(f, "image_url"),
            Port::VideoUrl => write!(f, "video_url"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_json_is_flat_and_tagged_by_type() {
        let node: Node = serde_json::from_value(json!({
            "id": "crop-1",
            "type": "crop",
            "x_percent": 10.0,
            "width_percent": 50.0
        }))
        .unwrap();

        assert_eq!(node.kind.name(), "crop");
        match node.kind {
            NodeKind::Crop(cfg) => {
                assert_eq!(cfg.x_percent, 10.0);
                assert_eq!(cfg.y_percent, 0.0);
                assert_eq!(cfg.width_percent, 50.0);
                assert_eq!(cfg.height_percent, 100.0);
                assert!(cfg.image_url.is_none());
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn frame_timestamp_accepts_number_or_string() {
        let seconds: ExtractFrameConfig = serde_json::from_value(json!({ "timestamp": 2.5 })).unwrap();
        assert_eq!(seconds.timestamp, FrameTimestamp::Seconds(2.5));

        let pct: ExtractFrameConfig = serde_json::from_value(json!({ "timestamp": "50%" })).unwrap();
        assert_eq!(pct.timestamp, FrameTimestamp::Expression("50%".into()));

        let missing: ExtractFrameConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(missing.timestamp, FrameTimestamp::Seconds(0.0));
    }

    #[test]
    fn ports_parse_and_display_symmetrically() {
        for raw in ["prompt", "system-prompt", "image-0", "image-12", "image_url", "video_url"] {
            let port: Port = raw.parse().unwrap();
            assert_eq!(port.to_string(), raw);
        }
        assert!("image-".parse::<Port>().is_err());
        assert!("image-x".parse::<Port>().is_err());
        assert!("audio".parse::<Port>().is_err());
    }

    #[test]
    fn kinds_expose_only_their_ports() {
        let llm = NodeKind::Llm(LlmConfig::default());
        assert!(llm.has_port(Port::Prompt));
        assert!(llm.has_port(Port::Image(3)));
        assert!(!llm.has_port(Port::VideoUrl));

        let extract = NodeKind::ExtractFrame(ExtractFrameConfig::default());
        assert!(extract.has_port(Port::VideoUrl));
        assert!(!extract.has_port(Port::ImageUrl));

        let text = NodeKind::Text(TextConfig::default());
        assert!(!text.has_port(Port::Prompt));
        assert!(text.is_passive());
        assert_eq!(text.emits(), Medium::Text);
    }
}
