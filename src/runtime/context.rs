/// Per-run execution context
///
/// Maps node ids to the value each produced. A node's output is written at
/// most once and never changes afterwards.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Value a node produced for downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum NodeOutput {
    /// Text from a text node or an LLM
    Text(String),
    /// One or more image URLs
    Images(Vec<String>),
    /// A video URL
    Video(String),
}

impl NodeOutput {
    /// Record form stored in `node_executions.output_data`
    pub fn to_record(&self) -> Value {
        match self {
            NodeOutput::Text(text) => json!({ "text": text }),
            NodeOutput::Images(urls) if urls.len() == 1 => json!({ "url": urls[0] }),
            NodeOutput::Images(urls) => json!({ "urls": urls }),
            NodeOutput::Video(url) => json!({ "url": url }),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            NodeOutput::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Image URLs carried by this output; empty for text and video
    pub fn image_urls(&self) -> &[String] {
        match self {
            NodeOutput::Images(urls) => urls,
            _ => &[],
        }
    }

    pub fn as_video(&self) -> Option<&str> {
        match self {
            NodeOutput::Video(url) => Some(url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("output for node '{0}' was already recorded")]
    AlreadyRecorded(String),
}

/// Outputs produced so far in one run
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    outputs: HashMap<String, NodeOutput>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the output of a node; a second write for the same id is refused
    pub fn record(&mut self, node_id: &str, output: NodeOutput) -> Result<(), ContextError> {
        if self.outputs.contains_key(node_id) {
            return Err(ContextError::AlreadyRecorded(node_id.to_string()));
        }
        self.outputs.insert(node_id.to_string(), output);
        Ok(())
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeOutput> {
        self.outputs.get(node_id)
    }

    pub fn into_outputs(self) -> HashMap<String, NodeOutput> {
        self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_are_write_once() {
        let mut ctx = ExecutionContext::new();
        ctx.record("t", NodeOutput::Text("first".into())).unwrap();

        let err = ctx.record("t", NodeOutput::Text("second".into())).unwrap_err();
        assert_eq!(err, ContextError::AlreadyRecorded("t".into()));
        assert_eq!(ctx.get("t").and_then(NodeOutput::as_text), Some("first"));
        assert_eq!(ctx.into_outputs().len(), 1);
    }

    #[test]
    fn record_form_matches_node_kind() {
        assert_eq!(NodeOutput::Text("hi".into()).to_record(), json!({"text": "hi"}));
        assert_eq!(
            NodeOutput::Images(vec!["a.png".into()]).to_record(),
            json!({"url": "a.png"})
        );
        assert_eq!(
            NodeOutput::Images(vec!["a.png".into(), "b.png".into()]).to_record(),
            json!({"urls": ["a.png", "b.png"]})
        );
    }

    #[test]
    fn serializes_with_type_tag() {
        let value = serde_json::to_value(NodeOutput::Video("v.mp4".into())).unwrap();
        assert_eq!(value, json!({"type": "video", "value": "v.mp4"}));
    }
}
