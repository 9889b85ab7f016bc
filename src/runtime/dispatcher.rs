/// Node dispatcher
///
/// Decides per node whether it writes a literal value straight into the
/// execution context (passive kinds) or becomes a job for the worker pool
/// (active kinds), and resolves the inputs an active node's job needs from
/// its incoming edges.

use crate::runtime::context::{ExecutionContext, NodeOutput};
use crate::runtime::tasks::{
    CropImagePayload, ExtractFramePayload, GenerateTextPayload, TaskRequest,
};
use crate::workflow::types::{
    Edge, Node, NodeKind, Port, DEFAULT_LLM_MODEL, DEFAULT_LLM_PROMPT,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Prefix put in front of each system-context part when several contribute
const SYSTEM_CONTEXT_PREFIX: &str = "[System Context]: ";

/// A required input could not be resolved; the node fails without a job
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("No input image")]
    MissingImage,

    #[error("No input video")]
    MissingVideo,

    #[error("{0} nodes only supply values and cannot be executed")]
    NotExecutable(&'static str),
}

/// Inputs gathered for one active node
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedInputs {
    /// Value of the `prompt` port; the last resolved edge wins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Values arriving on `system-prompt`, in edge order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system_parts: Vec<String>,
    /// Image URLs ordered by port slot
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// First resolved video reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
}

/// Explicit inputs for single-node execution, in place of upstream edges
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInputs {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub video_url: Option<String>,
}

impl From<NodeInputs> for ResolvedInputs {
    fn from(inputs: NodeInputs) -> Self {
        Self {
            prompt: inputs.prompt,
            system_parts: inputs.system_prompt.into_iter().collect(),
            images: inputs.image_urls,
            video: inputs.video_url,
        }
    }
}

/// What the run controller should do with a node
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Literal value to record right away; `None` when the source is empty
    Passive(Option<NodeOutput>),
    /// Job to submit, with the input snapshot for its execution record
    Active { request: TaskRequest, snapshot: Value },
    /// Active node whose inputs are missing; fails locally
    Rejected { error: InputError, snapshot: Value },
}

/// Route a node's incoming edges by target port
///
/// Edges whose source produced nothing (yet) or whose port does not parse
/// are skipped.
pub fn resolve_inputs(node_id: &str, edges: &[Edge], ctx: &ExecutionContext) -> ResolvedInputs {
    let mut resolved = ResolvedInputs::default();
    let mut slotted: Vec<(usize, &[String])> = Vec::new();

    for edge in edges.iter().filter(|e| e.target == node_id) {
        let Some(output) = ctx.get(&edge.source) else {
            continue;
        };
        let Ok(port) = edge.target_port.parse::<Port>() else {
            tracing::warn!("⚠️ Edge into '{}' uses unknown port '{}'", node_id, edge.target_port);
            continue;
        };

        match port {
            Port::Prompt => {
                if let Some(text) = output.as_text() {
                    resolved.prompt = Some(text.to_string());
                }
            }
            Port::SystemPrompt => {
                if let Some(text) = output.as_text() {
                    resolved.system_parts.push(text.to_string());
                }
            }
            Port::Image(_) | Port::ImageUrl => {
                let urls = output.image_urls();
                if !urls.is_empty() {
                    slotted.push((port.image_slot().unwrap_or(0), urls));
                }
            }
            Port::VideoUrl => {
                if resolved.video.is_none() {
                    resolved.video = output.as_video().map(str::to_string);
                }
            }
        }
    }

    // stable: edges sharing a slot keep their edge order
    slotted.sort_by_key(|(slot, _)| *slot);
    resolved.images = slotted
        .into_iter()
        .flat_map(|(_, urls)| urls.iter().cloned())
        .collect();

    resolved
}

/// Join system-context parts into one string
///
/// A single part is used verbatim; several are each prefixed and separated
/// by a blank line.
pub fn compose_system_prompt(parts: &[String]) -> Option<String> {
    match parts {
        [] => None,
        [only] => Some(only.clone()),
        many => Some(
            many.iter()
                .map(|part| format!("{}{}", SYSTEM_CONTEXT_PREFIX, part))
                .collect::<Vec<_>>()
                .join("\n\n"),
        ),
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty()).cloned()
}

/// Build the job for an active node, falling back to its configuration for
/// inputs no edge supplied
pub fn build_request(node: &Node, inputs: ResolvedInputs) -> Result<TaskRequest, InputError> {
    match &node.kind {
        NodeKind::Llm(config) => {
            let prompt = non_empty(inputs.prompt.as_ref())
                .or_else(|| non_empty(config.prompt.as_ref()))
                .unwrap_or_else(|| DEFAULT_LLM_PROMPT.to_string());

            let mut parts: Vec<String> = non_empty(config.system_instruction.as_ref())
                .into_iter()
                .collect();
            parts.extend(inputs.system_parts);

            Ok(TaskRequest::GenerateText(GenerateTextPayload {
                prompt,
                system_prompt: compose_system_prompt(&parts),
                image_urls: inputs.images,
                model: non_empty(config.model.as_ref())
                    .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
                temperature: config.temperature,
            }))
        }
        NodeKind::Crop(config) => {
            let image_url = inputs
                .images
                .into_iter()
                .next()
                .or_else(|| non_empty(config.image_url.as_ref()))
                .ok_or(InputError::MissingImage)?;

            Ok(TaskRequest::CropImage(CropImagePayload {
                image_url,
                x_percent: config.x_percent,
                y_percent: config.y_percent,
                width_percent: config.width_percent,
                height_percent: config.height_percent,
            }))
        }
        NodeKind::ExtractFrame(config) => {
            let video_url = inputs
                .video
                .or_else(|| non_empty(config.video_url.as_ref()))
                .ok_or(InputError::MissingVideo)?;

            Ok(TaskRequest::ExtractFrame(ExtractFramePayload {
                video_url,
                timestamp: config.timestamp.clone(),
            }))
        }
        NodeKind::Text(_) | NodeKind::ImageSource(_) | NodeKind::VideoSource(_) => {
            Err(InputError::NotExecutable(node.kind.name()))
        }
    }
}

/// Literal value of a passive node
pub fn passive_value(kind: &NodeKind) -> Option<NodeOutput> {
    match kind {
        NodeKind::Text(config) => Some(NodeOutput::Text(config.text.clone())),
        NodeKind::ImageSource(config) => non_empty(config.url.as_ref())
            .map(|url| NodeOutput::Images(vec![url])),
        NodeKind::VideoSource(config) => non_empty(config.url.as_ref()).map(NodeOutput::Video),
        NodeKind::Llm(_) | NodeKind::Crop(_) | NodeKind::ExtractFrame(_) => None,
    }
}

/// Decide how to run `node` given the outputs recorded so far
pub fn prepare(node: &Node, edges: &[Edge], ctx: &ExecutionContext) -> Dispatch {
    if node.kind.is_passive() {
        return Dispatch::Passive(passive_value(&node.kind));
    }
    let inputs = resolve_inputs(&node.id, edges, ctx);
    prepare_with(node, inputs)
}

/// [`prepare`] with inputs supplied by the caller
pub fn prepare_with(node: &Node, inputs: ResolvedInputs) -> Dispatch {
    let fallback_snapshot = json!({
        "config": node.kind.config_json(),
        "inputs": serde_json::to_value(&inputs).unwrap_or(Value::Null),
    });

    match build_request(node, inputs) {
        Ok(request) => {
            let snapshot = request.payload();
            Dispatch::Active { request, snapshot }
        }
        Err(error) => Dispatch::Rejected {
            error,
            snapshot: fallback_snapshot,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{
        CropConfig, ExtractFrameConfig, FrameTimestamp, LlmConfig, MediaSourceConfig, TextConfig,
    };

    fn ctx(entries: &[(&str, NodeOutput)]) -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        for (id, output) in entries {
            ctx.record(id, output.clone()).unwrap();
        }
        ctx
    }

    fn llm(config: LlmConfig) -> Node {
        Node::new("llm", NodeKind::Llm(config))
    }

    #[test]
    fn prompt_port_takes_the_last_value() {
        let ctx = ctx(&[
            ("a", NodeOutput::Text("first".into())),
            ("b", NodeOutput::Text("second".into())),
        ]);
        let edges = vec![Edge::new("a", "llm", "prompt"), Edge::new("b", "llm", "prompt")];
        let inputs = resolve_inputs("llm", &edges, &ctx);
        assert_eq!(inputs.prompt.as_deref(), Some("second"));
    }

    #[test]
    fn images_follow_port_slot_order() {
        let ctx = ctx(&[
            ("i2", NodeOutput::Images(vec!["two.png".into()])),
            ("i0", NodeOutput::Images(vec!["zero.png".into()])),
            ("i1", NodeOutput::Images(vec!["one-a.png".into(), "one-b.png".into()])),
        ]);
        let edges = vec![
            Edge::new("i2", "llm", "image-2"),
            Edge::new("i0", "llm", "image-0"),
            Edge::new("i1", "llm", "image-1"),
        ];
        let inputs = resolve_inputs("llm", &edges, &ctx);
        assert_eq!(inputs.images, vec!["zero.png", "one-a.png", "one-b.png", "two.png"]);
    }

    #[test]
    fn unresolved_sources_and_foreign_edges_are_skipped() {
        let ctx = ctx(&[("a", NodeOutput::Text("hi".into()))]);
        let edges = vec![
            Edge::new("missing", "llm", "prompt"),
            Edge::new("a", "other", "prompt"),
            Edge::new("a", "llm", "bogus"),
        ];
        assert_eq!(resolve_inputs("llm", &edges, &ctx), ResolvedInputs::default());
    }

    #[test]
    fn system_prompt_is_prefixed_only_when_shared() {
        assert_eq!(compose_system_prompt(&[]), None);
        assert_eq!(compose_system_prompt(&["be brief".into()]).as_deref(), Some("be brief"));
        assert_eq!(
            compose_system_prompt(&["be brief".into(), "use French".into()]).as_deref(),
            Some("[System Context]: be brief\n\n[System Context]: use French")
        );
    }

    #[test]
    fn llm_request_falls_back_to_config_then_defaults() {
        let bare = build_request(&llm(LlmConfig::default()), ResolvedInputs::default()).unwrap();
        match bare {
            TaskRequest::GenerateText(p) => {
                assert_eq!(p.prompt, DEFAULT_LLM_PROMPT);
                assert_eq!(p.model, DEFAULT_LLM_MODEL);
                assert_eq!(p.system_prompt, None);
            }
            other => panic!("unexpected request {:?}", other),
        }

        let configured = llm(LlmConfig {
            model: Some("gemini-1.5-pro".into()),
            prompt: Some("Summarize".into()),
            system_instruction: Some("You are terse".into()),
            temperature: Some(0.2),
        });
        let inputs = ResolvedInputs {
            prompt: None,
            system_parts: vec!["Product copy".into()],
            ..Default::default()
        };
        match build_request(&configured, inputs).unwrap() {
            TaskRequest::GenerateText(p) => {
                assert_eq!(p.prompt, "Summarize");
                assert_eq!(p.model, "gemini-1.5-pro");
                assert_eq!(p.temperature, Some(0.2));
                assert_eq!(
                    p.system_prompt.as_deref(),
                    Some("[System Context]: You are terse\n\n[System Context]: Product copy")
                );
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn crop_and_extract_require_media() {
        let crop = Node::new("c", NodeKind::Crop(CropConfig::default()));
        assert_eq!(
            build_request(&crop, ResolvedInputs::default()).unwrap_err(),
            InputError::MissingImage
        );

        let extract = Node::new("x", NodeKind::ExtractFrame(ExtractFrameConfig::default()));
        assert_eq!(
            build_request(&extract, ResolvedInputs::default()).unwrap_err(),
            InputError::MissingVideo
        );

        let configured = Node::new(
            "x",
            NodeKind::ExtractFrame(ExtractFrameConfig {
                video_url: Some("clip.mp4".into()),
                timestamp: FrameTimestamp::Expression("50%".into()),
            }),
        );
        assert_eq!(
            build_request(&configured, ResolvedInputs::default()).unwrap(),
            TaskRequest::ExtractFrame(ExtractFramePayload {
                video_url: "clip.mp4".into(),
                timestamp: FrameTimestamp::Expression("50%".into()),
            })
        );
    }

    #[test]
    fn edge_input_wins_over_configured_image() {
        let crop = Node::new(
            "c",
            NodeKind::Crop(CropConfig {
                image_url: Some("configured.png".into()),
                ..CropConfig::default()
            }),
        );
        let ctx = ctx(&[("img", NodeOutput::Images(vec!["edge.png".into()]))]);
        let edges = vec![Edge::new("img", "c", "image_url")];
        match prepare(&crop, &edges, &ctx) {
            Dispatch::Active { request, snapshot } => {
                assert_eq!(request.task_id(), "crop-image");
                assert_eq!(snapshot["imageUrl"], "edge.png");
            }
            other => panic!("unexpected dispatch {:?}", other),
        }
    }

    #[test]
    fn passive_nodes_supply_literals() {
        let text = Node::new("t", NodeKind::Text(TextConfig { text: "hi".into() }));
        assert_eq!(
            prepare(&text, &[], &ExecutionContext::new()),
            Dispatch::Passive(Some(NodeOutput::Text("hi".into())))
        );

        let empty_image = Node::new("i", NodeKind::ImageSource(MediaSourceConfig { url: None }));
        assert_eq!(prepare(&empty_image, &[], &ExecutionContext::new()), Dispatch::Passive(None));

        let video = Node::new(
            "v",
            NodeKind::VideoSource(MediaSourceConfig { url: Some("v.mp4".into()) }),
        );
        assert_eq!(
            prepare(&video, &[], &ExecutionContext::new()),
            Dispatch::Passive(Some(NodeOutput::Video("v.mp4".into())))
        );
    }

    #[test]
    fn missing_input_is_rejected_with_snapshot() {
        let crop = Node::new("c", NodeKind::Crop(CropConfig::default()));
        match prepare(&crop, &[], &ExecutionContext::new()) {
            Dispatch::Rejected { error, snapshot } => {
                assert_eq!(error.to_string(), "No input image");
                assert_eq!(snapshot["config"]["width_percent"], 100.0);
            }
            other => panic!("unexpected dispatch {:?}", other),
        }
    }

    #[test]
    fn explicit_inputs_convert_to_resolved() {
        let inputs: ResolvedInputs = NodeInputs {
            prompt: Some("p".into()),
            system_prompt: Some("s".into()),
            image_urls: vec!["a.png".into()],
            video_url: None,
        }
        .into();
        assert_eq!(inputs.system_parts, vec!["s"]);
        assert_eq!(inputs.images, vec!["a.png"]);
    }
}
