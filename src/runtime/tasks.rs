/// External task contract
///
/// Each active node kind maps to one task on the worker pool, identified by a
/// task id and a JSON payload. A triggered task eventually resolves to success
/// with its result payload, or to failure with an error message.

use crate::runtime::context::NodeOutput;
use crate::workflow::types::FrameTimestamp;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

/// `generate-text` payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTextPayload {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// `crop-image` payload; all geometry in percent of the source image
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CropImagePayload {
    pub image_url: String,
    pub x_percent: f64,
    pub y_percent: f64,
    pub width_percent: f64,
    pub height_percent: f64,
}

/// `extract-frame` payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractFramePayload {
    pub video_url: String,
    pub timestamp: FrameTimestamp,
}

/// A fully resolved job, ready to hand to a [`TaskBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRequest {
    GenerateText(GenerateTextPayload),
    CropImage(CropImagePayload),
    ExtractFrame(ExtractFramePayload),
}

impl TaskRequest {
    /// Task id on the worker pool
    pub fn task_id(&self) -> &'static str {
        match self {
            TaskRequest::GenerateText(_) => "generate-text",
            TaskRequest::CropImage(_) => "crop-image",
            TaskRequest::ExtractFrame(_) => "extract-frame",
        }
    }

    /// JSON payload sent to the worker, also stored as the input snapshot
    pub fn payload(&self) -> Value {
        let payload = match self {
            TaskRequest::GenerateText(p) => serde_json::to_value(p),
            TaskRequest::CropImage(p) => serde_json::to_value(p),
            TaskRequest::ExtractFrame(p) => serde_json::to_value(p),
        };
        payload.unwrap_or(Value::Null)
    }

    /// Turn a successful result payload into the value stored in the context
    ///
    /// Text tasks resolve to `{ "text": ... }` (a bare string is accepted too);
    /// image tasks resolve to `{ "url": ... }`.
    pub fn parse_output(&self, output: &Value) -> Result<NodeOutput, String> {
        match self {
            TaskRequest::GenerateText(_) => output
                .as_str()
                .or_else(|| output.get("text").and_then(Value::as_str))
                .map(|text| NodeOutput::Text(text.to_string()))
                .ok_or_else(|| format!("generate-text result has no text: {}", output)),
            TaskRequest::CropImage(_) | TaskRequest::ExtractFrame(_) => output
                .get("url")
                .and_then(Value::as_str)
                .map(|url| NodeOutput::Images(vec![url.to_string()]))
                .ok_or_else(|| format!("{} result has no url: {}", self.task_id(), output)),
        }
    }
}

/// Handle for a triggered task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    /// Worker-assigned run id
    pub id: String,
    pub task_id: &'static str,
}

/// Terminal state of a triggered task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(Value),
    Failed(String),
}

/// Trigger/resolve contract of the external worker pool
///
/// `trigger` only enqueues the job; `wait` resolves once it is terminal and
/// never errors (transport problems resolve as [`TaskOutcome::Failed`]).
pub trait TaskBackend: Send + Sync + 'static {
    fn trigger<'a>(&'a self, request: &'a TaskRequest) -> BoxFuture<'a, anyhow::Result<TaskHandle>>;

    fn wait<'a>(&'a self, handle: &'a TaskHandle) -> BoxFuture<'a, TaskOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payloads_are_camel_case_and_skip_empty_fields() {
        let request = TaskRequest::GenerateText(GenerateTextPayload {
            prompt: "Describe".into(),
            system_prompt: None,
            image_urls: vec![],
            model: "gemini-1.5-flash".into(),
            temperature: None,
        });
        assert_eq!(request.task_id(), "generate-text");
        assert_eq!(
            request.payload(),
            json!({"prompt": "Describe", "model": "gemini-1.5-flash"})
        );

        let crop = TaskRequest::CropImage(CropImagePayload {
            image_url: "a.png".into(),
            x_percent: 10.0,
            y_percent: 0.0,
            width_percent: 50.0,
            height_percent: 100.0,
        });
        assert_eq!(
            crop.payload(),
            json!({"imageUrl": "a.png", "xPercent": 10.0, "yPercent": 0.0, "widthPercent": 50.0, "heightPercent": 100.0})
        );

        let frame = TaskRequest::ExtractFrame(ExtractFramePayload {
            video_url: "v.mp4".into(),
            timestamp: FrameTimestamp::Expression("50%".into()),
        });
        assert_eq!(frame.payload(), json!({"videoUrl": "v.mp4", "timestamp": "50%"}));
    }

    #[test]
    fn outputs_are_read_from_result_payloads() {
        let text = TaskRequest::GenerateText(GenerateTextPayload {
            prompt: "p".into(),
            system_prompt: None,
            image_urls: vec![],
            model: "m".into(),
            temperature: None,
        });
        assert_eq!(
            text.parse_output(&json!({"success": true, "text": "hello"})),
            Ok(NodeOutput::Text("hello".into()))
        );
        assert_eq!(text.parse_output(&json!("bare")), Ok(NodeOutput::Text("bare".into())));
        assert!(text.parse_output(&json!({"url": "x"})).is_err());

        let frame = TaskRequest::ExtractFrame(ExtractFramePayload {
            video_url: "v".into(),
            timestamp: FrameTimestamp::default(),
        });
        assert_eq!(
            frame.parse_output(&json!({"url": "frame.png"})),
            Ok(NodeOutput::Images(vec!["frame.png".into()]))
        );
    }
}
