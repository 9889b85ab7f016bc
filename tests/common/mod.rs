//! Shared fixtures for integration tests.

#![allow(dead_code)]

use canvasflow::database::open_memory_pool;
use canvasflow::history::RunStorage;
use canvasflow::runtime::testing::ScriptedBackend;
use canvasflow::workflow::types::{
    CropConfig, Edge, ExtractFrameConfig, LlmConfig, MediaSourceConfig, Node, NodeKind,
    TextConfig, Workflow,
};
use canvasflow::ExecutionEngine;
use std::sync::Arc;
use std::time::Duration;

pub async fn engine_with(backend: Arc<ScriptedBackend>, trigger_timeout: Duration) -> ExecutionEngine {
    let pool = open_memory_pool().await.expect("in-memory database");
    ExecutionEngine::new(backend, RunStorage::new(pool), trigger_timeout)
}

pub async fn engine(backend: Arc<ScriptedBackend>) -> ExecutionEngine {
    engine_with(backend, Duration::from_secs(5)).await
}

pub fn workflow(nodes: Vec<Node>, edges: Vec<Edge>) -> Workflow {
    Workflow {
        id: "wf-test".into(),
        name: "test workflow".into(),
        nodes,
        edges,
    }
}

pub fn text(id: &str, value: &str) -> Node {
    Node::new(id, NodeKind::Text(TextConfig { text: value.into() }))
}

pub fn image(id: &str, url: &str) -> Node {
    Node::new(id, NodeKind::ImageSource(MediaSourceConfig { url: Some(url.into()) }))
}

pub fn video(id: &str, url: &str) -> Node {
    Node::new(id, NodeKind::VideoSource(MediaSourceConfig { url: Some(url.into()) }))
}

pub fn llm(id: &str) -> Node {
    Node::new(id, NodeKind::Llm(LlmConfig::default()))
}

pub fn crop(id: &str) -> Node {
    Node::new(id, NodeKind::Crop(CropConfig::default()))
}

pub fn extract(id: &str) -> Node {
    Node::new(id, NodeKind::ExtractFrame(ExtractFrameConfig::default()))
}
