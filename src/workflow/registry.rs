/// Hot-reload workflow registry using ArcSwap
///
/// Provides lock-free, atomic updates to the in-memory workflow registry.
/// Each update swaps the entire map pointer, so runs that already hold a
/// workflow snapshot keep executing against it undisturbed.

use crate::workflow::{storage::WorkflowStorage, types::Workflow, validator::validate_workflow};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Lock-free workflow registry
///
/// Only workflows whose edges all pass connection validation are admitted,
/// so every snapshot handed to the execution engine is a valid DAG.
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Key: workflow_id, Value: immutable workflow snapshot
    workflows: ArcSwap<HashMap<String, Arc<Workflow>>>,

    /// Reference to persistent storage for reload operations
    storage: WorkflowStorage,
}

impl WorkflowRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Initialize registry by loading all workflows from storage
    ///
    /// Stored workflows that no longer validate are skipped with a warning
    /// rather than preventing startup.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored_workflows = self.storage.load_all_workflows().await?;

        let mut admitted = HashMap::new();
        for (id, workflow) in stored_workflows {
            match validate_workflow(&workflow) {
                Ok(()) => {
                    admitted.insert(id, Arc::new(workflow));
                }
                Err(e) => tracing::warn!("⚠️ Not loading invalid workflow '{}': {}", id, e),
            }
        }

        self.workflows.store(Arc::new(admitted));

        tracing::info!(
            "Initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );

        Ok(())
    }

    /// Hot-reload a single workflow from storage
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<()> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;

        validate_workflow(&workflow)
            .map_err(|e| anyhow::anyhow!("Workflow '{}' is invalid: {}", workflow_id, e))?;

        let current = self.workflows.load();
        let mut new_registry = (**current).clone();
        new_registry.insert(workflow_id.to_string(), Arc::new(workflow));
        self.workflows.store(Arc::new(new_registry));

        tracing::info!("Hot-reloaded workflow: {}", workflow_id);

        Ok(())
    }

    /// Get a workflow snapshot by ID (lock-free read)
    pub fn get_workflow(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// List all active workflow IDs
    pub fn list_workflow_ids(&self) -> Vec<String> {
        self.workflows.load().keys().cloned().collect()
    }

    /// Remove a workflow from registry
    pub fn remove_workflow(&self, workflow_id: &str) {
        let current = self.workflows.load();
        let mut new_registry = (**current).clone();

        if new_registry.remove(workflow_id).is_some() {
            self.workflows.store(Arc::new(new_registry));
            tracing::info!("Removed workflow from registry: {}", workflow_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_memory_pool;
    use crate::workflow::types::{Edge, LlmConfig, Node, NodeKind, TextConfig};

    fn workflow(edges: Vec<Edge>) -> Workflow {
        Workflow {
            id: "wf".into(),
            name: "registry".into(),
            nodes: vec![
                Node::new("t", NodeKind::Text(TextConfig { text: "hi".into() })),
                Node::new("l", NodeKind::Llm(LlmConfig::default())),
            ],
            edges,
        }
    }

    #[tokio::test]
    async fn reload_admits_valid_and_rejects_invalid() {
        let storage = WorkflowStorage::new(open_memory_pool().await.unwrap());
        let registry = WorkflowRegistry::new(storage.clone());

        storage
            .save_workflow(&workflow(vec![Edge::new("t", "l", "prompt")]))
            .await
            .unwrap();
        registry.reload_workflow("wf").await.unwrap();
        assert_eq!(registry.get_workflow("wf").unwrap().edges.len(), 1);

        storage
            .save_workflow(&workflow(vec![Edge::new("l", "t", "prompt")]))
            .await
            .unwrap();
        assert!(registry.reload_workflow("wf").await.is_err());
        // previous snapshot stays in place
        assert_eq!(registry.get_workflow("wf").unwrap().edges[0].source, "t");

        registry.remove_workflow("wf");
        assert!(registry.get_workflow("wf").is_none());
        assert!(registry.list_workflow_ids().is_empty());
    }

    #[tokio::test]
    async fn init_skips_invalid_stored_workflows() {
        let storage = WorkflowStorage::new(open_memory_pool().await.unwrap());
        storage
            .save_workflow(&workflow(vec![Edge::new("t", "t", "prompt")]))
            .await
            .unwrap();

        let registry = WorkflowRegistry::new(storage);
        registry.init_from_storage().await.unwrap();
        assert!(registry.get_workflow("wf").is_none());
    }
}
