//! In-Memory Store
//!
//! Arena-plus-index store: records live in sharded concurrent maps keyed by
//! ID, with secondary indices from workflow ID to executions and from
//! execution ID to step executions. Writes to unrelated executions never
//! contend on the same shard lock for long.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::PersistenceError;
use crate::execution::record::{StepExecution, WorkflowExecution};
use crate::workflow::model::WorkflowDefinition;

use super::{newest_first, oldest_first, PersistenceGateway};

/// Volatile store, suitable for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    definitions: DashMap<String, WorkflowDefinition>,
    executions: DashMap<String, WorkflowExecution>,
    steps: DashMap<String, StepExecution>,
    executions_by_workflow: DashMap<String, Vec<String>>,
    steps_by_execution: DashMap<String, Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored executions across all workflows.
    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), PersistenceError> {
        self.definitions
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn get_definition(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>, PersistenceError> {
        Ok(self.definitions.get(workflow_id).map(|d| d.value().clone()))
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, PersistenceError> {
        let mut definitions: Vec<_> = self.definitions.iter().map(|d| d.value().clone()).collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(definitions)
    }

    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), PersistenceError> {
        let previous = self
            .executions
            .insert(execution.execution_id.clone(), execution.clone());

        if previous.is_none() {
            self.executions_by_workflow
                .entry(execution.workflow_id.clone())
                .or_default()
                .push(execution.execution_id.clone());
        }
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<WorkflowExecution>, PersistenceError> {
        Ok(self.executions.get(execution_id).map(|e| e.value().clone()))
    }

    async fn list_executions(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, PersistenceError> {
        let ids = self
            .executions_by_workflow
            .get(workflow_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        let executions = ids
            .iter()
            .filter_map(|id| self.executions.get(id).map(|e| e.value().clone()))
            .collect();

        Ok(newest_first(executions, limit))
    }

    async fn save_step_execution(&self, step: &StepExecution) -> Result<(), PersistenceError> {
        let previous = self
            .steps
            .insert(step.step_execution_id.clone(), step.clone());

        if previous.is_none() {
            self.steps_by_execution
                .entry(step.workflow_execution_id.clone())
                .or_default()
                .push(step.step_execution_id.clone());
        }
        Ok(())
    }

    async fn list_step_executions(&self, execution_id: &str) -> Result<Vec<StepExecution>, PersistenceError> {
        let ids = self
            .steps_by_execution
            .get(execution_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        let steps = ids
            .iter()
            .filter_map(|id| self.steps.get(id).map(|s| s.value().clone()))
            .collect();

        Ok(oldest_first(steps))
    }
}
