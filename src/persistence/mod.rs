//! Persistence Module
//!
//! Durable storage for workflow definitions, executions and step executions.
//! The engine only needs atomic per-entity upserts and read-your-writes
//! consistency, so any backend implementing [`PersistenceGateway`] can be
//! plugged in.
//!
//! - [`memory`]: In-process store backed by concurrent maps
//! - [`file`]: JSON-file store rooted in a state directory

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::execution::record::{StepExecution, WorkflowExecution};
use crate::workflow::model::WorkflowDefinition;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage contract used by the service and the execution engine.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Upserts a workflow definition by ID.
    async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), PersistenceError>;

    async fn get_definition(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>, PersistenceError>;

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, PersistenceError>;

    /// Upserts an execution by ID.
    async fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), PersistenceError>;

    async fn get_execution(&self, execution_id: &str) -> Result<Option<WorkflowExecution>, PersistenceError>;

    /// Executions of one workflow, most recent `start_time` first, at most `limit`.
    async fn list_executions(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, PersistenceError>;

    /// Upserts a step execution by ID.
    async fn save_step_execution(&self, step: &StepExecution) -> Result<(), PersistenceError>;

    /// Step executions of one workflow execution, oldest `start_time` first.
    async fn list_step_executions(&self, execution_id: &str) -> Result<Vec<StepExecution>, PersistenceError>;
}

/// Orders executions newest first and truncates to `limit`.
pub(crate) fn newest_first(mut executions: Vec<WorkflowExecution>, limit: usize) -> Vec<WorkflowExecution> {
    executions.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| b.execution_id.cmp(&a.execution_id))
    });
    executions.truncate(limit);
    executions
}

/// Orders step executions oldest first.
pub(crate) fn oldest_first(mut steps: Vec<StepExecution>) -> Vec<StepExecution> {
    steps.sort_by(|a, b| a.start_time.cmp(&b.start_time));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Context;
    use chrono::Duration;

    #[test]
    fn test_newest_first_orders_and_truncates() {
        let mut old = WorkflowExecution::new("w", Context::new());
        old.start_time -= Duration::seconds(10);
        let new = WorkflowExecution::new("w", Context::new());
        let new_id = new.execution_id.clone();

        let ordered = newest_first(vec![old, new], 1);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].execution_id, new_id);
    }
}
