//! Workflow Service
//!
//! Public facade over definitions, the execution engine and the store.
//! All calls return promptly: `execute_workflow` enqueues and returns the
//! execution ID, and outcomes are observed by polling status or history.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bimflow::config::EngineConfig;
//! use bimflow::handlers::builtin_registry;
//! use bimflow::persistence::MemoryStore;
//! use bimflow::service::WorkflowService;
//! use bimflow::workflow::{templates, Context};
//!
//! # async fn run() -> bimflow::Result<()> {
//! let service = WorkflowService::start(
//!     EngineConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     builtin_registry(),
//! )
//! .await?;
//!
//! let workflow_id = service.create_workflow(templates::bim_export()).await?;
//! let execution_id = service.execute_workflow(&workflow_id, Context::new()).await?;
//! let outcome = service.wait_for_outcome(&execution_id).await?;
//! println!("{} -> {}", outcome.execution_id, outcome.status);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::error::{DefinitionError, Result, WorkflowError};
use crate::execution::engine::ExecutionEngine;
use crate::execution::handler::HandlerRegistry;
use crate::execution::record::{
    ExecutionSnapshot, ExecutionStatus, StepExecution, WorkflowExecution,
};
use crate::monitoring::{EngineMetrics, MetricsSnapshot};
use crate::persistence::{FileStore, MemoryStore, PersistenceGateway};
use crate::workflow::model::{Context, WorkflowDefinition, WorkflowType};
use crate::workflow::templates::default_templates;
use crate::workflow::validator::validate_definition;

/// Polls spent waiting for a scheduled retry to appear in history.
const RETRY_LOOKUP_POLLS: usize = 50;

/// Listing entry returned by [`WorkflowService::list_workflows`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub name: String,
    pub description: String,
    pub workflow_type: WorkflowType,
    pub steps_count: usize,
    pub timeout: u64,
    pub max_retries: u32,
    pub schedule: Option<String>,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(definition: &WorkflowDefinition) -> Self {
        Self {
            workflow_id: definition.id.clone(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            workflow_type: definition.workflow_type,
            steps_count: definition.steps.len(),
            timeout: definition.timeout,
            max_retries: definition.max_retries,
            schedule: definition.schedule.clone(),
        }
    }
}

/// Facade for creating, running and inspecting workflows.
pub struct WorkflowService {
    config: EngineConfig,
    store: Arc<dyn PersistenceGateway>,
    definitions: DashMap<String, Arc<WorkflowDefinition>>,
    /// Serializes `create_workflow` so the index only holds saved definitions
    creating: Mutex<()>,
    engine: ExecutionEngine,
    metrics: Arc<EngineMetrics>,
}

impl WorkflowService {
    /// Starts the engine on `store` and loads the stored definitions.
    ///
    /// Executions a previous process left PENDING are re-queued; ones left
    /// RUNNING were interrupted mid-step and are marked FAILED.
    pub async fn start(
        config: EngineConfig,
        store: Arc<dyn PersistenceGateway>,
        registry: HandlerRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new());
        let engine = ExecutionEngine::start(
            store.clone(),
            Arc::new(registry),
            config.workers,
            metrics.clone(),
        );

        let definitions = DashMap::new();
        for definition in store.list_definitions().await? {
            definitions.insert(definition.id.clone(), Arc::new(definition));
        }
        if !definitions.is_empty() {
            info!("Loaded {} stored workflow definitions", definitions.len());
        }

        let service = Self {
            config,
            store,
            definitions,
            creating: Mutex::new(()),
            engine,
            metrics,
        };

        service.recover().await?;

        if service.config.load_templates {
            for template in default_templates() {
                service.create_workflow(template).await?;
            }
        }

        Ok(service)
    }

    /// Starts with the store selected by `config.state_dir`: a JSON file
    /// store when set, in-memory otherwise.
    pub async fn from_config(config: EngineConfig, registry: HandlerRegistry) -> Result<Self> {
        let store: Arc<dyn PersistenceGateway> = match &config.state_dir {
            Some(dir) => Arc::new(FileStore::open(dir.clone()).await?),
            None => Arc::new(MemoryStore::new()),
        };
        Self::start(config, store, registry).await
    }

    async fn recover(&self) -> Result<()> {
        let workflow_ids: Vec<String> = self.definitions.iter().map(|d| d.key().clone()).collect();

        for workflow_id in workflow_ids {
            let mut executions = self.store.list_executions(&workflow_id, usize::MAX).await?;
            executions.reverse();

            for mut execution in executions {
                match execution.status {
                    ExecutionStatus::Pending => self.engine.resume(&execution.execution_id)?,
                    ExecutionStatus::Running => {
                        warn!(
                            "Execution '{}' was interrupted while running; marking failed",
                            execution.execution_id
                        );
                        execution.transition(ExecutionStatus::Failed);
                        execution.error = Some("Interrupted by engine restart".to_string());
                        self.store.save_execution(&execution).await?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Validates, persists and indexes a definition; returns its ID.
    ///
    /// Definitions are immutable: registering a different definition under
    /// an existing ID fails, re-registering an identical one is a no-op.
    pub async fn create_workflow(&self, definition: WorkflowDefinition) -> Result<String> {
        validate_definition(&definition)?;
        let workflow_id = definition.id.clone();

        let _creating = self.creating.lock().await;

        if let Some(existing) = self.definitions.get(&workflow_id) {
            if **existing == definition {
                return Ok(workflow_id);
            }
            return Err(DefinitionError::AlreadyExists(workflow_id).into());
        }

        // Only a persisted definition becomes visible to execute_workflow
        self.store.save_definition(&definition).await?;
        self.definitions
            .insert(workflow_id.clone(), Arc::new(definition.clone()));

        self.metrics.record_definition();
        info!(
            "Created workflow '{}' ({} steps)",
            workflow_id,
            definition.steps.len()
        );
        Ok(workflow_id)
    }

    /// Enqueues a new execution and returns its ID without waiting.
    pub async fn execute_workflow(&self, workflow_id: &str, context: Context) -> Result<String> {
        if !self.definitions.contains_key(workflow_id) {
            return Err(DefinitionError::UnknownWorkflow(workflow_id.to_string()).into());
        }
        self.engine
            .submit(WorkflowExecution::new(workflow_id, context))
            .await
    }

    /// Cancels a PENDING or RUNNING execution; false for terminal or unknown IDs.
    pub async fn cancel_workflow(&self, execution_id: &str) -> Result<bool> {
        self.engine.cancel(execution_id).await
    }

    pub async fn get_workflow_status(&self, execution_id: &str) -> Result<ExecutionSnapshot> {
        self.get_execution(execution_id).await.map(|e| e.snapshot())
    }

    /// Full execution record including context and step results.
    pub async fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecution> {
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Executions of a workflow, most recent first, at most `limit`.
    pub async fn get_workflow_history(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>> {
        Ok(self.store.list_executions(workflow_id, limit).await?)
    }

    /// Step records of one execution, oldest first.
    pub async fn list_step_executions(&self, execution_id: &str) -> Result<Vec<StepExecution>> {
        Ok(self.store.list_step_executions(execution_id).await?)
    }

    /// Registered workflows sorted by ID.
    pub fn list_workflows(&self) -> Vec<WorkflowSummary> {
        let mut summaries: Vec<WorkflowSummary> = self
            .definitions
            .iter()
            .map(|d| WorkflowSummary::from(d.value().as_ref()))
            .collect();
        summaries.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        summaries
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(workflow_id).map(|d| d.value().clone())
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.active_workflows = self.definitions.len();
        snapshot
    }

    /// Polls until the execution reaches a terminal state.
    pub async fn wait_for_terminal(&self, execution_id: &str) -> Result<WorkflowExecution> {
        loop {
            let execution = self.get_execution(execution_id).await?;
            if execution.status.is_terminal() {
                return Ok(execution);
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Waits for an execution and follows its automatic retries until the
    /// last attempt reaches a terminal state.
    pub async fn wait_for_outcome(&self, execution_id: &str) -> Result<WorkflowExecution> {
        let mut current = execution_id.to_string();

        loop {
            let execution = self.wait_for_terminal(&current).await?;
            if execution.status != ExecutionStatus::Failed {
                return Ok(execution);
            }

            let max_retries = self
                .get_workflow(&execution.workflow_id)
                .map_or(0, |d| d.max_retries);
            if execution.retry_count() >= max_retries {
                return Ok(execution);
            }

            match self.find_retry(&execution).await? {
                Some(next) => {
                    info!("Following retry '{}' of '{}'", next, current);
                    current = next;
                }
                None => return Ok(execution),
            }
        }
    }

    async fn find_retry(&self, failed: &WorkflowExecution) -> Result<Option<String>> {
        for _ in 0..RETRY_LOOKUP_POLLS {
            let history = self
                .store
                .list_executions(&failed.workflow_id, usize::MAX)
                .await?;
            let retry = history
                .into_iter()
                .find(|e| e.retry_of() == Some(failed.execution_id.as_str()));
            if let Some(retry) = retry {
                return Ok(Some(retry.execution_id));
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
        Ok(None)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stops the engine after in-flight executions finish.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}
