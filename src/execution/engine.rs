//! Workflow Execution Engine
//!
//! Owns the execution queue and a fixed pool of worker tasks:
//!
//! - Submitted executions are persisted as PENDING and their IDs pushed onto
//!   an unbounded FIFO queue shared by all workers.
//! - A worker runs the steps of one execution in definition order,
//!   persisting progress before each step.
//! - A failed required step fails the execution; the engine then schedules
//!   a workflow-level retry while `max_retries` allows.
//! - Cancellation is cooperative: the flag is checked before each step and
//!   before every save, under a per-execution lock shared with
//!   [`ExecutionEngine::cancel`], so a CANCELLED record is never overwritten.
//!
//! Distinct executions run concurrently; a single execution is only ever
//! touched by one worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{PersistenceError, Result, WorkflowError};
use crate::execution::handler::HandlerRegistry;
use crate::execution::record::{ExecutionStatus, WorkflowExecution};
use crate::execution::retry::RetryController;
use crate::execution::step::StepExecutor;
use crate::monitoring::EngineMetrics;
use crate::persistence::PersistenceGateway;
use crate::workflow::model::WorkflowDefinition;

/// Cancellation state for one live execution.
#[derive(Debug, Default)]
struct ExecutionHandle {
    cancelled: CancellationToken,
    /// Serializes record writes between the worker and cancel requests
    lock: AsyncMutex<()>,
}

/// How a run ended.
enum RunOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

struct EngineInner {
    store: Arc<dyn PersistenceGateway>,
    executor: StepExecutor,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: AsyncMutex<mpsc::UnboundedReceiver<String>>,
    handles: DashMap<String, Arc<ExecutionHandle>>,
    shutdown: CancellationToken,
    metrics: Arc<EngineMetrics>,
    busy_workers: AtomicUsize,
}

/// Worker pool executing queued workflow executions.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use bimflow::execution::{ExecutionEngine, HandlerRegistry};
/// use bimflow::execution::record::WorkflowExecution;
/// use bimflow::monitoring::EngineMetrics;
/// use bimflow::persistence::{MemoryStore, PersistenceGateway};
/// use bimflow::workflow::Context;
///
/// # async fn run() -> bimflow::Result<()> {
/// let store: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
/// let engine = ExecutionEngine::start(
///     store,
///     Arc::new(HandlerRegistry::new()),
///     4,
///     Arc::new(EngineMetrics::new()),
/// );
///
/// let id = engine.submit(WorkflowExecution::new("bim_validation", Context::new())).await?;
/// engine.cancel(&id).await?;
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionEngine {
    /// Starts `workers` worker tasks on the current Tokio runtime.
    pub fn start(
        store: Arc<dyn PersistenceGateway>,
        registry: Arc<HandlerRegistry>,
        workers: usize,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let workers = workers.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let executor = StepExecutor::new(registry, store.clone(), workers, metrics.clone());

        let inner = Arc::new(EngineInner {
            store,
            executor,
            queue_tx,
            queue_rx: AsyncMutex::new(queue_rx),
            handles: DashMap::new(),
            shutdown: CancellationToken::new(),
            metrics,
            busy_workers: AtomicUsize::new(0),
        });

        let handles = (0..workers)
            .map(|worker_id| tokio::spawn(run_worker(inner.clone(), worker_id)))
            .collect();

        info!("Execution engine started with {} workers", workers);
        Self {
            inner,
            workers: Mutex::new(handles),
        }
    }

    /// Persists a PENDING execution and enqueues it.
    pub async fn submit(&self, execution: WorkflowExecution) -> Result<String> {
        self.inner.submit(execution).await
    }

    /// Re-enqueues an execution that is already persisted as PENDING,
    /// e.g. one left queued by a previous process.
    pub fn resume(&self, execution_id: &str) -> Result<()> {
        self.inner.enqueue(execution_id)?;
        info!("Resumed pending execution '{}'", execution_id);
        Ok(())
    }

    /// Requests cancellation of a PENDING or RUNNING execution.
    ///
    /// Returns `Ok(false)` when the execution is unknown or already
    /// terminal. A running execution stops before its next step; a step in
    /// flight finishes, but its result is not written over the CANCELLED
    /// record.
    pub async fn cancel(&self, execution_id: &str) -> Result<bool> {
        self.inner.cancel(execution_id).await
    }

    /// Workers currently running an execution.
    pub fn busy_workers(&self) -> usize {
        self.inner.busy_workers.load(Ordering::Relaxed)
    }

    /// Total worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_running(&self) -> bool {
        !self.inner.shutdown.is_cancelled()
    }

    /// Stops accepting work and waits for workers to finish their current
    /// execution. Queued executions stay PENDING in the store.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }
        info!("Execution engine stopped");
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

async fn run_worker(inner: Arc<EngineInner>, worker_id: usize) {
    debug!("Worker {} started", worker_id);

    loop {
        let next = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => None,
            id = async { inner.queue_rx.lock().await.recv().await } => id,
        };

        let Some(execution_id) = next else {
            break;
        };

        inner.metrics.record_dequeued();
        inner.busy_workers.fetch_add(1, Ordering::Relaxed);
        debug!("Worker {} picked up execution '{}'", worker_id, execution_id);

        // A panic fails this execution; the worker keeps serving the queue
        let task = tokio::spawn({
            let inner = inner.clone();
            let execution_id = execution_id.clone();
            async move { inner.process(&execution_id).await }
        });
        if let Err(e) = task.await {
            inner.abandon(&execution_id, &e.to_string()).await;
        }

        inner.busy_workers.fetch_sub(1, Ordering::Relaxed);
    }

    debug!("Worker {} stopped", worker_id);
}

impl EngineInner {
    async fn submit(&self, execution: WorkflowExecution) -> Result<String> {
        if self.shutdown.is_cancelled() {
            return Err(WorkflowError::EngineStopped);
        }

        let execution_id = execution.execution_id.clone();
        self.store.save_execution(&execution).await?;
        self.enqueue(&execution_id)?;

        info!(
            "Queued execution '{}' of workflow '{}'",
            execution_id, execution.workflow_id
        );
        Ok(execution_id)
    }

    /// Registers a cancellation handle and pushes the ID onto the queue.
    fn enqueue(&self, execution_id: &str) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(WorkflowError::EngineStopped);
        }

        self.handles
            .insert(execution_id.to_string(), Arc::new(ExecutionHandle::default()));

        if self.queue_tx.send(execution_id.to_string()).is_err() {
            self.handles.remove(execution_id);
            return Err(WorkflowError::EngineStopped);
        }

        self.metrics.record_submitted();
        Ok(())
    }

    async fn cancel(&self, execution_id: &str) -> Result<bool> {
        let handle = self.handles.get(execution_id).map(|h| h.value().clone());
        let _guard = match &handle {
            Some(handle) => Some(handle.lock.lock().await),
            None => None,
        };

        let Some(mut execution) = self.store.get_execution(execution_id).await? else {
            return Ok(false);
        };

        if !execution.status.is_cancellable() {
            debug!(
                "Execution '{}' is {} and cannot be cancelled",
                execution_id, execution.status
            );
            return Ok(false);
        }

        execution.transition(ExecutionStatus::Cancelled);
        execution.error = Some("Cancelled by request".to_string());
        self.store.save_execution(&execution).await?;

        if let Some(handle) = &handle {
            handle.cancelled.cancel();
        }
        self.metrics.record_cancelled();
        info!("Cancelled execution '{}'", execution_id);
        Ok(true)
    }

    /// Saves the record unless the execution was cancelled.
    ///
    /// Returns false (and writes nothing) once cancellation was requested.
    async fn persist(
        &self,
        handle: &ExecutionHandle,
        execution: &WorkflowExecution,
    ) -> std::result::Result<bool, PersistenceError> {
        let _guard = handle.lock.lock().await;
        if handle.cancelled.is_cancelled() {
            return Ok(false);
        }
        self.store.save_execution(execution).await?;
        Ok(true)
    }

    async fn process(&self, execution_id: &str) {
        let handle = self
            .handles
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(ExecutionHandle::default()))
            .value()
            .clone();

        if let Err(e) = self.run(execution_id, &handle).await {
            error!("Execution '{}' aborted: {}", execution_id, e);
        }

        self.handles.remove(execution_id);
    }

    /// Marks an execution FAILED after its run task died.
    async fn abandon(&self, execution_id: &str, reason: &str) {
        error!("Execution '{}' crashed: {}", execution_id, reason);
        let handle = self.handles.remove(execution_id).map(|(_, h)| h);
        let _guard = match &handle {
            Some(handle) => Some(handle.lock.lock().await),
            None => None,
        };

        let mut execution = match self.store.get_execution(execution_id).await {
            Ok(Some(execution)) => execution,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to load crashed execution '{}': {}", execution_id, e);
                return;
            }
        };

        if execution.status.is_terminal() {
            return;
        }
        let was_running = execution.status == ExecutionStatus::Running;
        if !was_running {
            execution.transition(ExecutionStatus::Running);
        }
        execution.transition(ExecutionStatus::Failed);
        execution.error = Some(format!("Execution crashed: {}", reason));

        match self.store.save_execution(&execution).await {
            Ok(()) => {
                self.metrics.record_failed();
                if was_running {
                    self.metrics.record_finished();
                }
            }
            Err(e) => error!("Failed to record crash of '{}': {}", execution_id, e),
        }
    }

    async fn run(&self, execution_id: &str, handle: &ExecutionHandle) -> Result<()> {
        let (mut execution, definition) = {
            let _guard = handle.lock.lock().await;

            let Some(mut execution) = self.store.get_execution(execution_id).await? else {
                warn!("Execution '{}' vanished from the store", execution_id);
                return Ok(());
            };

            if handle.cancelled.is_cancelled() || execution.status != ExecutionStatus::Pending {
                info!(
                    "Skipping execution '{}' in state {}",
                    execution_id, execution.status
                );
                return Ok(());
            }

            execution.transition(ExecutionStatus::Running);
            execution.start_time = Utc::now();

            let definition = self.store.get_definition(&execution.workflow_id).await?;
            if definition.is_none() {
                execution.transition(ExecutionStatus::Failed);
                execution.error = Some(format!("Workflow '{}' not found", execution.workflow_id));
            }

            self.store.save_execution(&execution).await?;
            match definition {
                Some(definition) => (execution, definition),
                None => {
                    error!(
                        "Execution '{}' failed: workflow '{}' not found",
                        execution_id, execution.workflow_id
                    );
                    self.metrics.record_failed();
                    return Ok(());
                }
            }
        };

        self.metrics.record_started();
        info!(
            "Running execution '{}' of workflow '{}' ({} steps, retry {})",
            execution.execution_id,
            definition.id,
            definition.steps.len(),
            execution.retry_count()
        );

        let started = Instant::now();
        let outcome = match self.run_steps(&mut execution, &definition, handle).await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed(format!("Execution aborted: {}", e)),
        };

        let result = self
            .finish(&mut execution, &definition, handle, outcome, started)
            .await;
        self.metrics.record_finished();
        result
    }

    async fn run_steps(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
        handle: &ExecutionHandle,
    ) -> std::result::Result<RunOutcome, PersistenceError> {
        // Timeouts too large to represent never expire
        let deadline = Instant::now().checked_add(definition.timeout_duration());
        let total = definition.steps.len().max(1) as f64;

        for (index, step) in definition.steps.iter().enumerate() {
            if handle.cancelled.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(RunOutcome::Failed(format!(
                    "Workflow timed out after {}s",
                    definition.timeout
                )));
            }

            execution.current_step = Some(step.step_id.clone());
            execution.advance_progress(index as f64 / total * 100.0);
            if !self.persist(handle, execution).await? {
                return Ok(RunOutcome::Cancelled);
            }

            let outcome = self
                .executor
                .execute(step, &mut execution.context, &execution.execution_id)
                .await?;

            let Some(result) = outcome else {
                continue;
            };

            let failure = result
                .is_failed()
                .then(|| result.error.clone().unwrap_or_else(|| "step failed".to_string()));
            execution.result.insert(step.step_id.clone(), result);

            if let Some(reason) = failure {
                if step.required {
                    return Ok(RunOutcome::Failed(format!(
                        "Required step '{}' failed: {}",
                        step.step_id, reason
                    )));
                }
                warn!(
                    "Optional step '{}' failed, continuing: {}",
                    step.step_id, reason
                );
            }
        }

        Ok(RunOutcome::Completed)
    }

    async fn finish(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
        handle: &ExecutionHandle,
        outcome: RunOutcome,
        started: Instant,
    ) -> Result<()> {
        match outcome {
            RunOutcome::Completed => {
                execution.transition(ExecutionStatus::Completed);
                execution.advance_progress(100.0);
                if self.persist(handle, execution).await? {
                    self.metrics.record_completed(started.elapsed());
                    info!(
                        "Execution '{}' completed in {:.2}s",
                        execution.execution_id,
                        started.elapsed().as_secs_f64()
                    );
                }
            }
            RunOutcome::Failed(reason) => {
                execution.transition(ExecutionStatus::Failed);
                execution.error = Some(reason.clone());
                if self.persist(handle, execution).await? {
                    self.metrics.record_failed();
                    error!("Execution '{}' failed: {}", execution.execution_id, reason);
                    self.schedule_retry(execution, definition).await;
                }
            }
            RunOutcome::Cancelled => {
                info!(
                    "Execution '{}' stopped after cancellation",
                    execution.execution_id
                );
            }
        }
        Ok(())
    }

    async fn schedule_retry(&self, failed: &WorkflowExecution, definition: &WorkflowDefinition) {
        let Some(retry) = RetryController::next_workflow_attempt(failed, definition) else {
            return;
        };

        match self.submit(retry).await {
            Ok(_) => self.metrics.record_workflow_retry(),
            Err(e) => error!(
                "Failed to schedule retry of execution '{}': {}",
                failed.execution_id, e
            ),
        }
    }
}
