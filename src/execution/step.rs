//! Individual Step Execution
//!
//! Runs one step through its full contract:
//!
//! 1. Evaluate gating conditions. A step whose conditions do not hold is
//!    skipped and leaves no record.
//! 2. Persist a RUNNING [`StepExecution`].
//! 3. Attempt the step, retrying per its policy. Every attempt is bounded by
//!    the step timeout; on expiry the handler task is aborted.
//! 4. Persist the final step execution and merge the result into the
//!    execution context under the step ID.
//!
//! PARALLEL steps fan their sub-steps out on a [`JoinSet`]; LOOP steps run a
//! body step (or the LOOP handler) once per item. Sub-steps go through the
//! same contract, so each one gets its own conditions, retries and record.
//! Leaf sub-steps of a PARALLEL step share one engine-wide permit pool.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::timeout;

use crate::error::{PersistenceError, StepError};
use crate::execution::handler::{interpret_output, HandlerRegistry, StepRequest};
use crate::execution::record::{StepExecution, StepResult};
use crate::execution::retry::RetryController;
use crate::monitoring::EngineMetrics;
use crate::persistence::PersistenceGateway;
use crate::workflow::condition::ConditionEvaluator;
use crate::workflow::model::{Context, StepType, WorkflowStep};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Aborts the wrapped task when dropped, e.g. when a timeout fires.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A RUNNING step record that is failed and saved if its step is dropped
/// mid-flight, e.g. when the timeout of an enclosing PARALLEL step fires.
struct UnfinishedRecord {
    store: Arc<dyn PersistenceGateway>,
    record: Option<StepExecution>,
}

impl UnfinishedRecord {
    fn new(store: Arc<dyn PersistenceGateway>, record: StepExecution) -> Self {
        Self {
            store,
            record: Some(record),
        }
    }

    fn disarm(mut self) {
        self.record = None;
    }
}

impl Drop for UnfinishedRecord {
    fn drop(&mut self) {
        let Some(mut record) = self.record.take() else {
            return;
        };

        warn!(
            "Step '{}' of execution '{}' was interrupted",
            record.step_id, record.workflow_execution_id
        );
        record.finish(&StepResult::failed(
            "Step interrupted before completion",
            record.retry_count,
        ));

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.store.clone();
                runtime.spawn(async move {
                    if let Err(e) = store.save_step_execution(&record).await {
                        error!("Failed to save interrupted step '{}': {}", record.step_id, e);
                    }
                });
            }
            Err(_) => warn!(
                "No runtime to save interrupted step '{}'; record stays RUNNING",
                record.step_id
            ),
        }
    }
}

/// Executes steps against a handler registry and a persistence gateway.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct StepExecutor {
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn PersistenceGateway>,
    evaluator: ConditionEvaluator,
    permits: Arc<Semaphore>,
    metrics: Arc<EngineMetrics>,
}

impl StepExecutor {
    /// Creates an executor; `max_parallel` bounds concurrent leaf sub-steps.
    pub fn new(
        registry: Arc<HandlerRegistry>,
        store: Arc<dyn PersistenceGateway>,
        max_parallel: usize,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            registry,
            store,
            evaluator: ConditionEvaluator::new(),
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
            metrics,
        }
    }

    /// Runs a step and merges its result into `context`.
    ///
    /// Returns `Ok(None)` when the step was skipped by its conditions. Step
    /// failures are reported as a failed [`StepResult`]; only persistence
    /// failures surface as errors.
    pub fn execute<'a>(
        &'a self,
        step: &'a WorkflowStep,
        context: &'a mut Context,
        execution_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<StepResult>, PersistenceError>> {
        Box::pin(async move {
            if !self.evaluator.evaluate(&step.conditions, context) {
                info!("Skipping step '{}': conditions not met", step.step_id);
                self.metrics.record_step_skipped();
                return Ok(None);
            }

            let mut record = StepExecution::start(execution_id, &step.step_id);
            self.store.save_step_execution(&record).await?;
            let unfinished = UnfinishedRecord::new(self.store.clone(), record.clone());

            let result = self.run_with_retry(step, context, execution_id).await;

            unfinished.disarm();
            record.finish(&result);
            self.store.save_step_execution(&record).await?;

            context.insert(step.step_id.clone(), result.to_value());
            Ok(Some(result))
        })
    }

    async fn run_with_retry(&self, step: &WorkflowStep, context: &Context, execution_id: &str) -> StepResult {
        let policy = RetryController::step_policy(step);
        let mut retries = 0;

        loop {
            self.metrics.record_step_attempt();
            debug!(
                "Step '{}' ({}) attempt {}/{}",
                step.step_id,
                step.step_type,
                retries + 1,
                policy.max_attempts()
            );

            match self.attempt(step, context, execution_id, retries + 1).await {
                Ok(output) => {
                    if retries > 0 {
                        info!("Step '{}' succeeded after {} retries", step.step_id, retries);
                    } else {
                        debug!("Step '{}' completed successfully", step.step_id);
                    }
                    return StepResult::success(output, retries);
                }
                Err(e) => {
                    if matches!(e, StepError::Timeout(_)) {
                        self.metrics.record_step_timeout();
                    }

                    if !e.is_permanent() && policy.should_retry(retries) {
                        warn!(
                            "Step '{}' attempt {}/{} failed: {}",
                            step.step_id,
                            retries + 1,
                            policy.max_attempts(),
                            e
                        );
                        policy.backoff().await;
                        retries += 1;
                        self.metrics.record_step_retry();
                    } else {
                        error!(
                            "Step '{}' failed after {} attempt(s): {}",
                            step.step_id,
                            retries + 1,
                            e
                        );
                        return StepResult::failed(e.to_string(), retries);
                    }
                }
            }
        }
    }

    /// One attempt, bounded by the step timeout.
    async fn attempt(
        &self,
        step: &WorkflowStep,
        context: &Context,
        execution_id: &str,
        attempt: u32,
    ) -> Result<Context, StepError> {
        let limit = step.timeout_duration();
        let work = async {
            match step.step_type {
                StepType::Parallel => self.run_parallel(step, context, execution_id).await,
                StepType::Loop => self.run_loop(step, context, execution_id, attempt).await,
                step_type => {
                    self.dispatch(
                        step_type,
                        &step.step_id,
                        step.parameters.clone(),
                        context,
                        execution_id,
                        attempt,
                    )
                    .await
                }
            }
        };

        match timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(StepError::Timeout(limit)),
        }
    }

    /// Invokes the registered handler on its own task.
    async fn dispatch(
        &self,
        step_type: StepType,
        step_id: &str,
        parameters: Context,
        context: &Context,
        execution_id: &str,
        attempt: u32,
    ) -> Result<Context, StepError> {
        let handler = self
            .registry
            .get(step_type)
            .ok_or_else(|| StepError::MissingHandler(step_type.to_string()))?;

        let request = StepRequest {
            execution_id: execution_id.to_string(),
            step_id: step_id.to_string(),
            step_type,
            parameters,
            context: context.clone(),
            attempt,
        };

        let mut task = AbortOnDrop(tokio::spawn(async move { handler.handle(request).await }));
        match (&mut task.0).await {
            Ok(Ok(output)) => interpret_output(output),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(join_failure(e)),
        }
    }

    /// Runs all sub-steps concurrently; fails if any required one fails.
    async fn run_parallel(
        &self,
        step: &WorkflowStep,
        context: &Context,
        execution_id: &str,
    ) -> Result<Context, StepError> {
        let sub_steps = step.sub_steps().map_err(StepError::InvalidParameters)?;
        let total = sub_steps.len();
        info!("Step '{}' running {} sub-steps in parallel", step.step_id, total);

        let mut tasks = JoinSet::new();
        for sub_step in sub_steps {
            let executor = self.clone();
            let mut sub_context = context.clone();
            let execution_id = execution_id.to_string();

            tasks.spawn(async move {
                // Composite sub-steps fan out further and must not hold a permit
                let _permit = if sub_step.step_type.is_composite() {
                    None
                } else {
                    executor.permits.clone().acquire_owned().await.ok()
                };
                let outcome = executor
                    .execute(&sub_step, &mut sub_context, &execution_id)
                    .await;
                (sub_step, outcome)
            });
        }

        let mut results = Context::new();
        let mut skipped = Vec::new();
        let mut failures = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            let (sub_step, outcome) = joined.map_err(join_failure)?;
            match outcome {
                Ok(Some(result)) => {
                    if result.is_failed() {
                        let reason = result.error.as_deref().unwrap_or("failed");
                        if sub_step.required {
                            failures.push(format!("{}: {}", sub_step.step_id, reason));
                        } else {
                            warn!("Optional sub-step '{}' failed: {}", sub_step.step_id, reason);
                        }
                    }
                    results.insert(sub_step.step_id, result.to_value());
                }
                Ok(None) => skipped.push(json!(sub_step.step_id)),
                Err(e) => return Err(StepError::Persistence(e.to_string())),
            }
        }

        if !failures.is_empty() {
            failures.sort();
            return Err(StepError::Handler(format!(
                "{} of {} sub-steps failed: {}",
                failures.len(),
                total,
                failures.join("; ")
            )));
        }

        let mut output = Context::new();
        output.insert("parallel_executions".to_string(), json!(total));
        output.insert("results".to_string(), Value::Object(results));
        if !skipped.is_empty() {
            output.insert("skipped".to_string(), Value::Array(skipped));
        }
        Ok(output)
    }

    /// Runs the body step (or the LOOP handler) once per item, in order.
    async fn run_loop(
        &self,
        step: &WorkflowStep,
        context: &Context,
        execution_id: &str,
        attempt: u32,
    ) -> Result<Context, StepError> {
        let items = step.loop_items().map_err(StepError::InvalidParameters)?;
        let body = step.loop_body().map_err(StepError::InvalidParameters)?;
        debug!("Step '{}' iterating over {} items", step.step_id, items.len());

        let mut iterations = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let iteration = index + 1;

            let entry = match &body {
                Some(body) => {
                    let item_step = WorkflowStep {
                        step_id: format!("{}[{}]", body.step_id, index),
                        ..body.clone()
                    };
                    let mut item_context = context.clone();
                    item_context.insert(
                        "loop".to_string(),
                        json!({
                            "step_id": step.step_id,
                            "item": item.clone(),
                            "iteration": iteration,
                        }),
                    );

                    match self.execute(&item_step, &mut item_context, execution_id).await {
                        Ok(Some(result)) => {
                            if result.is_failed() && body.required {
                                return Err(StepError::Handler(format!(
                                    "iteration {} failed: {}",
                                    iteration,
                                    result.error.as_deref().unwrap_or("failed")
                                )));
                            }
                            json!({"iteration": iteration, "item": item, "result": result.to_value()})
                        }
                        Ok(None) => json!({"iteration": iteration, "item": item, "skipped": true}),
                        Err(e) => return Err(StepError::Persistence(e.to_string())),
                    }
                }
                None => {
                    let mut parameters = step.parameters.clone();
                    parameters.insert("item".to_string(), item.clone());
                    parameters.insert("iteration".to_string(), json!(iteration));

                    let output = self
                        .dispatch(StepType::Loop, &step.step_id, parameters, context, execution_id, attempt)
                        .await
                        .map_err(|e| match e {
                            StepError::Handler(message) => {
                                StepError::Handler(format!("iteration {} failed: {}", iteration, message))
                            }
                            other => other,
                        })?;
                    json!({"iteration": iteration, "item": item, "result": Value::Object(output)})
                }
            };
            iterations.push(entry);
        }

        let mut output = Context::new();
        output.insert("iterations".to_string(), json!(iterations.len()));
        output.insert("results".to_string(), Value::Array(iterations));
        Ok(output)
    }
}

fn join_failure(err: JoinError) -> StepError {
    if err.is_panic() {
        StepError::Panicked(panic_message(err.into_panic()))
    } else {
        StepError::Handler("handler task was cancelled".to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::execution::handler::handler_fn;
    use crate::execution::record::ExecutionStatus;
    use crate::persistence::MemoryStore;
    use crate::workflow::model::Condition;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn executor(registry: HandlerRegistry) -> (StepExecutor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let gateway: Arc<dyn PersistenceGateway> = store.clone();
        let executor = StepExecutor::new(
            Arc::new(registry),
            gateway,
            4,
            Arc::new(EngineMetrics::new()),
        );
        (executor, store)
    }

    fn ok_output(key: &str, value: Value) -> Context {
        let mut output = Context::new();
        output.insert(key.to_string(), value);
        output
    }

    fn echo_registry() -> HandlerRegistry {
        HandlerRegistry::new().with(
            StepType::Export,
            handler_fn(|request| async move { Ok(ok_output("echo", json!(request.step_id))) }),
        )
    }

    #[tokio::test]
    async fn test_success_merges_into_context() {
        let (executor, store) = executor(echo_registry());
        let step = WorkflowStep::new("export", "Export", StepType::Export);
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_success());
        assert_eq!(context["export"]["status"], json!("success"));
        assert_eq!(context["export"]["echo"], json!("export"));

        let records = store.list_step_executions("exec_1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_unmet_conditions_skip_without_record() {
        let (executor, store) = executor(echo_registry());
        let step = WorkflowStep::new("export", "Export", StepType::Export)
            .with_condition(Condition::greater_than("validate.issues_found", 0));
        let mut context = Context::new();
        context.insert("validate".into(), json!({"issues_found": 0}));

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap();

        assert!(result.is_none());
        assert!(context.get("export").is_none());
        assert!(store.list_step_executions("exec_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let registry = HandlerRegistry::new().with(
            StepType::ApiCall,
            handler_fn(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(HandlerError::new("503 Service Unavailable"))
                    } else {
                        Ok(ok_output("ok", json!(true)))
                    }
                }
            }),
        );
        let (executor, store) = executor(registry);
        let step = WorkflowStep::new("call", "Call", StepType::ApiCall).with_retry(3, 0);
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_success());
        assert_eq!(result.retry_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let records = store.list_step_executions("exec_1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let registry = HandlerRegistry::new().with(
            StepType::ApiCall,
            handler_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(HandlerError::new("connection refused")) }
            }),
        );
        let (executor, _) = executor(registry);
        let step = WorkflowStep::new("call", "Call", StepType::ApiCall).with_retry(1, 0);
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_failed());
        assert_eq!(result.retry_count, 1);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(context["call"]["status"], json!("failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_handler() {
        let registry = HandlerRegistry::new().with(
            StepType::Export,
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Context::new())
            }),
        );
        let (executor, _) = executor(registry);
        let step = WorkflowStep::new("slow", "Slow", StepType::Export)
            .with_timeout(1)
            .with_retry(0, 0);
        let mut context = Context::new();

        let started = tokio::time::Instant::now();
        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_failed());
        assert!(result.error.unwrap().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_failed_status_map_is_failure() {
        let registry = HandlerRegistry::new().with(
            StepType::Validation,
            handler_fn(|_| async {
                let mut output = ok_output("status", json!("failed"));
                output.insert("error".into(), json!("model has 12 clashes"));
                Ok(output)
            }),
        );
        let (executor, _) = executor(registry);
        let step = WorkflowStep::new("validate", "Validate", StepType::Validation).with_retry(0, 0);
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("model has 12 clashes"));
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let registry = HandlerRegistry::new().with(
            StepType::Transform,
            handler_fn(|_| async {
                if true {
                    panic!("corrupt geometry");
                }
                Ok(Context::new())
            }),
        );
        let (executor, _) = executor(registry);
        let step = WorkflowStep::new("transform", "Transform", StepType::Transform).with_retry(0, 0);
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_failed());
        assert!(result.error.unwrap().contains("corrupt geometry"));
    }

    #[tokio::test]
    async fn test_missing_handler_is_not_retried() {
        let (executor, _) = executor(HandlerRegistry::new());
        let step = WorkflowStep::new("notify", "Notify", StepType::Notify).with_retry(3, 60);
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_failed());
        assert_eq!(result.retry_count, 0);
        assert!(result.error.unwrap().contains("notify"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_runs_concurrently() {
        let registry = HandlerRegistry::new().with(
            StepType::Export,
            handler_fn(|request| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(ok_output("exported", json!(request.step_id)))
            }),
        );
        let (executor, store) = executor(registry);
        let step = WorkflowStep::new("fan_out", "Fan Out", StepType::Parallel).with_parameter(
            "steps",
            json!([
                {"step_id": "ifc", "step_type": "export"},
                {"step_id": "pdf", "step_type": "export"},
                {"step_id": "dwg", "step_type": "export"},
            ]),
        );
        let mut context = Context::new();

        let started = tokio::time::Instant::now();
        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_success());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.output["parallel_executions"], json!(3));
        assert_eq!(context["fan_out"]["results"]["pdf"]["exported"], json!("pdf"));

        // One record per sub-step plus the parallel step itself
        assert_eq!(store.list_step_executions("exec_1").await.unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_timeout_fails_interrupted_sub_steps() {
        let registry = HandlerRegistry::new().with(
            StepType::Export,
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Context::new())
            }),
        );
        let (executor, store) = executor(registry);
        let step = WorkflowStep::new("fan_out", "Fan Out", StepType::Parallel)
            .with_timeout(1)
            .with_retry(0, 0)
            .with_parameter(
                "steps",
                json!([
                    {"step_id": "ifc", "step_type": "export"},
                    {"step_id": "pdf", "step_type": "export"},
                ]),
            );
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();
        assert!(result.is_failed());

        let mut records = Vec::new();
        for _ in 0..100 {
            records = store.list_step_executions("exec_1").await.unwrap();
            if records.iter().all(|r| r.status != ExecutionStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(records.len(), 3);
        for sub_step in ["ifc", "pdf"] {
            let record = records.iter().find(|r| r.step_id == sub_step).unwrap();
            assert_eq!(record.status, ExecutionStatus::Failed);
            assert!(record.end_time.is_some());
            assert!(record.error.as_deref().unwrap().contains("interrupted"));
        }
    }

    #[tokio::test]
    async fn test_parallel_fails_on_required_sub_step() {
        let registry = echo_registry().with(
            StepType::Validation,
            handler_fn(|_| async { Err(HandlerError::new("invalid schema")) }),
        );
        let (executor, _) = executor(registry);
        let step = WorkflowStep::new("fan_out", "Fan Out", StepType::Parallel)
            .with_retry(0, 0)
            .with_parameter(
                "steps",
                json!([
                    {"step_id": "export", "step_type": "export"},
                    {"step_id": "check", "step_type": "validation", "retry_count": 0},
                ]),
            );
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_failed());
        let error = result.error.unwrap();
        assert!(error.contains("check: invalid schema"));
        assert!(error.starts_with("1 of 2"));
    }

    #[tokio::test]
    async fn test_parallel_tolerates_optional_failure() {
        let registry = echo_registry().with(
            StepType::Notify,
            handler_fn(|_| async { Err(HandlerError::new("smtp down")) }),
        );
        let (executor, _) = executor(registry);
        let step = WorkflowStep::new("fan_out", "Fan Out", StepType::Parallel).with_parameter(
            "steps",
            json!([
                {"step_id": "export", "step_type": "export"},
                {"step_id": "mail", "step_type": "notify", "retry_count": 0, "required": false},
            ]),
        );
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_success());
        assert_eq!(result.output["results"]["mail"]["status"], json!("failed"));
    }

    #[tokio::test]
    async fn test_loop_with_body_step() {
        let (executor, store) = executor(HandlerRegistry::new().with(
            StepType::Export,
            handler_fn(|request| async move {
                Ok(ok_output("sheet", request.context["loop"]["item"].clone()))
            }),
        ));
        let step = WorkflowStep::new("sheets", "Sheets", StepType::Loop)
            .with_parameter("items", json!(["A-101", "A-102", "A-103"]))
            .with_parameter("max_iterations", 2)
            .with_parameter("body", json!({"step_id": "export_sheet", "step_type": "export"}));
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_success());
        assert_eq!(result.output["iterations"], json!(2));
        assert_eq!(result.output["results"][1]["result"]["sheet"], json!("A-102"));

        let records = store.list_step_executions("exec_1").await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.step_id.as_str()).collect();
        assert!(ids.contains(&"export_sheet[0]"));
        assert!(ids.contains(&"export_sheet[1]"));
    }

    #[tokio::test]
    async fn test_loop_handler_receives_items() {
        let (executor, _) = executor(HandlerRegistry::new().with(
            StepType::Loop,
            handler_fn(|request| async move {
                let item = request.parameters["item"].as_i64().unwrap_or(0);
                if item < 0 {
                    return Err(HandlerError::new("negative item"));
                }
                Ok(ok_output("doubled", json!(item * 2)))
            }),
        ));
        let step = WorkflowStep::new("double", "Double", StepType::Loop)
            .with_retry(0, 0)
            .with_parameter("items", json!([1, 2, -3]));
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("iteration 3 failed: negative item"));
    }

    #[tokio::test]
    async fn test_invalid_parallel_parameters_fail_fast() {
        let (executor, _) = executor(HandlerRegistry::new());
        let step = WorkflowStep::new("fan_out", "Fan Out", StepType::Parallel)
            .with_parameter("steps", "not a list");
        let mut context = Context::new();

        let result = executor.execute(&step, &mut context, "exec_1").await.unwrap().unwrap();

        assert!(result.is_failed());
        assert_eq!(result.retry_count, 0);
    }
}
