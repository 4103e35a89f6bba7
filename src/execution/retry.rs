//! Retry Control
//!
//! Two independent retry levels:
//!
//! - **Step**: a failed attempt is repeated up to `retry_count` more times,
//!   sleeping a fixed `retry_delay` between attempts.
//! - **Workflow**: a FAILED execution is replaced by a brand-new execution of
//!   the same workflow with the original input, up to `max_retries` times.
//!   Retries are linked through `retry_count` and `retry_of` metadata.

use std::time::Duration;

use log::{debug, info};
use serde_json::json;

use crate::execution::record::{ExecutionStatus, WorkflowExecution, RETRY_COUNT_KEY, RETRY_OF_KEY};
use crate::workflow::model::{WorkflowDefinition, WorkflowStep};

/// Fixed-delay retry policy for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRetryPolicy {
    /// Attempts allowed after the first
    pub max_retries: u32,
    pub delay: Duration,
}

impl StepRetryPolicy {
    /// Total attempts the policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt may follow `retries_so_far` retries.
    pub fn should_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// Sleeps for the configured delay.
    pub async fn backoff(&self) {
        if !self.delay.is_zero() {
            debug!("Waiting {:?} before next attempt", self.delay);
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Decides whether steps and executions are retried.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryController;

impl RetryController {
    /// Policy for a step's own retry settings.
    pub fn step_policy(step: &WorkflowStep) -> StepRetryPolicy {
        StepRetryPolicy {
            max_retries: step.retry_count,
            delay: step.retry_delay_duration(),
        }
    }

    /// Builds the next workflow-level attempt for a failed execution.
    ///
    /// Returns `None` when the execution did not fail or the definition's
    /// `max_retries` is exhausted.
    pub fn next_workflow_attempt(
        failed: &WorkflowExecution,
        definition: &WorkflowDefinition,
    ) -> Option<WorkflowExecution> {
        if failed.status != ExecutionStatus::Failed {
            return None;
        }

        let retry_count = failed.retry_count();
        if retry_count >= definition.max_retries {
            info!(
                "Workflow '{}' exhausted {} retries; execution '{}' stays failed",
                definition.id, definition.max_retries, failed.execution_id
            );
            return None;
        }

        let mut retry = WorkflowExecution::new(failed.workflow_id.clone(), failed.input.clone());
        retry
            .metadata
            .insert(RETRY_COUNT_KEY.to_string(), json!(retry_count + 1));
        retry
            .metadata
            .insert(RETRY_OF_KEY.to_string(), json!(failed.execution_id));

        info!(
            "Retrying workflow '{}' ({}/{}): '{}' replaces '{}'",
            definition.id,
            retry_count + 1,
            definition.max_retries,
            retry.execution_id,
            failed.execution_id
        );
        Some(retry)
    }
}
