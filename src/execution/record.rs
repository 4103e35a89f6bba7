//! Execution Records
//!
//! Persistent records for workflow runs and individual step attempts,
//! plus the status state machine they follow.
//!
//! ```text
//! PENDING ──> RUNNING ──> COMPLETED
//!    │           ├──────> FAILED
//!    │           └──────> PAUSED (reserved)
//!    └───────────┴──────> CANCELLED
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::workflow::model::Context;

/// Metadata key holding the workflow-level retry number.
pub const RETRY_COUNT_KEY: &str = "retry_count";

/// Metadata key linking a retry to the execution it replaces.
pub const RETRY_OF_KEY: &str = "retry_of";

/// Generates a new workflow execution ID.
pub fn new_execution_id() -> String {
    format!("exec_{}", Uuid::new_v4().simple())
}

/// Generates a new step execution ID.
pub fn new_step_execution_id() -> String {
    format!("step_{}", Uuid::new_v4().simple())
}

/// Lifecycle status shared by workflow and step executions.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Reserved; the engine never pauses an execution on its own.
    Paused,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// States from which an execution can still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;

        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Paused)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported for a step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepResultStatus {
    Success,
    Failed,
}

/// Result of running one step: status, handler payload and error.
///
/// Serializes flat, e.g. `{"status": "success", "count": 5, "retry_count": 0}`,
/// which is the shape merged into the execution context under the step ID.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepResult {
    pub status: StepResultStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Attempts beyond the first
    #[serde(default)]
    pub retry_count: u32,

    /// Handler payload
    #[serde(flatten)]
    pub output: Context,
}

impl StepResult {
    /// Successful result carrying the handler payload.
    ///
    /// Reserved keys (`status`, `error`, `retry_count`) are stripped from the
    /// payload so the flat representation stays unambiguous.
    pub fn success(mut output: Context, retry_count: u32) -> Self {
        output.remove("status");
        output.remove("error");
        output.remove(RETRY_COUNT_KEY);
        Self {
            status: StepResultStatus::Success,
            error: None,
            retry_count,
            output,
        }
    }

    pub fn failed(error: impl Into<String>, retry_count: u32) -> Self {
        Self {
            status: StepResultStatus::Failed,
            error: Some(error.into()),
            retry_count,
            output: Context::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepResultStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepResultStatus::Failed
    }

    /// Flat JSON representation used for context merging.
    pub fn to_value(&self) -> Value {
        let mut map = self.output.clone();
        let status = match self.status {
            StepResultStatus::Success => "success",
            StepResultStatus::Failed => "failed",
        };
        map.insert("status".to_string(), json!(status));
        if let Some(error) = &self.error {
            map.insert("error".to_string(), json!(error));
        }
        map.insert(RETRY_COUNT_KEY.to_string(), json!(self.retry_count));
        Value::Object(map)
    }
}

/// One run instance of a workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,

    /// Creation time while pending, reset when a worker starts the run
    pub start_time: DateTime<Utc>,

    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub current_step: Option<String>,

    /// Percentage in 0.0..=100.0
    #[serde(default)]
    pub progress: f64,

    /// Results keyed by step ID
    #[serde(default)]
    pub result: BTreeMap<String, StepResult>,

    #[serde(default)]
    pub error: Option<String>,

    /// Input the execution was submitted with; reused by workflow retries
    #[serde(default)]
    pub input: Context,

    /// Initial input plus step outputs keyed by step ID
    #[serde(default)]
    pub context: Context,

    #[serde(default)]
    pub metadata: Context,
}

impl WorkflowExecution {
    /// Creates a pending execution for a workflow.
    pub fn new(workflow_id: impl Into<String>, context: Context) -> Self {
        let mut metadata = Context::new();
        metadata.insert(RETRY_COUNT_KEY.to_string(), json!(0));

        Self {
            execution_id: new_execution_id(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            current_step: None,
            progress: 0.0,
            result: BTreeMap::new(),
            error: None,
            input: context.clone(),
            context,
            metadata,
        }
    }

    /// Workflow-level retry number (0 for the original execution).
    pub fn retry_count(&self) -> u32 {
        self.metadata
            .get(RETRY_COUNT_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }

    /// ID of the failed execution this one retries, if any.
    pub fn retry_of(&self) -> Option<&str> {
        self.metadata.get(RETRY_OF_KEY).and_then(Value::as_str)
    }

    /// Moves to `next` if the state machine allows it.
    ///
    /// Terminal transitions stamp `end_time`. Returns false and leaves the
    /// record untouched otherwise.
    pub fn transition(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        true
    }

    /// Raises progress; never lowers it and never exceeds 100.
    pub fn advance_progress(&mut self, value: f64) {
        self.progress = self.progress.max(value.clamp(0.0, 100.0));
    }

    /// Wall-clock run time for finished executions.
    pub fn duration_secs(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            error: self.error.clone(),
            retry_count: self.retry_count(),
        }
    }
}

/// Point-in-time view of an execution returned by status queries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
}

/// One recorded run of a single step within an execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepExecution {
    pub step_execution_id: String,
    pub workflow_execution_id: String,
    pub step_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,

    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub result: Option<StepResult>,

    #[serde(default)]
    pub error: Option<String>,

    /// Attempts beyond the first
    #[serde(default)]
    pub retry_count: u32,

    /// Seconds between start and end
    #[serde(default)]
    pub duration: f64,
}

impl StepExecution {
    /// Creates a running step execution.
    pub fn start(workflow_execution_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            step_execution_id: new_step_execution_id(),
            workflow_execution_id: workflow_execution_id.into(),
            step_id: step_id.into(),
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            error: None,
            retry_count: 0,
            duration: 0.0,
        }
    }

    /// Records the final result and stamps end time and duration.
    pub fn finish(&mut self, result: &StepResult) {
        let end = Utc::now();
        self.status = if result.is_success() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        self.retry_count = result.retry_count;
        self.error = result.error.clone();
        self.result = Some(result.clone());
        self.end_time = Some(end);
        self.duration = (end - self.start_time).num_milliseconds() as f64 / 1000.0;
    }
}
