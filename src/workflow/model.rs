//! Workflow Data Model
//!
//! Core data structures describing workflow definitions, their steps and
//! the conditions that gate each step.
//!
//! # Example YAML Format
//!
//! ```yaml
//! id: bim_export_workflow
//! name: BIM Export Workflow
//! workflow_type: export
//! max_retries: 2
//! steps:
//!   - step_id: convert_format
//!     name: Convert Format
//!     step_type: transform
//!     parameters:
//!       output_format: dxf
//!     retry_count: 2
//!     retry_delay: 5
//!
//!   - step_id: notify_completion
//!     name: Notify Completion
//!     step_type: notify
//!     conditions:
//!       - type: equals
//!         field: convert_format.status
//!         value: success
//!     required: false
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mutable key/value map accumulated during an execution.
pub type Context = Map<String, Value>;

/// Default per-step timeout in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Default number of additional attempts after a step failure.
pub const DEFAULT_STEP_RETRY_COUNT: u32 = 3;

/// Default delay between step attempts in seconds.
pub const DEFAULT_STEP_RETRY_DELAY_SECS: u64 = 60;

/// Default overall workflow timeout in seconds.
pub const DEFAULT_WORKFLOW_TIMEOUT_SECS: u64 = 1800;

/// Default number of automatic workflow-level retries.
pub const DEFAULT_WORKFLOW_MAX_RETRIES: u32 = 3;

/// Iteration cap for LOOP steps that don't set `max_iterations`.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

fn default_step_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

fn default_retry_count() -> u32 {
    DEFAULT_STEP_RETRY_COUNT
}

fn default_retry_delay() -> u64 {
    DEFAULT_STEP_RETRY_DELAY_SECS
}

fn default_workflow_timeout() -> u64 {
    DEFAULT_WORKFLOW_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_WORKFLOW_MAX_RETRIES
}

fn default_required() -> bool {
    true
}

/// Business category of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Validation,
    Export,
    Reporting,
    DataProcessing,
    Integration,
    Cleanup,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Export => "export",
            Self::Reporting => "reporting",
            Self::DataProcessing => "data_processing",
            Self::Integration => "integration",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a step performs. Handlers are registered per step type.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Validation,
    Export,
    Transform,
    Notify,
    Condition,
    Loop,
    Parallel,
    Delay,
    ApiCall,
    FileOperation,
}

impl StepType {
    /// Every step type, in declaration order.
    pub const ALL: [StepType; 10] = [
        Self::Validation,
        Self::Export,
        Self::Transform,
        Self::Notify,
        Self::Condition,
        Self::Loop,
        Self::Parallel,
        Self::Delay,
        Self::ApiCall,
        Self::FileOperation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Export => "export",
            Self::Transform => "transform",
            Self::Notify => "notify",
            Self::Condition => "condition",
            Self::Loop => "loop",
            Self::Parallel => "parallel",
            Self::Delay => "delay",
            Self::ApiCall => "api_call",
            Self::FileOperation => "file_operation",
        }
    }

    /// Composite steps run other steps instead of a single handler call.
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Parallel | Self::Loop)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison performed by a [`Condition`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
    Exists,
    NotExists,
}

/// A predicate over the execution context gating whether a step runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Condition {
    /// Comparison to perform
    #[serde(rename = "type")]
    pub condition_type: ConditionType,

    /// Dotted lookup key into the context (e.g. `validate.issues_found`)
    pub field: String,

    /// Operand compared against the field value
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(condition_type: ConditionType, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            condition_type,
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(ConditionType::Equals, field, value)
    }

    pub fn greater_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(ConditionType::GreaterThan, field, value)
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::new(ConditionType::Exists, field, Value::Null)
    }
}

/// A single unit of work within a workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    /// Identifier, unique within the definition
    pub step_id: String,

    /// Human readable name
    #[serde(default)]
    pub name: String,

    /// Selects the handler that performs the work
    #[serde(alias = "type")]
    pub step_type: StepType,

    /// Opaque parameters passed to the handler
    #[serde(default)]
    pub parameters: Context,

    /// All must hold for the step to run; empty means always run
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Per-attempt deadline in seconds
    #[serde(default = "default_step_timeout")]
    pub timeout: u64,

    /// Additional attempts after the first failure
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Fixed delay between attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    #[serde(default)]
    pub parallel: bool,

    /// A failed required step aborts the whole execution
    #[serde(default = "default_required")]
    pub required: bool,
}

impl WorkflowStep {
    /// Creates a required step with default timeout and retry policy.
    ///
    /// # Example
    ///
    /// ```
    /// use bimflow::workflow::{Condition, StepType, WorkflowStep};
    ///
    /// let step = WorkflowStep::new("apply_fixes", "Apply Fixes", StepType::ApiCall)
    ///     .with_parameter("endpoint", "/bim-health/apply-fixes")
    ///     .with_condition(Condition::greater_than("validate.issues_found", 0))
    ///     .with_retry(1, 0);
    /// assert_eq!(step.retry_count, 1);
    /// ```
    pub fn new(step_id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            step_id: step_id.into().trim().to_string(),
            name: name.into(),
            step_type,
            parameters: Context::new(),
            conditions: Vec::new(),
            timeout: DEFAULT_STEP_TIMEOUT_SECS,
            retry_count: DEFAULT_STEP_RETRY_COUNT,
            retry_delay: DEFAULT_STEP_RETRY_DELAY_SECS,
            parallel: false,
            required: true,
        }
    }

    /// Adds a handler parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Adds a gating condition.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Sets the per-attempt timeout in seconds.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Sets the step retry policy: extra attempts and the delay between them.
    pub fn with_retry(mut self, retry_count: u32, retry_delay_secs: u64) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay_secs;
        self
    }

    /// Marks the step as optional; its failure no longer aborts the execution.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    /// Sub-steps of a PARALLEL step, read from `parameters.steps`.
    pub fn sub_steps(&self) -> Result<Vec<WorkflowStep>, String> {
        match self.parameters.get("steps") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    serde_json::from_value(item.clone())
                        .map_err(|e| format!("invalid sub-step definition: {}", e))
                })
                .collect(),
            Some(_) => Err("'steps' must be a list of step definitions".to_string()),
            None => Err("parallel step requires a 'steps' list".to_string()),
        }
    }

    /// Items a LOOP step iterates, truncated to `parameters.max_iterations`.
    pub fn loop_items(&self) -> Result<Vec<Value>, String> {
        let max_iterations = match self.parameters.get("max_iterations") {
            None | Some(Value::Null) => DEFAULT_MAX_ITERATIONS,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| "'max_iterations' must be a non-negative integer".to_string())?
                as usize,
        };

        match self.parameters.get("items") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.iter().take(max_iterations).cloned().collect()),
            Some(_) => Err("'items' must be a list".to_string()),
        }
    }

    /// Optional body step a LOOP runs once per item, read from `parameters.body`.
    pub fn loop_body(&self) -> Result<Option<WorkflowStep>, String> {
        match self.parameters.get("body") {
            None | Some(Value::Null) => Ok(None),
            Some(body) => serde_json::from_value(body.clone())
                .map(Some)
                .map_err(|e| format!("invalid loop body: {}", e)),
        }
    }
}

/// Immutable template describing an ordered set of steps and retry policy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    #[serde(alias = "workflow_id")]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(alias = "type")]
    pub workflow_type: WorkflowType,

    /// Steps in execution order
    pub steps: Vec<WorkflowStep>,

    /// Trigger descriptors, interpreted by external trigger ingestion
    #[serde(default)]
    pub triggers: Vec<Value>,

    /// Optional cron expression, stored for external schedulers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    /// Overall execution deadline in seconds
    #[serde(default = "default_workflow_timeout")]
    pub timeout: u64,

    /// Automatic restarts after a failed execution
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub error_handling: Context,

    #[serde(default)]
    pub metadata: Context,
}

impl WorkflowDefinition {
    /// Creates an empty definition with default timeout and retry policy.
    pub fn new(id: impl Into<String>, name: impl Into<String>, workflow_type: WorkflowType) -> Self {
        Self {
            id: id.into().trim().to_string(),
            name: name.into(),
            description: String::new(),
            workflow_type,
            steps: Vec::new(),
            triggers: Vec::new(),
            schedule: None,
            timeout: DEFAULT_WORKFLOW_TIMEOUT_SECS,
            max_retries: DEFAULT_WORKFLOW_MAX_RETRIES,
            error_handling: Context::new(),
            metadata: Context::new(),
        }
    }

    /// Appends a step.
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the overall execution deadline in seconds.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_trigger(mut self, trigger: Value) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Gets a step by ID.
    pub fn get_step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Returns the number of steps in the workflow.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
