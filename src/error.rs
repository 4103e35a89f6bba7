//! Error Types
//!
//! Error taxonomy for the workflow engine. Only [`WorkflowError`] crosses the
//! public API boundary; step-level and condition-level errors are absorbed by
//! the executor and surface as failed step results or warnings.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used across the public API.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Top-level error returned by [`crate::service::WorkflowService`] and the engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Execution '{0}' not found")]
    ExecutionNotFound(String),

    #[error("Execution engine has been shut down")]
    EngineStopped,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// A workflow definition is invalid or unknown.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DefinitionError {
    #[error("Workflow has empty or whitespace-only ID")]
    EmptyWorkflowId,

    #[error("Workflow '{0}' has no name")]
    EmptyName(String),

    #[error("Workflow '{0}' has no steps")]
    EmptyWorkflow(String),

    #[error("Step in workflow '{0}' has empty or whitespace-only ID")]
    EmptyStepId(String),

    #[error("Duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    #[error("'{0}' must have a timeout greater than zero")]
    ZeroTimeout(String),

    #[error("Step '{step}': {reason}")]
    InvalidParameters { step: String, reason: String },

    #[error("Workflow '{0}' already exists; register a new version under a new ID")]
    AlreadyExists(String),

    #[error("Workflow '{0}' not found")]
    UnknownWorkflow(String),

    #[error("Failed to parse workflow definition: {0}")]
    Parse(String),
}

/// Durable storage failed; execution state cannot be trusted.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Why a single step attempt failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error("{0}")]
    Handler(String),

    #[error("Step timed out after {0:?}")]
    Timeout(Duration),

    #[error("Step handler panicked: {0}")]
    Panicked(String),

    #[error("No handler registered for step type '{0}'")]
    MissingHandler(String),

    #[error("Invalid step parameters: {0}")]
    InvalidParameters(String),

    #[error("Failed to record sub-step: {0}")]
    Persistence(String),
}

impl StepError {
    /// Errors that another attempt cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::MissingHandler(_) | Self::InvalidParameters(_))
    }
}

/// A condition could not be evaluated against the context.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConditionEvaluationError {
    #[error("Field '{field}' is not numeric (compared with {expected})")]
    NotNumeric { field: String, expected: String },

    #[error("Field '{0}' does not support containment checks")]
    NotContainer(String),

    #[error("Containment on '{field}' needs a string value, got {value}")]
    InvalidNeedle { field: String, value: String },
}

/// Error returned by a step handler.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<HandlerError> for StepError {
    fn from(err: HandlerError) -> Self {
        StepError::Handler(err.0)
    }
}
