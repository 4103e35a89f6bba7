//! Workflow Execution Module
//!
//! Provides the engine that runs workflow executions and the step-level
//! machinery underneath it.
//!
//! # Architecture
//!
//! - [`engine`]: Worker pool and execution queue
//! - [`step`]: Single step execution (conditions, retries, timeouts)
//! - [`handler`]: Handler trait and registry keyed by step type
//! - [`retry`]: Step and workflow retry decisions
//! - [`record`]: Execution records and status state machine

pub mod engine;
pub mod handler;
pub mod record;
pub mod retry;
pub mod step;

pub use engine::ExecutionEngine;
pub use handler::{handler_fn, HandlerRegistry, StepHandler, StepRequest};
pub use record::{ExecutionSnapshot, ExecutionStatus, StepExecution, StepResult, WorkflowExecution};
pub use retry::{RetryController, StepRetryPolicy};
pub use step::StepExecutor;
