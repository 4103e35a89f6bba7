//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, loading and
//! validating workflow definitions.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (WorkflowDefinition, WorkflowStep, Condition)
//! - [`parser`]: YAML parsing and loading
//! - [`validator`]: Validation rules for definitions
//! - [`condition`]: Condition evaluation against an execution context
//! - [`templates`]: Built-in BIM workflow templates

pub mod condition;
pub mod model;
pub mod parser;
pub mod templates;
pub mod validator;

pub use condition::ConditionEvaluator;
pub use model::{
    Condition, ConditionType, Context, StepType, WorkflowDefinition, WorkflowStep, WorkflowType,
};
pub use parser::{load_definitions, parse_definitions};
pub use validator::validate_definition;
