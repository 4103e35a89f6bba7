//! BimFlow - Durable Workflow Automation Engine
//!
//! Runs multi-step BIM/AEC workflows (validation, format conversion,
//! exports, notifications) with conditional steps, step and workflow
//! retries, cancellation and a persisted execution history.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`workflow`]: Definitions, YAML parsing, validation and conditions
//! - [`execution`]: Worker pool, step executor, handlers and retry policy
//! - [`handlers`]: Built-in step handlers
//! - [`persistence`]: Storage gateway with in-memory and file backends
//! - [`monitoring`]: Engine counters
//! - [`service`]: The public facade tying everything together
//!
//! # Example
//!
//! ```rust,no_run
//! use bimflow::config::EngineConfig;
//! use bimflow::handlers::builtin_registry;
//! use bimflow::service::WorkflowService;
//! use bimflow::workflow::Context;
//!
//! # async fn run() -> bimflow::Result<()> {
//! let config = EngineConfig::default().with_workers(4).with_templates(true);
//! let service = WorkflowService::from_config(config, builtin_registry()).await?;
//!
//! let id = service
//!     .execute_workflow("bim_validation_workflow", Context::new())
//!     .await?;
//! println!("{:?}", service.get_workflow_status(&id).await?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod handlers;
pub mod monitoring;
pub mod persistence;
pub mod service;
pub mod workflow;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{DefinitionError, HandlerError, PersistenceError, Result, StepError, WorkflowError};
pub use execution::{ExecutionStatus, HandlerRegistry, StepHandler, StepRequest, WorkflowExecution};
pub use service::{WorkflowService, WorkflowSummary};
pub use workflow::model::{Context, StepType, WorkflowDefinition, WorkflowStep, WorkflowType};
pub use workflow::parser::load_definitions;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "BimFlow";
