//! Built-in Step Handlers
//!
//! - [`control`]: DELAY, CONDITION and NOTIFY
//! - [`simulated`]: Dry-run stand-ins for service-backed step types
//! - [`shell`]: Bash commands, opt-in for FILE_OPERATION steps
//!
//! PARALLEL steps need no handler; the executor fans out their sub-steps.

pub mod control;
pub mod shell;
pub mod simulated;

use std::sync::Arc;

use crate::execution::handler::HandlerRegistry;
use crate::workflow::model::StepType;

pub use control::{ConditionHandler, DelayHandler, NotifyHandler};
pub use shell::ShellHandler;
pub use simulated::SimulatedHandler;

/// Registry with a handler for every non-composite step type plus LOOP.
pub fn builtin_registry() -> HandlerRegistry {
    let simulated = Arc::new(SimulatedHandler);

    HandlerRegistry::new()
        .with(StepType::Validation, simulated.clone())
        .with(StepType::Export, simulated.clone())
        .with(StepType::Transform, simulated.clone())
        .with(StepType::ApiCall, simulated.clone())
        .with(StepType::FileOperation, simulated.clone())
        .with(StepType::Loop, simulated)
        .with(StepType::Notify, Arc::new(NotifyHandler))
        .with(StepType::Delay, Arc::new(DelayHandler))
        .with(StepType::Condition, Arc::new(ConditionHandler::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_all_leaf_types() {
        let registry = builtin_registry();
        for step_type in StepType::ALL {
            if step_type == StepType::Parallel {
                assert!(!registry.contains(step_type));
            } else {
                assert!(registry.contains(step_type), "missing handler for {}", step_type);
            }
        }
    }
}
