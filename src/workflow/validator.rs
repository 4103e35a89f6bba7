//! Workflow Validation
//!
//! Structural validation run before a definition is registered:
//! - Definition field validation (ID, name, timeout)
//! - Step ID uniqueness
//! - Per-step timeout and composite parameter checks
//! - Recursive validation of PARALLEL sub-steps and LOOP bodies

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::error::DefinitionError;

use super::model::{StepType, WorkflowDefinition, WorkflowStep};

/// Validates a single step, recursing into composite step parameters.
fn validate_step(workflow_id: &str, step: &WorkflowStep) -> Result<(), DefinitionError> {
    if step.step_id.trim().is_empty() {
        return Err(DefinitionError::EmptyStepId(workflow_id.to_string()));
    }

    if step.timeout == 0 {
        return Err(DefinitionError::ZeroTimeout(format!("Step '{}'", step.step_id)));
    }

    let invalid = |reason: String| DefinitionError::InvalidParameters {
        step: step.step_id.clone(),
        reason,
    };

    match step.step_type {
        StepType::Parallel => {
            let sub_steps = step.sub_steps().map_err(invalid)?;
            if sub_steps.is_empty() {
                return Err(invalid("parallel step has no sub-steps".to_string()));
            }

            let mut seen = HashSet::new();
            for sub_step in &sub_steps {
                if !seen.insert(sub_step.step_id.as_str()) {
                    return Err(DefinitionError::DuplicateStepId(sub_step.step_id.clone()));
                }
                validate_step(workflow_id, sub_step)?;
            }
            debug!("Step '{}' fans out to {} sub-steps", step.step_id, sub_steps.len());
        }
        StepType::Loop => {
            let items = step.loop_items().map_err(invalid)?;
            if let Some(body) = step.loop_body().map_err(invalid)? {
                validate_step(workflow_id, &body)?;
            }
            if items.is_empty() {
                warn!("Loop step '{}' has no items and will do nothing", step.step_id);
            }
        }
        _ => {}
    }

    if step.name.trim().is_empty() {
        debug!("Step '{}' has no display name", step.step_id);
    }

    Ok(())
}

/// Validates an entire workflow definition.
///
/// Performs the following checks:
/// 1. Workflow ID and name are present
/// 2. Workflow has at least one step and a non-zero timeout
/// 3. Step IDs are unique
/// 4. Every step (and nested sub-step) is well formed
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if definition.id.trim().is_empty() {
        return Err(DefinitionError::EmptyWorkflowId);
    }

    if definition.name.trim().is_empty() {
        return Err(DefinitionError::EmptyName(definition.id.clone()));
    }

    if definition.steps.is_empty() {
        return Err(DefinitionError::EmptyWorkflow(definition.id.clone()));
    }

    if definition.timeout == 0 {
        return Err(DefinitionError::ZeroTimeout(format!("Workflow '{}'", definition.id)));
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for step in &definition.steps {
        if !seen_ids.insert(step.step_id.as_str()) {
            return Err(DefinitionError::DuplicateStepId(step.step_id.clone()));
        }
        validate_step(&definition.id, step)?;
    }

    info!(
        "Workflow '{}' validated: {} steps, max retries {}",
        definition.id,
        definition.steps.len(),
        definition.max_retries
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::WorkflowType;
    use serde_json::json;

    fn valid_definition() -> WorkflowDefinition {
        WorkflowDefinition::new("w1", "Workflow One", WorkflowType::Validation)
            .with_step(WorkflowStep::new("a", "A", StepType::Validation))
            .with_step(WorkflowStep::new("b", "B", StepType::Notify))
    }

    #[test]
    fn test_valid_definition() {
        assert!(validate_definition(&valid_definition()).is_ok());
    }

    #[test]
    fn test_empty_id() {
        let mut def = valid_definition();
        def.id = "  ".to_string();
        assert_eq!(validate_definition(&def), Err(DefinitionError::EmptyWorkflowId));
    }

    #[test]
    fn test_empty_name() {
        let mut def = valid_definition();
        def.name = String::new();
        assert_eq!(
            validate_definition(&def),
            Err(DefinitionError::EmptyName("w1".to_string()))
        );
    }

    #[test]
    fn test_empty_workflow() {
        let def = WorkflowDefinition::new("w1", "W", WorkflowType::Cleanup);
        assert_eq!(
            validate_definition(&def),
            Err(DefinitionError::EmptyWorkflow("w1".to_string()))
        );
    }

    #[test]
    fn test_duplicate_step_ids() {
        let def = valid_definition().with_step(WorkflowStep::new("a", "Again", StepType::Export));
        assert_eq!(
            validate_definition(&def),
            Err(DefinitionError::DuplicateStepId("a".to_string()))
        );
    }

    #[test]
    fn test_zero_step_timeout() {
        let def = valid_definition()
            .with_step(WorkflowStep::new("c", "C", StepType::Delay).with_timeout(0));
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::ZeroTimeout(_))
        ));
    }

    #[test]
    fn test_zero_workflow_timeout() {
        let def = valid_definition().with_timeout(0);
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::ZeroTimeout(_))
        ));
    }

    #[test]
    fn test_parallel_without_steps_rejected() {
        let def = valid_definition()
            .with_step(WorkflowStep::new("fan", "Fan", StepType::Parallel));
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn test_parallel_sub_steps_validated() {
        let def = valid_definition().with_step(
            WorkflowStep::new("fan", "Fan", StepType::Parallel).with_parameter(
                "steps",
                json!([
                    {"step_id": "x", "step_type": "export"},
                    {"step_id": "x", "step_type": "export"}
                ]),
            ),
        );
        assert_eq!(
            validate_definition(&def),
            Err(DefinitionError::DuplicateStepId("x".to_string()))
        );
    }

    #[test]
    fn test_loop_with_bad_body_rejected() {
        let def = valid_definition().with_step(
            WorkflowStep::new("each", "Each", StepType::Loop)
                .with_parameter("items", json!([1, 2]))
                .with_parameter("body", json!({"step_id": "b", "step_type": "bogus"})),
        );
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::InvalidParameters { .. })
        ));
    }
}
