//! Built-in Workflow Templates
//!
//! Ready-made definitions for common BIM operations. They are registered
//! when `load_templates` is enabled in [`crate::config::EngineConfig`].

use serde_json::json;

use super::model::{Condition, StepType, WorkflowDefinition, WorkflowStep, WorkflowType};

/// Validates a floorplan, applies fixes when issues were found and reports.
pub fn bim_validation() -> WorkflowDefinition {
    WorkflowDefinition::new("bim_validation_workflow", "BIM Validation Workflow", WorkflowType::Validation)
        .with_description("Automated BIM validation with fix application")
        .with_timeout(900)
        .with_max_retries(2)
        .with_trigger(json!({"type": "file_change", "path": "floorplans/*.json"}))
        .with_step(
            WorkflowStep::new("validate_floorplan", "Validate Floorplan", StepType::Validation)
                .with_parameter("service", "bim_health_checker")
                .with_parameter("auto_apply_fixes", true)
                .with_timeout(300)
                .with_retry(2, 60),
        )
        .with_step(
            WorkflowStep::new("apply_fixes", "Apply Fixes", StepType::ApiCall)
                .with_parameter("endpoint", "/bim-health/apply-fixes")
                .with_parameter("method", "POST")
                .with_condition(Condition::greater_than("validate_floorplan.issues_found", 0))
                .with_timeout(120)
                .with_retry(1, 60),
        )
        .with_step(
            WorkflowStep::new("generate_report", "Generate Report", StepType::Export)
                .with_parameter("report_type", "validation_summary")
                .with_parameter("format", "pdf")
                .with_timeout(180)
                .with_retry(1, 60),
        )
}

/// Validates export data, converts it, uploads the file and notifies.
pub fn bim_export() -> WorkflowDefinition {
    WorkflowDefinition::new("bim_export_workflow", "BIM Export Workflow", WorkflowType::Export)
        .with_description("Automated BIM export with format conversion")
        .with_timeout(1200)
        .with_max_retries(3)
        .with_trigger(json!({"type": "api_call", "endpoint": "/export/request"}))
        .with_step(
            WorkflowStep::new("validate_data", "Validate Export Data", StepType::Validation)
                .with_parameter("service", "data_validator")
                .with_parameter("strict_mode", true)
                .with_timeout(120)
                .with_retry(1, 60),
        )
        .with_step(
            WorkflowStep::new("convert_format", "Convert Format", StepType::Transform)
                .with_parameter("input_format", "json")
                .with_parameter("output_format", "dxf")
                .with_parameter("options", json!({"scale": 1.0, "units": "mm"}))
                .with_timeout(300)
                .with_retry(2, 60),
        )
        .with_step(
            WorkflowStep::new("upload_file", "Upload File", StepType::FileOperation)
                .with_parameter("operation", "upload")
                .with_parameter("destination", "exports/")
                .with_parameter("naming", "timestamp")
                .with_timeout(180)
                .with_retry(2, 60),
        )
        .with_step(
            WorkflowStep::new("notify_completion", "Notify Completion", StepType::Notify)
                .with_parameter("method", "email")
                .with_parameter("template", "export_complete")
                .with_parameter("recipients", json!(["user@example.com"]))
                .with_timeout(60)
                .with_retry(1, 60),
        )
}

/// Loads, transforms and saves a data set on a nightly schedule.
pub fn data_processing() -> WorkflowDefinition {
    let mut definition = WorkflowDefinition::new(
        "data_processing_workflow",
        "Data Processing Workflow",
        WorkflowType::DataProcessing,
    )
    .with_description("Automated data processing and transformation")
    .with_timeout(600)
    .with_max_retries(2)
    .with_trigger(json!({"type": "schedule", "cron": "0 2 * * *"}))
    .with_step(
        WorkflowStep::new("load_data", "Load Data", StepType::FileOperation)
            .with_parameter("operation", "read")
            .with_parameter("file_type", "json")
            .with_parameter("encoding", "utf-8")
            .with_timeout(120)
            .with_retry(2, 60),
    )
    .with_step(
        WorkflowStep::new("transform_data", "Transform Data", StepType::Transform)
            .with_parameter(
                "transformations",
                json!([
                    {"type": "filter", "field": "status", "value": "active"},
                    {"type": "sort", "field": "timestamp", "order": "desc"},
                    {"type": "aggregate", "field": "category", "function": "count"}
                ]),
            )
            .with_timeout(180)
            .with_retry(1, 60),
    )
    .with_step(
        WorkflowStep::new("save_results", "Save Results", StepType::FileOperation)
            .with_parameter("operation", "write")
            .with_parameter("file_type", "json")
            .with_parameter("compression", true)
            .with_timeout(120)
            .with_retry(1, 60),
    );

    definition.schedule = Some("0 2 * * *".to_string());
    definition
}

/// All built-in templates.
pub fn default_templates() -> Vec<WorkflowDefinition> {
    vec![bim_validation(), bim_export(), data_processing()]
}
