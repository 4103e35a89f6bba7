//! Simulated BIM Service Handlers
//!
//! Stand-ins for the external BIM services (health checker, exporter,
//! format converter, HTTP APIs, file storage). They return payloads with the
//! same shape the real services report, so templates and conditions can be
//! exercised end to end without those services.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::HandlerError;
use crate::execution::handler::{StepHandler, StepRequest};
use crate::workflow::model::{Context, StepType};

/// Dry-run handler for service-backed step types.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedHandler;

impl SimulatedHandler {
    fn validation(request: &StepRequest) -> Context {
        let issues_found = request
            .parameters
            .get("issues_found")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let auto_apply = request
            .parameters
            .get("auto_apply_fixes")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let auto_fixes_applied = if auto_apply { issues_found / 2 } else { 0 };

        object(json!({
            "service": request.param_str("service").unwrap_or("bim_health_checker"),
            "issues_found": issues_found,
            "auto_fixes_applied": auto_fixes_applied,
            "suggested_fixes": issues_found - auto_fixes_applied,
        }))
    }

    fn export(request: &StepRequest) -> Context {
        let format = request.param_str("format").unwrap_or("json");
        let destination = request.param_str("destination").unwrap_or("exports/");

        object(json!({
            "format": format,
            "file_path": format!("{}export_{}.{}", destination, Utc::now().timestamp(), format),
        }))
    }

    fn transform(request: &StepRequest) -> Context {
        let transformations = request
            .parameters
            .get("transformations")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);

        object(json!({
            "transformations_applied": transformations,
            "output_format": request.parameters.get("output_format").cloned().unwrap_or(Value::Null),
        }))
    }

    fn api_call(request: &StepRequest) -> Result<Context, HandlerError> {
        let endpoint = request
            .param_str("endpoint")
            .ok_or_else(|| HandlerError::new("api_call step requires an 'endpoint'"))?;

        Ok(object(json!({
            "endpoint": endpoint,
            "method": request.param_str("method").unwrap_or("GET"),
            "response_code": 200,
        })))
    }

    fn file_operation(request: &StepRequest) -> Context {
        object(json!({
            "operation": request.param_str("operation").unwrap_or("read"),
            "file_path": request.param_str("file_path").unwrap_or_default(),
        }))
    }

    fn loop_item(request: &StepRequest) -> Context {
        let item = request.parameters.get("item").cloned().unwrap_or(Value::Null);
        let label = match &item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        object(json!({
            "item": item,
            "processed": format!("processed_{}", label),
        }))
    }
}

#[async_trait]
impl StepHandler for SimulatedHandler {
    async fn handle(&self, request: StepRequest) -> Result<Context, HandlerError> {
        match request.step_type {
            StepType::Validation => Ok(Self::validation(&request)),
            StepType::Export => Ok(Self::export(&request)),
            StepType::Transform => Ok(Self::transform(&request)),
            StepType::ApiCall => Self::api_call(&request),
            StepType::FileOperation => Ok(Self::file_operation(&request)),
            StepType::Loop => Ok(Self::loop_item(&request)),
            other => Err(HandlerError::new(format!(
                "simulated handler does not support '{}' steps",
                other
            ))),
        }
    }
}

fn object(value: Value) -> Context {
    match value {
        Value::Object(map) => map,
        _ => Context::new(),
    }
}
