//! Control Handlers
//!
//! Handlers for steps that act on the workflow itself rather than on an
//! external service: waiting, evaluating conditions and notifying.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::info;
use serde_json::{json, Value};

use crate::error::HandlerError;
use crate::execution::handler::{StepHandler, StepRequest};
use crate::workflow::condition::ConditionEvaluator;
use crate::workflow::model::{Condition, Context};

/// Delay used when a DELAY step does not set `delay_seconds`.
pub const DEFAULT_DELAY_SECS: f64 = 60.0;

/// Sleeps for `delay_seconds` (fractions allowed).
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayHandler;

#[async_trait]
impl StepHandler for DelayHandler {
    async fn handle(&self, request: StepRequest) -> Result<Context, HandlerError> {
        let seconds = match request.parameters.get("delay_seconds") {
            None | Some(Value::Null) => DEFAULT_DELAY_SECS,
            Some(value) => value
                .as_f64()
                .ok_or_else(|| HandlerError::new("'delay_seconds' must be a non-negative number"))?,
        };
        let delay = Duration::try_from_secs_f64(seconds)
            .map_err(|e| HandlerError::new(format!("invalid 'delay_seconds' {}: {}", seconds, e)))?;

        tokio::time::sleep(delay).await;

        let mut output = Context::new();
        output.insert("delay_seconds".into(), json!(seconds));
        output.insert("completed_at".into(), json!(Utc::now().to_rfc3339()));
        Ok(output)
    }
}

/// Evaluates `parameters.conditions` against the execution context.
///
/// Always succeeds; the outcome is reported in `result` so later steps can
/// gate on `<step_id>.result`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionHandler {
    evaluator: ConditionEvaluator,
}

#[async_trait]
impl StepHandler for ConditionHandler {
    async fn handle(&self, request: StepRequest) -> Result<Context, HandlerError> {
        let conditions: Vec<Condition> = match request.parameters.get("conditions") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| HandlerError::new(format!("invalid conditions: {}", e)))?,
        };

        let result = self.evaluator.evaluate(&conditions, &request.context);

        let mut output = Context::new();
        output.insert("result".into(), json!(result));
        output.insert("conditions_evaluated".into(), json!(conditions.len()));
        Ok(output)
    }
}

/// Logs a notification; delivery channels are external to the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyHandler;

#[async_trait]
impl StepHandler for NotifyHandler {
    async fn handle(&self, request: StepRequest) -> Result<Context, HandlerError> {
        let method = request.param_str("method").unwrap_or("email").to_string();
        let template = request.param_str("template").unwrap_or("default").to_string();
        let recipients = request
            .parameters
            .get("recipients")
            .cloned()
            .unwrap_or_else(|| json!([]));

        info!(
            "[{}] notify via {} using template '{}' to {}",
            request.execution_id, method, template, recipients
        );

        let mut output = Context::new();
        output.insert("method".into(), json!(method));
        output.insert("template".into(), json!(template));
        output.insert("recipients".into(), recipients);
        output.insert("sent_at".into(), json!(Utc::now().to_rfc3339()));
        Ok(output)
    }
}
