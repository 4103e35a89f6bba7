//! Step Handlers
//!
//! A [`StepHandler`] performs the work for one step type. Handlers are
//! looked up in a [`HandlerRegistry`] keyed by [`StepType`], so new step
//! types plug in without touching the engine.
//!
//! A handler returns its output as a JSON object. An output whose `status`
//! is `"failed"` counts as a failure with `error` as the message; any other
//! (or missing) status counts as success.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{HandlerError, StepError};
use crate::workflow::model::{Context, StepType};

/// Input for a single handler invocation.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub execution_id: String,
    pub step_id: String,
    pub step_type: StepType,
    pub parameters: Context,
    /// Snapshot of the execution context at dispatch time
    pub context: Context,
    /// 1-based attempt number
    pub attempt: u32,
}

impl StepRequest {
    /// Reads a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Reads a numeric parameter, accepting integers and floats.
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }
}

/// Performs the work of one step type.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, request: StepRequest) -> Result<Context, HandlerError>;
}

/// Adapter turning an async closure into a [`StepHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(StepRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Context, HandlerError>> + Send + 'static,
{
    async fn handle(&self, request: StepRequest) -> Result<Context, HandlerError> {
        (self.f)(request).await
    }
}

/// Wraps an async closure as a shareable handler.
///
/// # Example
///
/// ```
/// use bimflow::execution::{handler_fn, HandlerRegistry};
/// use bimflow::workflow::{Context, StepType};
///
/// let mut registry = HandlerRegistry::new();
/// registry.register(
///     StepType::Export,
///     handler_fn(|request| async move {
///         let mut output = Context::new();
///         output.insert("exported".into(), request.step_id.into());
///         Ok(output)
///     }),
/// );
/// assert!(registry.get(StepType::Export).is_some());
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(StepRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Context, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Interprets a handler's output map.
pub fn interpret_output(output: Context) -> Result<Context, StepError> {
    match output.get("status").and_then(Value::as_str) {
        Some("failed") => {
            let message = output
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("handler reported failure")
                .to_string();
            Err(StepError::Handler(message))
        }
        _ => Ok(output),
    }
}

/// Handlers keyed by step type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for a step type.
    pub fn register(&mut self, step_type: StepType, handler: Arc<dyn StepHandler>) -> &mut Self {
        self.handlers.insert(step_type, handler);
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, step_type: StepType, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.insert(step_type, handler);
        self
    }

    pub fn get(&self, step_type: StepType) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&step_type).cloned()
    }

    pub fn contains(&self, step_type: StepType) -> bool {
        self.handlers.contains_key(&step_type)
    }

    /// Registered step types in declaration order.
    pub fn step_types(&self) -> Vec<StepType> {
        StepType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(step_type: StepType) -> StepRequest {
        StepRequest {
            execution_id: "exec_1".into(),
            step_id: "a".into(),
            step_type,
            parameters: Context::new(),
            context: Context::new(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_handler_fn_invocation() {
        let handler = handler_fn(|request| async move {
            let mut output = Context::new();
            output.insert("attempt".into(), json!(request.attempt));
            Ok(output)
        });

        let output = handler.handle(request(StepType::Export)).await.unwrap();
        assert_eq!(output["attempt"], json!(1));
    }

    #[test]
    fn test_interpret_failed_status() {
        let mut output = Context::new();
        output.insert("status".into(), json!("failed"));
        output.insert("error".into(), json!("disk full"));

        assert_eq!(
            interpret_output(output),
            Err(StepError::Handler("disk full".into()))
        );
    }

    #[test]
    fn test_interpret_missing_status_is_success() {
        let mut output = Context::new();
        output.insert("rows".into(), json!(3));
        assert!(interpret_output(output).is_ok());

        let mut output = Context::new();
        output.insert("status".into(), json!("failed"));
        assert_eq!(
            interpret_output(output),
            Err(StepError::Handler("handler reported failure".into()))
        );
    }

    #[test]
    fn test_registry_lookup() {
        let registry = HandlerRegistry::new()
            .with(StepType::Notify, handler_fn(|_| async { Ok(Context::new()) }));

        assert!(registry.contains(StepType::Notify));
        assert!(registry.get(StepType::Export).is_none());
        assert_eq!(registry.step_types(), vec![StepType::Notify]);
    }

    #[test]
    fn test_request_params() {
        let mut req = request(StepType::Delay);
        req.parameters.insert("delay_seconds".into(), json!(1.5));
        req.parameters.insert("message".into(), json!("hi"));

        assert_eq!(req.param_f64("delay_seconds"), Some(1.5));
        assert_eq!(req.param_str("message"), Some("hi"));
        assert_eq!(req.param_str("missing"), None);
    }
}
