//! Function dispatch: named handler registry, user-function runtime
//! seam, and the built-in handlers.

use crate::domain::definition::{FunctionKind, WorkflowFunction};
use crate::{Directive, EngineError, FunctionCall, FunctionHandler, Invocation, Payload};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;

/// Named registry of system function handlers
#[derive(Default)]
pub struct FunctionRegistry {
    handlers: DashMap<String, Arc<dyn FunctionHandler>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Create a registry preloaded with the built-in handlers
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("set", Arc::new(SetHandler));
        registry.register("append", Arc::new(AppendHandler));
        registry.register("log", Arc::new(LogHandler));
        registry.register("noop", Arc::new(NoopHandler));
        registry.register("fail", Arc::new(FailHandler));
        registry
    }

    /// Register a handler under a name, replacing any previous one
    pub fn register(&self, name: &str, handler: Arc<dyn FunctionHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Resolve a handler by name
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn FunctionHandler>> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }
}

/// Runs user-defined function bodies.
///
/// The engine ships no interpreter; hosts plug one in here. The
/// declared parameters and the body travel with the function.
#[async_trait]
pub trait UserFunctionRuntime: Send + Sync {
    /// Run a user function and return its invocation outcome
    async fn run(
        &self,
        function: &WorkflowFunction,
        call: FunctionCall,
    ) -> Result<Invocation, EngineError>;
}

/// Dispatches workflow functions to their handlers.
///
/// A handler that returns an error is converted into a BreakWorkflow
/// invocation carrying the error as its result; only failures to
/// resolve a handler at all surface as engine errors.
pub struct FunctionInvoker {
    registry: Arc<FunctionRegistry>,
    user_runtime: Option<Arc<dyn UserFunctionRuntime>>,
}

impl FunctionInvoker {
    /// Create an invoker over a handler registry
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            user_runtime: None,
        }
    }

    /// Attach a runtime for user-defined functions
    pub fn with_user_runtime(mut self, runtime: Arc<dyn UserFunctionRuntime>) -> Self {
        self.user_runtime = Some(runtime);
        self
    }

    /// Invoke a function and return its directive and result
    pub async fn invoke(
        &self,
        function: &WorkflowFunction,
        call: FunctionCall,
    ) -> Result<Invocation, EngineError> {
        let outcome = match function.kind {
            FunctionKind::System => {
                let handler = self.registry.resolve(&function.name).ok_or_else(|| {
                    EngineError::FunctionExecutionError(format!(
                        "no handler registered for function {}",
                        function.name
                    ))
                })?;
                handler.call(call).await
            }
            FunctionKind::User => match &self.user_runtime {
                Some(runtime) => runtime.run(function, call).await,
                None => {
                    return Err(EngineError::FunctionExecutionError(format!(
                        "no user function runtime registered (function {})",
                        function.id.0
                    )))
                }
            },
        };

        match outcome {
            Ok(invocation) => Ok(invocation),
            Err(e) => {
                tracing::warn!(
                    function_id = %function.id.0,
                    error = %e,
                    "function handler failed; breaking workflow"
                );
                Ok(Invocation {
                    directive: Directive::BreakWorkflow,
                    result: Payload::new(json!({ "error": e.to_string() })),
                    context: None,
                })
            }
        }
    }
}

fn resolve_expression(expression: &str, context: &Payload) -> Result<serde_json::Value, EngineError> {
    // Literal JSON wins over a path lookup
    if let Ok(literal) = serde_json::from_str::<serde_json::Value>(expression) {
        return Ok(literal);
    }

    let compiled = jmespath::compile(expression).map_err(|e| {
        EngineError::FunctionExecutionError(format!("invalid expression {}: {}", expression, e))
    })?;
    let result = compiled.search(context.as_value()).map_err(|e| {
        EngineError::FunctionExecutionError(format!(
            "failed to evaluate expression {}: {}",
            expression, e
        ))
    })?;
    Ok(serde_json::to_value(&*result).unwrap_or(serde_json::Value::Null))
}

fn two_parameters(call: &FunctionCall, handler: &str) -> Result<(String, String), EngineError> {
    match call.parameters.as_slice() {
        [key, expression] => Ok((key.clone(), expression.clone())),
        other => Err(EngineError::FunctionExecutionError(format!(
            "{} expects [key, expression] parameters, got {} parameter(s)",
            handler,
            other.len()
        ))),
    }
}

/// Built-in: evaluate an expression and write it to a context key.
/// Parameters: `[key, expression]`.
pub struct SetHandler;

#[async_trait]
impl FunctionHandler for SetHandler {
    async fn call(&self, call: FunctionCall) -> Result<Invocation, EngineError> {
        let (key, expression) = two_parameters(&call, "set")?;
        let value = resolve_expression(&expression, &call.context)?;

        let mut context = call.context;
        context.set(&key, value.clone());

        Ok(Invocation {
            directive: Directive::Continue,
            result: Payload::new(value),
            context: Some(context),
        })
    }
}

/// Built-in: evaluate an expression and push it onto an array context
/// key, creating the array if absent. Parameters: `[key, expression]`.
pub struct AppendHandler;

#[async_trait]
impl FunctionHandler for AppendHandler {
    async fn call(&self, call: FunctionCall) -> Result<Invocation, EngineError> {
        let (key, expression) = two_parameters(&call, "append")?;
        let value = resolve_expression(&expression, &call.context)?;

        let mut context = call.context;
        let mut items = match context.get(&key) {
            Some(serde_json::Value::Array(existing)) => existing.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        };
        items.push(value.clone());
        context.set(&key, serde_json::Value::Array(items));

        Ok(Invocation {
            directive: Directive::Continue,
            result: Payload::new(value),
            context: Some(context),
        })
    }
}

/// Built-in: emit the joined parameters as a tracing event
pub struct LogHandler;

#[async_trait]
impl FunctionHandler for LogHandler {
    async fn call(&self, call: FunctionCall) -> Result<Invocation, EngineError> {
        let message = call.parameters.join(" ");
        tracing::info!(
            instance_id = %call.instance_id.0,
            activity_id = %call.activity_id.0,
            "{}",
            message
        );
        Ok(Invocation {
            directive: Directive::Continue,
            result: Payload::new(json!(message)),
            context: None,
        })
    }
}

/// Built-in: do nothing and continue
pub struct NoopHandler;

#[async_trait]
impl FunctionHandler for NoopHandler {
    async fn call(&self, _call: FunctionCall) -> Result<Invocation, EngineError> {
        Ok(Invocation {
            directive: Directive::Continue,
            result: Payload::null(),
            context: None,
        })
    }
}

/// Built-in: always fail; useful for exercising error paths in
/// definitions and operational drills
pub struct FailHandler;

#[async_trait]
impl FunctionHandler for FailHandler {
    async fn call(&self, call: FunctionCall) -> Result<Invocation, EngineError> {
        let reason = if call.parameters.is_empty() {
            "fail handler invoked".to_string()
        } else {
            call.parameters.join(" ")
        };
        Err(EngineError::FunctionExecutionError(reason))
    }
}
