//!
//! Sluice Core - workflow orchestration engine core
//!
//! This crate defines the engine: the domain model for workflow
//! definitions and instances, the repository seams, and the application
//! services that drive instances through their graphs. Hosts supply
//! storage adapters and function handlers; the engine supplies the
//! execution semantics.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Domain layer - definitions, instances, events, audit log
pub mod domain;

/// Application services - scheduler, router, joins, timers, invoker
pub mod application;

/// Core types
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use error::EngineError;
pub use types::Payload;

// Re-export main API types for easy use
pub use application::{
    AdvanceOutcome, Arrival, FunctionInvoker, FunctionRegistry, InstanceLogger, JoinTracker,
    ProcessScheduler, SchedulerConfig, TimerScheduler, TransitionRouter, Trigger, TriggerKind,
    UserFunctionRuntime,
};
pub use domain::definition::{
    Activity, ActivityKind, Condition, FunctionKind, Transition, TransitionKind,
    WorkflowDefinition, WorkflowFunction,
};
pub use domain::instance::{
    ActivityId, BranchId, FunctionId, InstanceId, InstanceStatus, WorkflowId, WorkflowInstance,
};
pub use domain::repository::{DefinitionRepository, InstanceRepository, LogRepository};

/// What a function tells the scheduler to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    /// Proceed to the next function
    Continue,
    /// Skip the rest of the current function list
    BreakOperation,
    /// Stop running this activity's functions and park the instance
    BreakFunction,
    /// Stop the activity and park the instance
    BreakActivity,
    /// Abort the whole workflow
    BreakWorkflow,
    /// Cancel the whole workflow
    CancelWorkflow,
    /// Run the same function again
    ReRunOperation,
    /// Run the same function again
    ReRunFunction,
    /// Run the whole activity again from its first function
    ReRunActivity,
    /// Reset the instance to the definition's Start activity
    RestartWorkflow,
}

/// Everything a handler gets to see for one invocation
#[derive(Debug, Clone)]
pub struct FunctionCall {
    /// Instance being advanced
    pub instance_id: InstanceId,

    /// Activity whose function list is running
    pub activity_id: ActivityId,

    /// Function being invoked
    pub function_id: FunctionId,

    /// Declared parameters of the function
    pub parameters: Vec<String>,

    /// Snapshot of the instance context
    pub context: Payload,

    /// Payload of the trigger that caused this advance
    pub trigger: Payload,

    /// Zero-based retry attempt of this invocation
    pub attempt: u32,
}

/// Outcome of one function invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    /// What the scheduler should do next
    pub directive: Directive,

    /// Result value; stored as the instance's last result
    pub result: Payload,

    /// Replacement context, when the handler changed it
    pub context: Option<Payload>,
}

impl Invocation {
    /// A plain Continue with a result and no context change
    pub fn ok(result: Payload) -> Self {
        Self {
            directive: Directive::Continue,
            result,
            context: None,
        }
    }
}

/// A function handler registered with the engine
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    /// Run the handler for one invocation
    async fn call(&self, call: FunctionCall) -> Result<Invocation, EngineError>;
}
