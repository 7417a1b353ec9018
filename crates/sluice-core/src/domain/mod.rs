//! Domain model: definitions, instances, events, audit log and
//! repository traits.

/// Workflow definitions: activities, transitions, functions
pub mod definition;
/// Domain events and their handler seam
pub mod events;
/// The workflow instance aggregate and its status lattice
pub mod instance;
/// Append-only instance audit log entries
pub mod log;
/// Repository traits implemented by storage adapters
pub mod repository;

pub use definition::{
    Activity, ActivityKind, Condition, FunctionKind, Transition, TransitionKind,
    WorkflowDefinition, WorkflowFunction,
};
pub use events::{DomainEvent, DomainEventHandler, TracingEventHandler};
pub use instance::{
    ActivityId, BranchId, FunctionId, InstanceId, InstanceStatus, WorkflowId, WorkflowInstance,
};
pub use log::{LogEntry, LogOperation};
pub use repository::{DefinitionRepository, InstanceRepository, LogRepository};
