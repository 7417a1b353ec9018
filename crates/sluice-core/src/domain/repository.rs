use crate::domain::definition::WorkflowDefinition;
use crate::domain::instance::{InstanceId, InstanceStatus, WorkflowId, WorkflowInstance};
use crate::domain::log::LogEntry;
use crate::EngineError;
use async_trait::async_trait;

/// Read access to workflow definitions.
///
/// Definitions are authored outside the engine; the scheduler only
/// loads and validates them, so saves exist for tooling and tests.
#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    /// Find a definition by ID
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, EngineError>;

    /// Save a definition
    async fn save(&self, definition: &WorkflowDefinition) -> Result<(), EngineError>;

    /// List all definition IDs
    async fn list_ids(&self) -> Result<Vec<WorkflowId>, EngineError>;
}

/// Persistence for workflow instances
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Find an instance by ID
    async fn find_by_id(&self, id: &InstanceId) -> Result<Option<WorkflowInstance>, EngineError>;

    /// Save an instance (create or update)
    async fn save(&self, instance: &WorkflowInstance) -> Result<(), EngineError>;

    /// List instances, optionally filtered by definition and status
    async fn list(
        &self,
        workflow_id: Option<&WorkflowId>,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>, EngineError>;
}

/// Append-only store for instance audit log entries
#[async_trait]
pub trait LogRepository: Send + Sync {
    /// Append an entry
    async fn append(&self, entry: LogEntry) -> Result<(), EngineError>;

    /// All entries for an instance, in sequence order
    async fn list_for_instance(&self, id: &InstanceId) -> Result<Vec<LogEntry>, EngineError>;
}
