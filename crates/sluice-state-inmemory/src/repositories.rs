use async_trait::async_trait;
use dashmap::DashMap;
use sluice_core::domain::log::LogEntry;
use sluice_core::{
    DefinitionRepository, EngineError, InstanceId, InstanceRepository, InstanceStatus,
    LogRepository, WorkflowDefinition, WorkflowId, WorkflowInstance,
};
use tokio::sync::RwLock;

/// In-memory implementation of the definition repository
#[derive(Default)]
pub struct InMemoryDefinitionRepository {
    definitions: DashMap<String, WorkflowDefinition>,
}

impl InMemoryDefinitionRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
        }
    }
}

#[async_trait]
impl DefinitionRepository for InMemoryDefinitionRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, EngineError> {
        Ok(self.definitions.get(&id.0).map(|entry| entry.clone()))
    }

    async fn save(&self, definition: &WorkflowDefinition) -> Result<(), EngineError> {
        self.definitions
            .insert(definition.id.0.clone(), definition.clone());
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<WorkflowId>, EngineError> {
        Ok(self
            .definitions
            .iter()
            .map(|entry| entry.value().id.clone())
            .collect())
    }
}

/// In-memory implementation of the instance repository
#[derive(Default)]
pub struct InMemoryInstanceRepository {
    instances: DashMap<String, WorkflowInstance>,
}

impl InMemoryInstanceRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }
}

#[async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn find_by_id(&self, id: &InstanceId) -> Result<Option<WorkflowInstance>, EngineError> {
        Ok(self.instances.get(&id.0).map(|entry| entry.clone()))
    }

    async fn save(&self, instance: &WorkflowInstance) -> Result<(), EngineError> {
        self.instances
            .insert(instance.id.0.clone(), instance.clone());
        Ok(())
    }

    async fn list(
        &self,
        workflow_id: Option<&WorkflowId>,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>, EngineError> {
        Ok(self
            .instances
            .iter()
            .filter(|entry| workflow_id.map_or(true, |w| &entry.value().workflow_id == w))
            .filter(|entry| status.map_or(true, |s| entry.value().status == s))
            .map(|entry| entry.value().clone())
            .collect())
    }
}

/// In-memory implementation of the log repository.
///
/// Entries are held in a single append-order vector; per-instance
/// reads scan it. Fine for the volumes tests and demos produce.
#[derive(Default)]
pub struct InMemoryLogRepository {
    entries: RwLock<Vec<LogEntry>>,
}

impl InMemoryLogRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LogRepository for InMemoryLogRepository {
    async fn append(&self, entry: LogEntry) -> Result<(), EngineError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn list_for_instance(&self, id: &InstanceId) -> Result<Vec<LogEntry>, EngineError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|entry| &entry.instance_id == id)
            .cloned()
            .collect())
    }
}
