use crate::{
    domain::events::{
        ActivityEntered, DomainEvent, InstanceCancelled, InstanceCompleted, InstanceCreated,
        InstanceErrored, InstanceReassigned, InstanceStarted,
    },
    EngineError, Payload,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Value object: Workflow definition ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

/// Value object: Workflow instance ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

/// Value object: Activity ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub String);

/// Value object: Function ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub String);

/// Value object: identity of one fan-out branch, derived from the
/// transition that opened it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchId(pub String);

/// Workflow instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Instance created, not yet picked up by the scheduler
    OnHold,

    /// Instance is actively advancing
    Started,

    /// Instance reached an End activity
    Completed,

    /// Instance was cancelled by a directive or an operator
    Cancelled,

    /// Instance was handed back for re-assignment and awaits a restart
    ReAssigned,

    /// Instance stopped on an unrecoverable error; retry or abort is explicit
    Error,
}

impl InstanceStatus {
    /// Completed and Cancelled admit no further status change
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Cancelled)
    }
}

/// Aggregate: one running execution of a workflow definition
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique identifier
    pub id: InstanceId,

    /// Definition this instance executes
    pub workflow_id: WorkflowId,

    /// Activity the instance is parked at; None once terminal
    pub current_activity: Option<ActivityId>,

    /// Current status
    pub status: InstanceStatus,

    /// Who or what started the instance
    pub starter: Option<String>,

    /// Business entity the instance is associated with
    pub entity: Option<String>,

    /// Mutable instance context visible to functions and conditions
    pub context: Payload,

    /// Result of the most recent function invocation
    pub last_result: Option<Payload>,

    /// Error message if the instance errored
    pub error: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Domain events recorded since the last take
    #[serde(skip)]
    pub events: Vec<Box<dyn DomainEvent>>,
}

// Manually implement Clone; domain events are not cloned
impl Clone for WorkflowInstance {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            workflow_id: self.workflow_id.clone(),
            current_activity: self.current_activity.clone(),
            status: self.status,
            starter: self.starter.clone(),
            entity: self.entity.clone(),
            context: self.context.clone(),
            last_result: self.last_result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            events: Vec::new(),
        }
    }
}

impl WorkflowInstance {
    /// Create a new instance parked at the definition's Start activity
    pub fn new(
        workflow_id: WorkflowId,
        start_activity: ActivityId,
        starter: Option<String>,
        entity: Option<String>,
        context: Payload,
    ) -> Self {
        let instance_id = InstanceId(Uuid::new_v4().to_string());
        let now = Utc::now();

        let mut instance = Self {
            id: instance_id.clone(),
            workflow_id: workflow_id.clone(),
            current_activity: Some(start_activity),
            status: InstanceStatus::OnHold,
            starter,
            entity,
            context,
            last_result: None,
            error: None,
            created_at: now,
            updated_at: now,
            events: Vec::with_capacity(8),
        };

        instance.record_event(Box::new(InstanceCreated {
            instance_id,
            workflow_id,
            timestamp: now,
        }));

        instance
    }

    /// Update the timestamp
    #[inline]
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Move the instance into the Started status.
    ///
    /// Allowed from OnHold (initial pickup), ReAssigned (resume after
    /// re-assignment) and Error (explicit retry).
    pub fn start(&mut self) -> Result<(), EngineError> {
        match self.status {
            InstanceStatus::OnHold | InstanceStatus::ReAssigned | InstanceStatus::Error => {}
            _ => {
                return Err(EngineError::InvalidTransition(format!(
                    "cannot start instance {} in status {:?}",
                    self.id.0, self.status
                )));
            }
        }

        self.status = InstanceStatus::Started;
        self.error = None;
        self.record_event(Box::new(InstanceStarted {
            instance_id: self.id.clone(),
            timestamp: Utc::now(),
        }));
        self.touch();
        Ok(())
    }

    /// Park the instance at a new activity
    pub fn enter_activity(&mut self, activity_id: ActivityId) {
        self.current_activity = Some(activity_id.clone());
        self.record_event(Box::new(ActivityEntered {
            instance_id: self.id.clone(),
            activity_id,
            timestamp: Utc::now(),
        }));
        self.touch();
    }

    /// Complete the instance (End activity reached)
    pub fn complete(&mut self) -> Result<(), EngineError> {
        if self.status != InstanceStatus::Started {
            return Err(EngineError::InvalidTransition(format!(
                "cannot complete instance {} in status {:?}",
                self.id.0, self.status
            )));
        }

        self.status = InstanceStatus::Completed;
        self.record_event(Box::new(InstanceCompleted {
            instance_id: self.id.clone(),
            timestamp: Utc::now(),
        }));
        self.touch();
        Ok(())
    }

    /// Cancel the instance; allowed from any non-terminal status
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "cannot cancel instance {} in status {:?}",
                self.id.0, self.status
            )));
        }

        self.status = InstanceStatus::Cancelled;
        self.record_event(Box::new(InstanceCancelled {
            instance_id: self.id.clone(),
            timestamp: Utc::now(),
        }));
        self.touch();
        Ok(())
    }

    /// Hand the instance back for re-assignment
    pub fn reassign(&mut self) -> Result<(), EngineError> {
        if self.status != InstanceStatus::Started {
            return Err(EngineError::InvalidTransition(format!(
                "cannot reassign instance {} in status {:?}",
                self.id.0, self.status
            )));
        }

        self.status = InstanceStatus::ReAssigned;
        self.record_event(Box::new(InstanceReassigned {
            instance_id: self.id.clone(),
            timestamp: Utc::now(),
        }));
        self.touch();
        Ok(())
    }

    /// Stop the instance on an error; retry and abort are explicit moves
    pub fn mark_error(&mut self, error: String) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "cannot mark instance {} errored in status {:?}",
                self.id.0, self.status
            )));
        }

        self.status = InstanceStatus::Error;
        self.error = Some(error.clone());
        self.record_event(Box::new(InstanceErrored {
            instance_id: self.id.clone(),
            error,
            timestamp: Utc::now(),
        }));
        self.touch();
        Ok(())
    }

    /// Reset the instance to the definition's Start activity (the
    /// RestartWorkflow directive)
    pub fn restart(&mut self, start_activity: ActivityId) -> Result<(), EngineError> {
        if self.status != InstanceStatus::Started {
            return Err(EngineError::InvalidTransition(format!(
                "cannot restart instance {} in status {:?}",
                self.id.0, self.status
            )));
        }

        self.current_activity = Some(start_activity);
        self.status = InstanceStatus::OnHold;
        self.touch();
        Ok(())
    }

    /// Record a domain event
    pub fn record_event(&mut self, event: Box<dyn DomainEvent>) {
        self.events.push(event);
    }

    /// Get and clear all recorded domain events
    pub fn take_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.events)
    }
}
