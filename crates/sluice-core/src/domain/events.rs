use crate::domain::instance::{ActivityId, InstanceId, WorkflowId};
use crate::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Domain event trait for all events emitted by the engine
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the instance this event is associated with
    fn instance_id(&self) -> &InstanceId;

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Handler for domain events, injected into the scheduler.
///
/// Terminal-state events (completed, cancelled, errored) flow through
/// here for downstream notification consumers.
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle a domain event
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), EngineError>;
}

/// Event handler that forwards every event to tracing
pub struct TracingEventHandler;

#[async_trait]
impl DomainEventHandler for TracingEventHandler {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), EngineError> {
        tracing::info!(
            instance_id = %event.instance_id().0,
            event_type = %event.event_type(),
            "domain event"
        );
        Ok(())
    }
}

/// Event: instance created
#[derive(Debug)]
pub struct InstanceCreated {
    /// The instance that was created
    pub instance_id: InstanceId,

    /// The definition the instance executes
    pub workflow_id: WorkflowId,

    /// When the instance was created
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceCreated {
    fn event_type(&self) -> &'static str {
        "instance.created"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: instance moved to Started
#[derive(Debug)]
pub struct InstanceStarted {
    /// The instance that started
    pub instance_id: InstanceId,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceStarted {
    fn event_type(&self) -> &'static str {
        "instance.started"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: instance parked at a new activity
#[derive(Debug)]
pub struct ActivityEntered {
    /// The instance
    pub instance_id: InstanceId,
    /// The activity that was entered
    pub activity_id: ActivityId,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for ActivityEntered {
    fn event_type(&self) -> &'static str {
        "instance.activity_entered"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: instance completed (terminal)
#[derive(Debug)]
pub struct InstanceCompleted {
    /// The instance that completed
    pub instance_id: InstanceId,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceCompleted {
    fn event_type(&self) -> &'static str {
        "instance.completed"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: instance cancelled (terminal)
#[derive(Debug)]
pub struct InstanceCancelled {
    /// The instance that was cancelled
    pub instance_id: InstanceId,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceCancelled {
    fn event_type(&self) -> &'static str {
        "instance.cancelled"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: instance handed back for re-assignment
#[derive(Debug)]
pub struct InstanceReassigned {
    /// The instance that was reassigned
    pub instance_id: InstanceId,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceReassigned {
    fn event_type(&self) -> &'static str {
        "instance.reassigned"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: instance stopped on an error
#[derive(Debug)]
pub struct InstanceErrored {
    /// The instance that errored
    pub instance_id: InstanceId,
    /// The error message
    pub error: String,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceErrored {
    fn event_type(&self) -> &'static str {
        "instance.errored"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_instance_id() -> InstanceId {
        InstanceId(Uuid::new_v4().to_string())
    }

    #[test]
    fn test_instance_created_event() {
        let instance_id = test_instance_id();
        let timestamp = Utc::now();

        let event = InstanceCreated {
            instance_id: instance_id.clone(),
            workflow_id: WorkflowId("wf1".to_string()),
            timestamp,
        };

        assert_eq!(event.event_type(), "instance.created");
        assert_eq!(event.instance_id(), &instance_id);
        assert_eq!(event.timestamp(), timestamp);
    }

    #[test]
    fn test_activity_entered_event() {
        let instance_id = test_instance_id();
        let timestamp = Utc::now();

        let event = ActivityEntered {
            instance_id: instance_id.clone(),
            activity_id: ActivityId("a1".to_string()),
            timestamp,
        };

        assert_eq!(event.event_type(), "instance.activity_entered");
        assert_eq!(event.instance_id(), &instance_id);
    }

    #[test]
    fn test_terminal_event_types() {
        let instance_id = test_instance_id();
        let timestamp = Utc::now();

        let completed = InstanceCompleted {
            instance_id: instance_id.clone(),
            timestamp,
        };
        let cancelled = InstanceCancelled {
            instance_id: instance_id.clone(),
            timestamp,
        };
        let errored = InstanceErrored {
            instance_id,
            error: "boom".to_string(),
            timestamp,
        };

        assert_eq!(completed.event_type(), "instance.completed");
        assert_eq!(cancelled.event_type(), "instance.cancelled");
        assert_eq!(errored.event_type(), "instance.errored");
    }

    #[tokio::test]
    async fn test_tracing_event_handler_accepts_events() {
        let handler = TracingEventHandler;
        let event = Box::new(InstanceStarted {
            instance_id: test_instance_id(),
            timestamp: Utc::now(),
        });

        assert!(handler.handle_event(event).await.is_ok());
    }
}
