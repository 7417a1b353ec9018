use crate::domain::instance::{ActivityId, FunctionId, InstanceId};
use crate::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an audit log entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOperation {
    /// A function handler ran
    FunctionInvoked,
    /// A routing decision fired a transition
    TransitionTaken,
    /// A branch arrived at a synchronization activity
    JoinArrival,
    /// The instance status changed
    StatusChanged,
    /// Something unexpected but non-fatal happened
    Anomaly,
}

/// One append-only audit log entry for an instance.
///
/// Entries carry a per-logger monotonic sequence number so readers can
/// order them without trusting wall-clock timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Instance the entry belongs to
    pub instance_id: InstanceId,

    /// Monotonic sequence number
    pub sequence: u64,

    /// What happened
    pub operation: LogOperation,

    /// Activity in scope when the entry was written
    pub activity_id: Option<ActivityId>,

    /// Function in scope, for function entries
    pub function_id: Option<FunctionId>,

    /// Human-readable message
    pub message: String,

    /// Structured detail payload
    pub detail: Payload,

    /// When the entry was written
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Create a new entry with the current timestamp
    pub fn new(
        instance_id: InstanceId,
        sequence: u64,
        operation: LogOperation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            instance_id,
            sequence,
            operation,
            activity_id: None,
            function_id: None,
            message: message.into(),
            detail: Payload::null(),
            timestamp: Utc::now(),
        }
    }

    /// Attach the activity in scope
    pub fn with_activity(mut self, activity_id: ActivityId) -> Self {
        self.activity_id = Some(activity_id);
        self
    }

    /// Attach the function in scope
    pub fn with_function(mut self, function_id: FunctionId) -> Self {
        self.function_id = Some(function_id);
        self
    }

    /// Attach a structured detail payload
    pub fn with_detail(mut self, detail: Payload) -> Self {
        self.detail = detail;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_entry_builder() {
        let entry = LogEntry::new(
            InstanceId("i1".to_string()),
            3,
            LogOperation::FunctionInvoked,
            "handler ran",
        )
        .with_activity(ActivityId("a1".to_string()))
        .with_function(FunctionId("f1".to_string()))
        .with_detail(Payload::new(json!({"directive": "Continue"})));

        assert_eq!(entry.sequence, 3);
        assert_eq!(entry.operation, LogOperation::FunctionInvoked);
        assert_eq!(entry.activity_id, Some(ActivityId("a1".to_string())));
        assert_eq!(entry.function_id, Some(FunctionId("f1".to_string())));
        assert_eq!(entry.detail.get("directive"), Some(&json!("Continue")));
    }

    #[test]
    fn test_log_entry_serialization() {
        let entry = LogEntry::new(
            InstanceId("i1".to_string()),
            0,
            LogOperation::StatusChanged,
            "started",
        );

        let serialized = serde_json::to_string(&entry).unwrap();
        let deserialized: LogEntry = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.instance_id, entry.instance_id);
        assert_eq!(deserialized.operation, LogOperation::StatusChanged);
        assert_eq!(deserialized.message, "started");
        assert!(deserialized.activity_id.is_none());
    }
}
