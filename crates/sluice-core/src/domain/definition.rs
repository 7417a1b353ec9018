use crate::domain::instance::{ActivityId, FunctionId, WorkflowId};
use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// A parsed and validated workflow definition.
///
/// Definitions are owned by the external designer/store; the engine
/// consumes them read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// ID of the workflow
    pub id: WorkflowId,

    /// Human-readable name
    pub name: String,

    /// Definition version
    pub version: String,

    /// The activities of the graph
    pub activities: Vec<Activity>,

    /// The typed edges between activities
    pub transitions: Vec<Transition>,

    /// Functions referenced by the activities
    pub functions: Vec<WorkflowFunction>,

    /// Whether the engine writes audit log entries for this definition
    pub enable_log: bool,

    /// Free-form metadata from the designer
    pub metadata: serde_json::Value,
}

/// The type of an activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    /// Entry node; exactly one per definition
    Start,
    /// Terminal node; at least one per definition
    End,
    /// Runs system functions without user interaction
    System,
    /// Parks until a user trigger arrives
    User,
    /// Delays re-entry by the configured pause duration
    Timer,
    /// Spawns nested workflow instances; completion is delivered as a trigger
    MultiInnerWorkflow,
    /// Synchronization point for converging parallel branches
    AwaitParallel,
}

/// A node in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// ID of the activity
    pub id: ActivityId,

    /// Human-readable name
    pub name: String,

    /// Activity type
    pub kind: ActivityKind,

    /// Functions executed before the main list
    pub pre_functions: Vec<FunctionId>,

    /// Main function list
    pub functions: Vec<FunctionId>,

    /// Functions executed after the main list
    pub after_functions: Vec<FunctionId>,

    /// Pause duration in milliseconds for Timer activities
    pub pause_ms: Option<u64>,

    /// Free-form activity settings
    pub settings: serde_json::Value,
}

impl Activity {
    /// The pause duration for a Timer activity; zero when unset
    #[inline]
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms.unwrap_or(0))
    }
}

/// The type of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    /// At most one Standard transition fires per routing decision
    Standard,
    /// All Parallel transitions fire as independent branches
    Parallel,
    /// Conditional transitions may select zero, one or many targets
    Conditional,
}

/// A directed, typed edge between two activities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Source activity
    pub source: ActivityId,

    /// Target activity
    pub target: ActivityId,

    /// Transition type
    pub kind: TransitionKind,

    /// Optional guard evaluated against the instance context
    pub condition: Option<Condition>,

    /// Declaration order; used as tie-break and for deterministic output
    pub order: u32,
}

/// Guard expression for a transition.
///
/// The expression is a JMESPath query over the instance context. When
/// `value` is set the query result must equal it; otherwise the result
/// only needs to be truthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// JMESPath expression over the instance context
    pub expression: String,

    /// Expected value of the expression, if any
    pub value: Option<serde_json::Value>,
}

/// Function kind: built-in or user-defined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Dispatched to a registered handler by name
    System,
    /// Interpreted code body bound with declared parameters
    User,
}

/// A function attached to an activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFunction {
    /// ID of the function
    pub id: FunctionId,

    /// Handler name for system functions, display name for user functions
    pub name: String,

    /// Function kind
    pub kind: FunctionKind,

    /// Declared parameters
    pub parameters: Vec<String>,

    /// Code body for user functions
    pub body: Option<String>,
}

impl WorkflowDefinition {
    /// Look up an activity by ID
    pub fn activity(&self, id: &ActivityId) -> Option<&Activity> {
        self.activities.iter().find(|a| &a.id == id)
    }

    /// Look up a function by ID
    pub fn function(&self, id: &FunctionId) -> Option<&WorkflowFunction> {
        self.functions.iter().find(|f| &f.id == id)
    }

    /// The definition's single Start activity
    pub fn start_activity(&self) -> Option<&Activity> {
        self.activities
            .iter()
            .find(|a| a.kind == ActivityKind::Start)
    }

    /// Number of transitions converging on the given activity
    pub fn incoming_count(&self, id: &ActivityId) -> usize {
        self.transitions.iter().filter(|t| &t.target == id).count()
    }

    /// Validate the structure of the definition
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.activities.is_empty() {
            return Err(EngineError::ValidationError(
                "workflow must have at least one activity".to_string(),
            ));
        }

        // Activity ID uniqueness
        let mut activity_ids = HashSet::new();
        for activity in &self.activities {
            if !activity_ids.insert(&activity.id) {
                return Err(EngineError::ValidationError(format!(
                    "duplicate activity ID: {}",
                    activity.id.0
                )));
            }
        }

        // Exactly one Start, at least one End
        let starts = self
            .activities
            .iter()
            .filter(|a| a.kind == ActivityKind::Start)
            .count();
        if starts != 1 {
            return Err(EngineError::ValidationError(format!(
                "workflow must have exactly one Start activity, found {}",
                starts
            )));
        }
        if !self
            .activities
            .iter()
            .any(|a| a.kind == ActivityKind::End)
        {
            return Err(EngineError::ValidationError(
                "workflow must have at least one End activity".to_string(),
            ));
        }

        // Transition endpoints must be members of the activity set
        for transition in &self.transitions {
            if !activity_ids.contains(&transition.source) {
                return Err(EngineError::ValidationError(format!(
                    "transition references unknown source activity: {}",
                    transition.source.0
                )));
            }
            if !activity_ids.contains(&transition.target) {
                return Err(EngineError::ValidationError(format!(
                    "transition references unknown target activity: {}",
                    transition.target.0
                )));
            }
        }

        // Function references must resolve
        let function_ids: HashSet<&FunctionId> = self.functions.iter().map(|f| &f.id).collect();
        for activity in &self.activities {
            for function_id in activity
                .pre_functions
                .iter()
                .chain(&activity.functions)
                .chain(&activity.after_functions)
            {
                if !function_ids.contains(function_id) {
                    return Err(EngineError::ValidationError(format!(
                        "activity {} references unknown function: {}",
                        activity.id.0, function_id.0
                    )));
                }
            }
        }

        // Every activity reachable from Start
        self.check_reachability()?;

        Ok(())
    }

    /// BFS from Start; every activity must be reachable
    fn check_reachability(&self) -> Result<(), EngineError> {
        let start = self
            .start_activity()
            .expect("validated above: exactly one Start");

        let mut visited: HashSet<&ActivityId> = HashSet::new();
        let mut frontier = vec![&start.id];
        visited.insert(&start.id);

        while let Some(current) = frontier.pop() {
            for transition in self.transitions.iter().filter(|t| &t.source == current) {
                if visited.insert(&transition.target) {
                    frontier.push(&transition.target);
                }
            }
        }

        for activity in &self.activities {
            if !visited.contains(&activity.id) {
                return Err(EngineError::ValidationError(format!(
                    "activity {} is not reachable from Start",
                    activity.id.0
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn activity(id: &str, kind: ActivityKind) -> Activity {
        Activity {
            id: ActivityId(id.to_string()),
            name: id.to_string(),
            kind,
            pre_functions: vec![],
            functions: vec![],
            after_functions: vec![],
            pause_ms: None,
            settings: json!({}),
        }
    }

    fn transition(source: &str, target: &str, order: u32) -> Transition {
        Transition {
            source: ActivityId(source.to_string()),
            target: ActivityId(target.to_string()),
            kind: TransitionKind::Standard,
            condition: None,
            order,
        }
    }

    fn linear_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId("wf".to_string()),
            name: "Test Workflow".to_string(),
            version: "1.0".to_string(),
            activities: vec![
                activity("start", ActivityKind::Start),
                activity("a", ActivityKind::System),
                activity("end", ActivityKind::End),
            ],
            transitions: vec![transition("start", "a", 0), transition("a", "end", 1)],
            functions: vec![],
            enable_log: true,
            metadata: json!({}),
        }
    }

    #[test]
    fn test_valid_definition() {
        assert!(linear_definition().validate().is_ok());
    }

    #[test]
    fn test_lookup_helpers() {
        let definition = linear_definition();

        assert_eq!(
            definition.start_activity().unwrap().id,
            ActivityId("start".to_string())
        );
        assert!(definition.activity(&ActivityId("a".to_string())).is_some());
        assert!(definition
            .activity(&ActivityId("missing".to_string()))
            .is_none());
        assert_eq!(definition.incoming_count(&ActivityId("end".to_string())), 1);
        assert_eq!(
            definition.incoming_count(&ActivityId("start".to_string())),
            0
        );
    }

    #[test]
    fn test_timer_pause() {
        let mut timer = activity("t", ActivityKind::Timer);
        assert_eq!(timer.pause(), Duration::from_millis(0));

        timer.pause_ms = Some(250);
        assert_eq!(timer.pause(), Duration::from_millis(250));
    }

    #[test]
    fn test_validate_rejects_duplicate_activity_ids() {
        let mut definition = linear_definition();
        definition.activities.push(activity("a", ActivityKind::System));

        let result = definition.validate();
        match result {
            Err(EngineError::ValidationError(msg)) => {
                assert!(msg.contains("duplicate activity ID"));
            }
            _ => panic!("Expected ValidationError"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_or_many_starts() {
        let mut no_start = linear_definition();
        no_start.activities[0].kind = ActivityKind::System;
        assert!(no_start.validate().is_err());

        let mut two_starts = linear_definition();
        two_starts.activities[1].kind = ActivityKind::Start;
        assert!(two_starts.validate().is_err());
    }

    #[test]
    fn test_validate_requires_end() {
        let mut definition = linear_definition();
        definition.activities[2].kind = ActivityKind::System;

        let result = definition.validate();
        match result {
            Err(EngineError::ValidationError(msg)) => {
                assert!(msg.contains("at least one End"));
            }
            _ => panic!("Expected ValidationError"),
        }
    }

    #[test]
    fn test_validate_rejects_dangling_transition() {
        let mut definition = linear_definition();
        definition.transitions.push(transition("a", "ghost", 2));

        let result = definition.validate();
        match result {
            Err(EngineError::ValidationError(msg)) => {
                assert!(msg.contains("unknown target activity"));
                assert!(msg.contains("ghost"));
            }
            _ => panic!("Expected ValidationError"),
        }
    }

    #[test]
    fn test_validate_rejects_unreachable_activity() {
        let mut definition = linear_definition();
        definition
            .activities
            .push(activity("island", ActivityKind::System));

        let result = definition.validate();
        match result {
            Err(EngineError::ValidationError(msg)) => {
                assert!(msg.contains("not reachable"));
                assert!(msg.contains("island"));
            }
            _ => panic!("Expected ValidationError"),
        }
    }

    #[test]
    fn test_validate_rejects_unknown_function_reference() {
        let mut definition = linear_definition();
        definition.activities[1]
            .functions
            .push(FunctionId("ghost-fn".to_string()));

        let result = definition.validate();
        match result {
            Err(EngineError::ValidationError(msg)) => {
                assert!(msg.contains("unknown function"));
            }
            _ => panic!("Expected ValidationError"),
        }
    }

    #[test]
    fn test_definition_serialization() {
        let definition = linear_definition();

        let serialized = serde_json::to_string(&definition).unwrap();
        let deserialized: WorkflowDefinition = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.id, definition.id);
        assert_eq!(deserialized.activities.len(), 3);
        assert_eq!(deserialized.transitions.len(), 2);
        assert!(deserialized.enable_log);
    }
}
