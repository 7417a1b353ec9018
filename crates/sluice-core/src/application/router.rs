//! Deterministic routing over a definition's outgoing transitions.

use crate::domain::definition::{Condition, Transition, TransitionKind, WorkflowDefinition};
use crate::domain::instance::{ActivityId, BranchId};
use crate::{EngineError, Payload};

/// Evaluates a transition guard against the instance context
pub trait ConditionEvaluator: Send + Sync {
    /// Returns whether the condition holds for the given context
    fn evaluate(&self, condition: &Condition, context: &Payload) -> Result<bool, EngineError>;
}

/// JMESPath-backed condition evaluator.
///
/// When the condition carries an expected `value` the query result must
/// equal it; otherwise the result only needs to be truthy.
pub struct JmespathConditionEvaluator;

impl ConditionEvaluator for JmespathConditionEvaluator {
    fn evaluate(&self, condition: &Condition, context: &Payload) -> Result<bool, EngineError> {
        let compiled = jmespath::compile(&condition.expression).map_err(|e| {
            EngineError::ValidationError(format!(
                "invalid condition expression {}: {}",
                condition.expression, e
            ))
        })?;

        let result = compiled.search(context.as_value()).map_err(|e| {
            EngineError::FunctionExecutionError(format!(
                "failed to evaluate condition {}: {}",
                condition.expression, e
            ))
        })?;

        match &condition.value {
            Some(expected) => {
                let actual = serde_json::to_value(&*result).unwrap_or(serde_json::Value::Null);
                Ok(&actual == expected)
            }
            None => Ok(result.is_truthy()),
        }
    }
}

/// One branch selected by a routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedBranch {
    /// Identity of the branch, derived from the transition that opened it
    pub branch: BranchId,

    /// Activity the branch moves to
    pub target: ActivityId,

    /// Kind of the transition that fired
    pub kind: TransitionKind,

    /// Declaration order of the transition
    pub order: u32,
}

/// Decides which outgoing transitions fire when an activity finishes.
///
/// The decision is a pure function of the definition and the context:
/// all Parallel transitions fire, every matching Conditional transition
/// fires, and at most one Standard transition fires (first matching
/// guarded one in declaration order, else the unguarded default).
pub struct TransitionRouter {
    evaluator: Box<dyn ConditionEvaluator>,
}

impl TransitionRouter {
    /// Create a router with the given condition evaluator
    pub fn new(evaluator: Box<dyn ConditionEvaluator>) -> Self {
        Self { evaluator }
    }

    /// Route out of `source`, returning the selected branches in
    /// declaration order. An activity with no outgoing transitions
    /// routes to an empty set; a Standard fan-out where nothing fires
    /// is a `NoMatchingTransition` error.
    pub fn route(
        &self,
        definition: &WorkflowDefinition,
        source: &ActivityId,
        context: &Payload,
    ) -> Result<Vec<RoutedBranch>, EngineError> {
        let mut outgoing: Vec<&Transition> = definition
            .transitions
            .iter()
            .filter(|t| &t.source == source)
            .collect();
        outgoing.sort_by_key(|t| t.order);

        if outgoing.is_empty() {
            return Ok(Vec::new());
        }

        let mut fired: Vec<RoutedBranch> = Vec::new();
        let mut standard_default: Option<&Transition> = None;
        let mut standard_fired = false;
        let mut has_standard = false;

        for transition in &outgoing {
            match transition.kind {
                TransitionKind::Parallel => {
                    fired.push(Self::branch_for(transition));
                }
                TransitionKind::Conditional => {
                    if self.matches(transition, context)? {
                        fired.push(Self::branch_for(transition));
                    }
                }
                TransitionKind::Standard => {
                    has_standard = true;
                    if standard_fired {
                        continue;
                    }
                    match &transition.condition {
                        Some(condition) => {
                            if self.evaluator.evaluate(condition, context)? {
                                fired.push(Self::branch_for(transition));
                                standard_fired = true;
                            }
                        }
                        None => {
                            if standard_default.is_none() {
                                standard_default = Some(transition);
                            }
                        }
                    }
                }
            }
        }

        // The unguarded Standard transition is the fallback when no
        // guarded one matched
        if has_standard && !standard_fired {
            if let Some(default) = standard_default {
                fired.push(Self::branch_for(default));
            }
        }

        if fired.is_empty() && has_standard {
            return Err(EngineError::NoMatchingTransition(format!(
                "activity {} has no matching outgoing transition",
                source.0
            )));
        }

        fired.sort_by_key(|b| b.order);
        Ok(fired)
    }

    fn matches(&self, transition: &Transition, context: &Payload) -> Result<bool, EngineError> {
        match &transition.condition {
            Some(condition) => self.evaluator.evaluate(condition, context),
            None => Ok(true),
        }
    }

    fn branch_for(transition: &Transition) -> RoutedBranch {
        RoutedBranch {
            branch: BranchId(format!("{}:{}", transition.source.0, transition.order)),
            target: transition.target.clone(),
            kind: transition.kind,
            order: transition.order,
        }
    }
}
