//! Fan-in bookkeeping for AwaitParallel activities.

use crate::domain::instance::{ActivityId, BranchId, InstanceId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Outcome of recording a branch arrival at a join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    /// All expected branches have arrived; the join may proceed
    Complete,
    /// More branches are still outstanding
    Pending {
        /// Branches that have arrived so far
        arrived: usize,
        /// Branches the join is waiting for in total
        expected: usize,
    },
    /// This branch already arrived; the arrival is ignored
    Duplicate,
}

#[derive(Debug)]
struct JoinState {
    expected: usize,
    arrived: HashSet<BranchId>,
    deadline: Instant,
}

/// Tracks which branches have arrived at each open synchronization
/// point.
///
/// The expected branch count is snapshotted when the join opens (first
/// arrival) and never re-read afterward, so concurrent definition
/// edits cannot strand or double-fire a join. Arrivals are idempotent
/// per branch.
pub struct JoinTracker {
    joins: DashMap<(InstanceId, ActivityId), JoinState>,
    timeout: Duration,
}

impl JoinTracker {
    /// Create a tracker; joins left open longer than `timeout` are
    /// reported by [`JoinTracker::take_expired`]
    pub fn new(timeout: Duration) -> Self {
        Self {
            joins: DashMap::new(),
            timeout,
        }
    }

    /// Record a branch arrival at a join activity.
    ///
    /// `expected` is only used when this arrival opens the join; an
    /// already-open join keeps its original snapshot. When the arrival
    /// completes the join its state is removed, so a later re-entry of
    /// the same activity starts a fresh join.
    pub fn arrive(
        &self,
        instance_id: &InstanceId,
        activity_id: &ActivityId,
        branch: BranchId,
        expected: usize,
    ) -> Arrival {
        let key = (instance_id.clone(), activity_id.clone());
        let mut state = self.joins.entry(key.clone()).or_insert_with(|| JoinState {
            expected: expected.max(1),
            arrived: HashSet::new(),
            deadline: Instant::now() + self.timeout,
        });

        if !state.arrived.insert(branch) {
            return Arrival::Duplicate;
        }

        if state.arrived.len() >= state.expected {
            drop(state);
            self.joins.remove(&key);
            return Arrival::Complete;
        }

        let arrived = state.arrived.len();
        let expected = state.expected;
        Arrival::Pending { arrived, expected }
    }

    /// Drop all open joins for an instance (terminal status, restart)
    pub fn clear_instance(&self, instance_id: &InstanceId) {
        self.joins.retain(|(id, _), _| id != instance_id);
    }

    /// Remove and return the joins whose deadline has passed
    pub fn take_expired(&self) -> Vec<(InstanceId, ActivityId)> {
        let now = Instant::now();
        let expired: Vec<(InstanceId, ActivityId)> = self
            .joins
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for key in &expired {
            self.joins.remove(key);
        }
        expired
    }

    /// Number of joins currently open
    pub fn open_count(&self) -> usize {
        self.joins.len()
    }
}
