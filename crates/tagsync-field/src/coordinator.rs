//! Per-field coordination between local reconciliation and bulk sweeps.
//!
//! A field never reconciles its own selection while one of its sweeps is
//! in flight: the sweep rewrites the same stored values, and a local write
//! racing it would be overwritten or would overwrite the repair.

use std::collections::HashSet;

use tracing::debug;
use uuid::Uuid;

use tagsync_core::logging::{component, subsystem};
use tagsync_core::{identity_key, RefinedTag};

/// Coordination state of one field instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    SweepInFlight,
}

#[derive(Debug, Default)]
pub struct Coordinator {
    in_flight: HashSet<Uuid>,
    memo: Option<String>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CoordinatorState {
        if self.in_flight.is_empty() {
            CoordinatorState::Idle
        } else {
            CoordinatorState::SweepInFlight
        }
    }

    pub fn is_sweep_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn in_flight(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.in_flight.iter().copied()
    }

    pub fn tracks(&self, job_id: Uuid) -> bool {
        self.in_flight.contains(&job_id)
    }

    /// Record a submitted sweep.
    pub fn begin(&mut self, job_id: Uuid) {
        self.in_flight.insert(job_id);
    }

    /// Record a settled sweep. Returns true when this returned the field to
    /// [`CoordinatorState::Idle`].
    pub fn settle(&mut self, job_id: Uuid) -> bool {
        if !self.in_flight.remove(&job_id) {
            return false;
        }
        // the sweep may have rewritten stored values under an unchanged identity
        self.memo = None;
        self.in_flight.is_empty()
    }

    /// Forget the last reconciled identity so the next check runs.
    pub fn invalidate(&mut self) {
        self.memo = None;
    }

    /// Whether local reconciliation should run for this pair of tag sets.
    ///
    /// False while a sweep is in flight, and false when neither set's
    /// identity changed since the last run. A true answer records the new
    /// identity.
    pub fn should_reconcile(&mut self, selected: &[RefinedTag], canonical: &[RefinedTag]) -> bool {
        if self.is_sweep_in_flight() {
            debug!(
                subsystem = subsystem::FIELD,
                component = component::COORDINATOR,
                in_flight = self.in_flight.len(),
                "Sweep in flight, local reconcile suppressed"
            );
            return false;
        }

        let key = format!("{}|{}", identity_key(selected), identity_key(canonical));
        if self.memo.as_deref() == Some(key.as_str()) {
            debug!(
                subsystem = subsystem::FIELD,
                component = component::COORDINATOR,
                "Identity unchanged, local reconcile skipped"
            );
            return false;
        }
        self.memo = Some(key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(ids: &[&str]) -> Vec<RefinedTag> {
        ids.iter()
            .map(|id| RefinedTag::new(id.to_uppercase(), *id).with_id(*id))
            .collect()
    }

    #[test]
    fn test_identity_memo() {
        let mut coordinator = Coordinator::new();
        let canonical = tags(&["a", "b"]);

        assert!(coordinator.should_reconcile(&tags(&["a"]), &canonical));
        assert!(!coordinator.should_reconcile(&tags(&["a"]), &canonical));

        // reordering keeps the identity
        assert!(coordinator.should_reconcile(&tags(&["a", "b"]), &canonical));
        assert!(!coordinator.should_reconcile(&tags(&["b", "a"]), &canonical));

        coordinator.invalidate();
        assert!(coordinator.should_reconcile(&tags(&["b", "a"]), &canonical));
    }

    #[test]
    fn test_label_churn_keeps_identity() {
        let mut coordinator = Coordinator::new();
        let canonical = tags(&["a"]);
        let selected = tags(&["a"]);
        assert!(coordinator.should_reconcile(&selected, &canonical));

        let renamed = vec![RefinedTag::new("Renamed", "a").with_id("a")];
        assert!(!coordinator.should_reconcile(&selected, &renamed));
    }

    #[test]
    fn test_suppressed_while_in_flight() {
        let mut coordinator = Coordinator::new();
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();

        coordinator.begin(first);
        coordinator.begin(second);
        assert_eq!(coordinator.state(), CoordinatorState::SweepInFlight);
        assert!(!coordinator.should_reconcile(&tags(&["a"]), &tags(&["a"])));

        assert!(!coordinator.settle(first));
        assert!(coordinator.is_sweep_in_flight());
        assert!(coordinator.settle(second));
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
        assert!(coordinator.should_reconcile(&tags(&["a"]), &tags(&["a"])));
    }

    #[test]
    fn test_settle_invalidates_memo() {
        let mut coordinator = Coordinator::new();
        let selected = tags(&["a"]);
        assert!(coordinator.should_reconcile(&selected, &selected));

        let job = Uuid::now_v7();
        coordinator.begin(job);
        assert!(coordinator.settle(job));
        assert!(coordinator.should_reconcile(&selected, &selected));
    }

    #[test]
    fn test_settle_unknown_job_is_ignored() {
        let mut coordinator = Coordinator::new();
        let selected = tags(&["a"]);
        assert!(coordinator.should_reconcile(&selected, &selected));

        assert!(!coordinator.settle(Uuid::now_v7()));
        assert!(!coordinator.should_reconcile(&selected, &selected));
    }
}
