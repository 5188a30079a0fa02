//! Head-commit transition detection for the commit watcher.

use crate::core::types::CommitId;

/// What a single observation of the head commit means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// First sample since the watcher started; recorded as the baseline only.
    Baseline(CommitId),
    /// Head is the same as the previous sample.
    Unchanged,
    /// Head moved since the previous sample.
    Changed { from: CommitId, to: CommitId },
}

impl Observation {
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Tracks the last observed head commit.
///
/// The baseline always advances to the newest sample, independent of what the
/// caller does with a `Changed` observation, so a failed reconciliation is not
/// retried until the head moves again.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    baseline: Option<CommitId>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self) -> Option<&CommitId> {
        self.baseline.as_ref()
    }

    pub fn observe(&mut self, head: CommitId) -> Observation {
        match self.baseline.replace(head.clone()) {
            None => Observation::Baseline(head),
            Some(prev) if prev == head => Observation::Unchanged,
            Some(prev) => Observation::Changed {
                from: prev,
                to: head,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> CommitId {
        CommitId::new(s)
    }

    #[test]
    fn first_observation_only_sets_baseline() {
        let mut detector = ChangeDetector::new();
        assert_eq!(detector.observe(id("a")), Observation::Baseline(id("a")));
        assert_eq!(detector.baseline(), Some(&id("a")));
    }

    #[test]
    fn change_is_reported_iff_head_differs_from_previous_sample() {
        let mut detector = ChangeDetector::new();
        let samples = ["a", "a", "b", "b", "c", "a", "a"];
        let changes: Vec<bool> = samples
            .iter()
            .map(|s| detector.observe(id(s)).is_change())
            .collect();
        assert_eq!(changes, vec![false, false, true, false, true, true, false]);
    }

    #[test]
    fn changed_carries_both_endpoints() {
        let mut detector = ChangeDetector::new();
        detector.observe(id("a"));
        assert_eq!(
            detector.observe(id("b")),
            Observation::Changed {
                from: id("a"),
                to: id("b"),
            }
        );
        assert_eq!(detector.baseline(), Some(&id("b")));
    }
}
