//! Commit watcher: polls the head commit and reconciles on every transition.
//!
//! The watcher is a single sequential loop, so reconciliation attempts never
//! overlap and the baseline needs no synchronization.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::change::{ChangeDetector, Observation};
use crate::core::types::ReconcileOutcome;
use crate::io::git::VersionControl;

/// Advisory stop flag that also wakes a sleeping watcher.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`. Returns true if the signal is (or becomes) set.
    pub fn wait(&self, timeout: Duration) -> bool {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = self
            .wake
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

/// Counters for a finished watch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub polls: u32,
    pub reconciliations: u32,
    /// Polls skipped because the head commit could not be read.
    pub failed_reads: u32,
}

#[derive(Debug)]
pub struct CommitWatcher<'a, V> {
    vcs: &'a V,
    detector: ChangeDetector,
    summary: WatchSummary,
}

impl<'a, V: VersionControl> CommitWatcher<'a, V> {
    pub fn new(vcs: &'a V) -> Self {
        Self {
            vcs,
            detector: ChangeDetector::new(),
            summary: WatchSummary::default(),
        }
    }

    pub fn summary(&self) -> WatchSummary {
        self.summary
    }

    /// Sample the head once; run `reconcile` if it moved since the last sample.
    ///
    /// The first successful sample only records the baseline.
    pub fn poll<F>(&mut self, reconcile: F) -> Option<ReconcileOutcome>
    where
        F: FnOnce() -> ReconcileOutcome,
    {
        self.summary.polls += 1;
        let head = match self.vcs.head_commit() {
            Ok(head) => head,
            Err(err) => {
                self.summary.failed_reads += 1;
                warn!(err = %format!("{err:#}"), "cannot read head commit, skipping poll");
                return None;
            }
        };
        match self.detector.observe(head) {
            Observation::Baseline(head) => {
                debug!(head = %head.short(), "baseline recorded");
                None
            }
            Observation::Unchanged => None,
            Observation::Changed { from, to } => {
                info!(from = %from.short(), to = %to.short(), "head moved");
                self.summary.reconciliations += 1;
                Some(reconcile())
            }
        }
    }

    /// Poll every `interval` until `stop` is set, reporting each outcome.
    ///
    /// An in-flight reconciliation always completes before the stop is observed.
    pub fn run<F, N>(
        mut self,
        interval: Duration,
        stop: &StopSignal,
        mut reconcile: F,
        mut on_outcome: N,
    ) -> WatchSummary
    where
        F: FnMut() -> ReconcileOutcome,
        N: FnMut(&ReconcileOutcome),
    {
        debug!(interval_ms = interval.as_millis() as u64, "watcher started");
        while !stop.is_stopped() {
            if let Some(outcome) = self.poll(&mut reconcile) {
                on_outcome(&outcome);
            }
            if stop.wait(interval) {
                break;
            }
        }
        debug!(summary = ?self.summary, "watcher stopped");
        self.summary
    }
}
