//! Supervised agent session.
//!
//! A session runs the commit watcher on a scoped background thread while the
//! agent blocks the calling thread. When the agent exits, for any reason, the
//! watcher is stopped and joined, then one final reconciliation flushes
//! commits made after the last poll.

use std::thread;
use std::time::Duration;

use tracing::{error, info};

use crate::core::types::ReconcileOutcome;
use crate::io::agent::{AgentExit, AgentLauncher};
use crate::io::git::VersionControl;
use crate::io::hosting::CodeHost;
use crate::reconcile::Reconciler;
use crate::watcher::{CommitWatcher, StopSignal, WatchSummary};

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub agent: AgentExit,
    pub watch: WatchSummary,
    pub final_flush: ReconcileOutcome,
}

/// Run `agent` to completion under a commit watcher.
///
/// `on_outcome` sees every reconciliation outcome, from the watcher thread
/// while the agent runs and from the calling thread for the final flush.
pub fn run_session<V, H, A, N>(
    reconciler: &Reconciler<V, H>,
    agent: &A,
    prompt: Option<&str>,
    interval: Duration,
    on_outcome: N,
) -> SessionOutcome
where
    V: VersionControl + Sync,
    H: CodeHost + Sync,
    A: AgentLauncher + ?Sized,
    N: Fn(&ReconcileOutcome) + Sync,
{
    let stop = StopSignal::new();

    let (agent_exit, watch) = thread::scope(|scope| {
        let watcher = scope.spawn(|| {
            CommitWatcher::new(reconciler.vcs()).run(
                interval,
                &stop,
                || reconciler.attempt(),
                |outcome| on_outcome(outcome),
            )
        });

        let stop_on_exit = StopOnDrop(&stop);
        let agent_exit = agent.launch(prompt);
        info!(exit = %agent_exit.describe(), "agent finished, stopping watcher");
        drop(stop_on_exit);

        let watch = watcher.join().unwrap_or_else(|_| {
            error!("watcher thread panicked");
            WatchSummary::default()
        });
        (agent_exit, watch)
    });

    info!("final reconciliation");
    let final_flush = reconciler.attempt();
    on_outcome(&final_flush);

    SessionOutcome {
        agent: agent_exit,
        watch,
        final_flush,
    }
}

/// Stops the watcher when dropped, including while unwinding from a
/// panicking launcher, so the scope can join it.
struct StopOnDrop<'a>(&'a StopSignal);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::{Mutex, mpsc};
    use std::time::Instant;

    use super::*;
    use crate::test_support::{FakeHost, FakeRepo, ScriptedAgent, settings};

    const TICK: Duration = Duration::from_millis(20);

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn reconciler(repo: FakeRepo) -> Reconciler<FakeRepo, FakeHost> {
        Reconciler::new(repo, FakeHost::new(), settings("t-1"))
    }

    #[test]
    fn quiet_session_flushes_once_without_creating() {
        let r = reconciler(FakeRepo::new("agent/t-1", "a", 0));
        let agent = ScriptedAgent::new(|| AgentExit::Exited { code: Some(0) });
        let seen = Mutex::new(Vec::new());

        let outcome = run_session(&r, &agent, Some("do it"), TICK, |o| {
            seen.lock().expect("lock").push(o.clone());
        });

        assert!(outcome.agent.success());
        assert_eq!(outcome.final_flush, ReconcileOutcome::NoCommits);
        assert_eq!(outcome.watch.reconciliations, 0);
        assert_eq!(
            seen.into_inner().expect("lock"),
            vec![ReconcileOutcome::NoCommits]
        );
        assert_eq!(agent.prompts(), vec![Some("do it".to_string())]);
    }

    #[test]
    fn commit_during_session_opens_pull_request_then_flush_pushes() {
        let r = reconciler(FakeRepo::new("agent/t-1", "a", 0));
        let agent = ScriptedAgent::new(|| {
            // Let the watcher take its baseline.
            thread::sleep(TICK * 3);
            r.vcs().add_commit("feat: first");
            assert!(wait_until(Duration::from_secs(5), || r.host().created().len() == 1));
            AgentExit::Exited { code: Some(0) }
        });

        let outcome = run_session(&r, &agent, None, TICK, |_| {});

        assert_eq!(outcome.watch.reconciliations, 1);
        assert!(matches!(
            outcome.final_flush,
            ReconcileOutcome::Updated { commits: 1, .. }
        ));
        assert_eq!(r.host().created().len(), 1);
        assert_eq!(r.host().open_for("agent/t-1").len(), 1);
    }

    #[test]
    fn commit_right_before_exit_is_flushed() {
        let r = reconciler(FakeRepo::new("agent/t-1", "a", 0));
        let agent = ScriptedAgent::new(|| {
            r.vcs().add_commit("fix: last minute");
            AgentExit::Exited { code: None }
        });

        // An interval far longer than the session: only the baseline poll can run.
        let outcome = run_session(&r, &agent, None, Duration::from_secs(60), |_| {});

        assert_eq!(outcome.watch.reconciliations, 0);
        assert!(matches!(outcome.final_flush, ReconcileOutcome::Created { .. }));
        assert_eq!(r.host().created().len(), 1);
    }

    #[test]
    fn agent_spawn_failure_still_flushes() {
        let repo = FakeRepo::new("agent/t-1", "a", 2);
        let r = Reconciler::new(repo, FakeHost::new(), settings("t-1"));
        let agent = ScriptedAgent::new(|| AgentExit::SpawnFailed {
            reason: "not found".to_string(),
        });

        let outcome = run_session(&r, &agent, None, TICK, |_| {});
        assert!(!outcome.agent.success());
        assert!(matches!(
            outcome.final_flush,
            ReconcileOutcome::Created { commits: 2, .. }
        ));
    }

    #[test]
    fn panicking_launcher_still_stops_watcher() {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let r = reconciler(FakeRepo::new("agent/t-1", "a", 0));
            let agent = ScriptedAgent::new(|| -> AgentExit { panic!("launcher crashed") });
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                run_session(&r, &agent, None, TICK, |_| {})
            }));
            let _ = tx.send(result.is_err());
        });

        let panicked = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("session did not return after the launcher panicked");
        assert!(panicked);
    }

    #[test]
    fn failing_host_does_not_end_session() {
        let host = FakeHost::new();
        host.fail_always("HTTP 401: Bad credentials");
        let r = Reconciler::new(FakeRepo::new("agent/t-1", "a", 0), host, settings("t-1"));
        let agent = ScriptedAgent::new(|| {
            thread::sleep(TICK * 3);
            r.vcs().add_commit("one");
            thread::sleep(TICK * 5);
            r.vcs().add_commit("two");
            thread::sleep(TICK * 5);
            AgentExit::Exited { code: Some(0) }
        });

        let outcome = run_session(&r, &agent, None, TICK, |_| {});
        assert!(outcome.agent.success());
        assert!(outcome.watch.reconciliations >= 1);
        assert!(outcome.final_flush.is_failed());
    }
}
