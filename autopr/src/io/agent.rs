//! Foreground launcher for the interactive agent.
//!
//! The [`AgentLauncher`] trait decouples the session runner from the actual
//! agent command. Tests use scripted launchers that mutate a repository and
//! return without spawning a terminal program.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use signal_hook::SigId;
use signal_hook::consts::SIGINT;
use tracing::{debug, info, instrument, warn};

/// How the agent process ended. Every variant is treated as end-of-session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentExit {
    /// The process ran and exited; `code` is `None` when killed by a signal.
    Exited { code: Option<i32> },
    /// The process could not be started.
    SpawnFailed { reason: String },
}

impl AgentExit {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0) })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Exited { code: Some(code) } => format!("agent exited with status {code}"),
            Self::Exited { code: None } => "agent terminated by signal".to_string(),
            Self::SpawnFailed { reason } => format!("agent failed to start: {reason}"),
        }
    }
}

/// Runs the interactive agent to completion on the calling thread.
pub trait AgentLauncher {
    fn launch(&self, prompt: Option<&str>) -> AgentExit;
}

/// Launches `command` with inherited stdio; the prompt, if any, is the last argument.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
    workdir: PathBuf,
}

impl CommandAgent {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            workdir: workdir.into(),
        }
    }
}

impl AgentLauncher for CommandAgent {
    #[instrument(
        skip_all,
        fields(program = self.command.first().map(String::as_str).unwrap_or(""))
    )]
    fn launch(&self, prompt: Option<&str>) -> AgentExit {
        let Some((program, args)) = self.command.split_first() else {
            return AgentExit::SpawnFailed {
                reason: "empty agent command".to_string(),
            };
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        if let Some(prompt) = prompt {
            cmd.arg(prompt);
        }

        let guard = InterruptGuard::install();
        info!(with_prompt = prompt.is_some(), "starting agent");
        let exit = match cmd.status() {
            Ok(status) => AgentExit::Exited {
                code: status.code(),
            },
            Err(err) => {
                warn!(err = %err, "failed to spawn agent");
                AgentExit::SpawnFailed {
                    reason: err.to_string(),
                }
            }
        };
        if guard.interrupted() {
            info!("agent session was interrupted");
        }
        debug!(?exit, "agent finished");
        exit
    }
}

/// Armed while no [`InterruptGuard`] is active: SIGINT then terminates autopr
/// as if no handler were installed. `None` if the action could not be registered.
static TERMINATE_ON_INTERRUPT: OnceLock<Option<Arc<AtomicBool>>> = OnceLock::new();

fn terminate_on_interrupt() -> Option<&'static Arc<AtomicBool>> {
    TERMINATE_ON_INTERRUPT
        .get_or_init(|| {
            let armed = Arc::new(AtomicBool::new(true));
            match signal_hook::flag::register_conditional_default(SIGINT, Arc::clone(&armed)) {
                Ok(_) => Some(armed),
                Err(err) => {
                    warn!(err = %err, "cannot register default SIGINT action");
                    None
                }
            }
        })
        .as_ref()
}

/// Keeps SIGINT from terminating the wrapper while the agent owns the terminal.
///
/// Ctrl-C still reaches the agent through the foreground process group; the
/// wrapper only records that it happened. Dropping the guard makes Ctrl-C
/// terminate autopr again.
struct InterruptGuard {
    id: Option<SigId>,
    interrupted: Arc<AtomicBool>,
}

impl InterruptGuard {
    fn install() -> Self {
        let interrupted = Arc::new(AtomicBool::new(false));
        let Some(armed) = terminate_on_interrupt() else {
            return Self {
                id: None,
                interrupted,
            };
        };
        let id = match signal_hook::flag::register(SIGINT, Arc::clone(&interrupted)) {
            Ok(id) => {
                armed.store(false, Ordering::SeqCst);
                Some(id)
            }
            Err(err) => {
                warn!(err = %err, "cannot capture SIGINT; Ctrl-C will also stop autopr");
                None
            }
        };
        Self { id, interrupted }
    }

    fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            signal_hook::low_level::unregister(id);
            if let Some(armed) = terminate_on_interrupt() {
                armed.store(true, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandAgent {
        CommandAgent::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            std::env::temp_dir(),
        )
    }

    #[test]
    fn reports_exit_code() {
        assert_eq!(
            sh("exit 0").launch(None),
            AgentExit::Exited { code: Some(0) }
        );
        let exit = sh("exit 3").launch(None);
        assert_eq!(exit, AgentExit::Exited { code: Some(3) });
        assert!(!exit.success());
        assert_eq!(exit.describe(), "agent exited with status 3");
    }

    #[test]
    fn prompt_is_passed_as_last_argument() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "printf '%s' \"$1\" > prompt.out".to_string(),
                "agent".to_string(),
            ],
            temp.path(),
        );
        let exit = agent.launch(Some("fix the login bug"));
        assert!(exit.success());
        let written = std::fs::read_to_string(temp.path().join("prompt.out")).expect("read");
        assert_eq!(written, "fix the login bug");
    }

    const SIGINT_CHILD_ENV: &str = "AUTOPR_SIGINT_CHILD";

    /// Runs in a re-executed copy of the test binary so the signals it raises
    /// cannot reach the rest of the suite.
    #[test]
    fn sigint_is_trapped_only_while_agent_runs() {
        use std::os::unix::process::ExitStatusExt;

        if std::env::var_os(SIGINT_CHILD_ENV).is_some() {
            let exit = sh("kill -INT $PPID; sleep 0.2").launch(None);
            assert!(exit.success());
            println!("survived interrupt during agent");
            signal_hook::low_level::raise(SIGINT).expect("raise");
            std::thread::sleep(std::time::Duration::from_millis(500));
            println!("survived interrupt after agent");
            return;
        }

        let exe = std::env::current_exe().expect("current exe");
        let out = Command::new(exe)
            .args([
                "io::agent::tests::sigint_is_trapped_only_while_agent_runs",
                "--exact",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(SIGINT_CHILD_ENV, "1")
            .output()
            .expect("spawn test binary");

        let stdout = String::from_utf8_lossy(&out.stdout);
        assert!(stdout.contains("survived interrupt during agent"), "stdout: {stdout}");
        assert!(!stdout.contains("survived interrupt after agent"), "stdout: {stdout}");
        assert_eq!(out.status.signal(), Some(SIGINT), "status: {:?}", out.status);
    }

    #[test]
    fn missing_program_is_a_spawn_failure() {
        let agent = CommandAgent::new(
            vec!["autopr-definitely-not-installed".to_string()],
            std::env::temp_dir(),
        );
        assert!(matches!(agent.launch(None), AgentExit::SpawnFailed { .. }));
        assert!(matches!(
            CommandAgent::new(Vec::new(), std::env::temp_dir()).launch(None),
            AgentExit::SpawnFailed { .. }
        ));
    }
}
