//! autopr: keep a pull request in sync with an interactive agent session.
//!
//! `autopr run` launches the agent in the foreground and polls the branch
//! head in the background; every new commit pushes the branch and opens (or
//! updates) its pull request. One final sync runs after the agent exits.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use autopr::core::types::ReconcileOutcome;
use autopr::exit_codes;
use autopr::io::agent::CommandAgent;
use autopr::io::config::{AutoprConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use autopr::io::git::{Git, VersionControl};
use autopr::io::hosting::GhCli;
use autopr::logging;
use autopr::reconcile::{ReconcileSettings, Reconciler};
use autopr::session::run_session;

#[derive(Parser)]
#[command(
    name = "autopr",
    version,
    about = "Keep a pull request in sync with an interactive coding-agent session"
)]
struct Cli {
    /// Run as if started in DIR.
    #[arg(short = 'C', long = "dir", global = true, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Config file [default: .autopr/config.toml in the repository root].
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `.autopr/config.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the agent and keep its pull request in sync until it exits.
    Run {
        /// Task identifier for the pull request title [default: current branch].
        #[arg(long)]
        task_id: Option<String>,

        /// Initial instruction passed to the agent.
        #[arg(long, conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// Read the initial instruction from a file.
        #[arg(long, value_name = "PATH")]
        prompt_file: Option<PathBuf>,

        /// Seconds between head-commit polls.
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,

        /// Agent command, overriding `agent.command` (after `--`).
        #[arg(last = true, value_name = "AGENT_CMD")]
        agent: Vec<String>,
    },
    /// Push the branch and open or update its pull request once.
    Reconcile {
        /// Task identifier for the pull request title [default: current branch].
        #[arg(long)]
        task_id: Option<String>,
    },
}

struct RunArgs {
    task_id: Option<String>,
    prompt: Option<String>,
    prompt_file: Option<PathBuf>,
    interval: Option<u64>,
    agent: Vec<String>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("autopr: {:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let start_dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let root = Git::new(&start_dir)
        .toplevel()
        .with_context(|| format!("{} is not inside a git repository", start_dir.display()))?;
    let config_path = cli
        .config
        .unwrap_or_else(|| root.join(DEFAULT_CONFIG_PATH));
    debug!(root = %root.display(), config = %config_path.display(), "resolved paths");

    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Run {
            task_id,
            prompt,
            prompt_file,
            interval,
            agent,
        } => cmd_run(
            &root,
            &config_path,
            RunArgs {
                task_id,
                prompt,
                prompt_file,
                interval,
                agent,
            },
        ),
        Command::Reconcile { task_id } => cmd_reconcile(&root, &config_path, task_id),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &AutoprConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, config_path: &Path, args: RunArgs) -> Result<i32> {
    let mut cfg = load_config(config_path)?;
    if let Some(interval) = args.interval {
        cfg.poll_interval_secs = interval;
    }
    if !args.agent.is_empty() {
        cfg.agent.command = args.agent;
    }
    cfg.validate()?;

    let prompt = resolve_prompt(
        root,
        args.prompt,
        args.prompt_file.as_deref(),
        cfg.agent.prompt_file.as_deref(),
    )?;
    let reconciler = build_reconciler(root, &cfg, args.task_id)?;
    let agent = CommandAgent::new(cfg.agent.command.clone(), root);

    eprintln!(
        "autopr: watching for commits every {}s (task {})",
        cfg.poll_interval_secs,
        reconciler.settings().task_id
    );
    let outcome = run_session(
        &reconciler,
        &agent,
        prompt.as_deref(),
        cfg.poll_interval(),
        report,
    );

    if outcome.agent.success() {
        Ok(exit_codes::OK)
    } else {
        eprintln!("autopr: {}", outcome.agent.describe());
        Ok(exit_codes::AGENT_FAILED)
    }
}

fn cmd_reconcile(root: &Path, config_path: &Path, task_id: Option<String>) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let reconciler = build_reconciler(root, &cfg, task_id)?;
    let outcome = reconciler.attempt();
    match &outcome {
        ReconcileOutcome::NoCommits => {
            eprintln!("autopr: no commits ahead of the base branch; nothing to do");
        }
        other => report(other),
    }
    if outcome.is_failed() {
        Ok(exit_codes::RECONCILE_FAILED)
    } else {
        Ok(exit_codes::OK)
    }
}

fn build_reconciler(
    root: &Path,
    cfg: &AutoprConfig,
    task_id: Option<String>,
) -> Result<Reconciler<Git, GhCli>> {
    let git = Git::new(root).with_push_timeout(cfg.command_timeout(), cfg.output_limit_bytes);
    let task_id = resolve_task_id(task_id, cfg.task_id.clone(), || git.current_branch())?;
    let host = GhCli::new(root, cfg.command_timeout(), cfg.output_limit_bytes);
    Ok(Reconciler::new(
        git,
        host,
        ReconcileSettings::from_config(cfg, task_id),
    ))
}

/// Flag, then config, then the current branch name.
fn resolve_task_id(
    flag: Option<String>,
    configured: Option<String>,
    branch: impl FnOnce() -> Result<String>,
) -> Result<String> {
    let task_id = match flag.or(configured) {
        Some(id) => id,
        None => branch().context("derive task id from the current branch (pass --task-id)")?,
    };
    let task_id = task_id.trim().to_string();
    if task_id.is_empty() {
        return Err(anyhow!("task id must not be empty"));
    }
    Ok(task_id)
}

/// Inline prompt, then `--prompt-file`, then `agent.prompt_file` (relative to `root`).
fn resolve_prompt(
    root: &Path,
    inline: Option<String>,
    flag_file: Option<&Path>,
    config_file: Option<&Path>,
) -> Result<Option<String>> {
    if inline.is_some() {
        return Ok(inline);
    }
    let path = match (flag_file, config_file) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(path)) => root.join(path),
        (None, None) => return Ok(None),
    };
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read prompt {}", path.display()))?;
    Ok(Some(contents))
}

fn report(outcome: &ReconcileOutcome) {
    if let Some(line) = outcome.status_line() {
        eprintln!("autopr: {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["autopr", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_with_agent_command() {
        let cli = Cli::parse_from([
            "autopr",
            "-C",
            "/tmp/repo",
            "run",
            "--task-id",
            "t-9",
            "--interval",
            "5",
            "--",
            "codex",
            "--full-auto",
        ]);
        assert_eq!(cli.dir.as_deref(), Some(Path::new("/tmp/repo")));
        let Command::Run {
            task_id,
            interval,
            agent,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(task_id.as_deref(), Some("t-9"));
        assert_eq!(interval, Some(5));
        assert_eq!(agent, vec!["codex", "--full-auto"]);
    }

    #[test]
    fn prompt_and_prompt_file_conflict() {
        let parsed = Cli::try_parse_from([
            "autopr",
            "run",
            "--prompt",
            "hi",
            "--prompt-file",
            "p.md",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn task_id_prefers_flag_then_config_then_branch() {
        let from_flag = resolve_task_id(Some("flag".into()), Some("cfg".into()), || {
            panic!("branch not needed")
        })
        .expect("flag");
        assert_eq!(from_flag, "flag");

        let from_cfg =
            resolve_task_id(None, Some("cfg".into()), || panic!("branch not needed")).expect("cfg");
        assert_eq!(from_cfg, "cfg");

        let from_branch =
            resolve_task_id(None, None, || Ok("agent/t-3".to_string())).expect("branch");
        assert_eq!(from_branch, "agent/t-3");

        assert!(resolve_task_id(Some("  ".into()), None, || Ok("x".into())).is_err());
    }

    #[test]
    fn prompt_resolution_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("cfg.md"), "from config").expect("write");
        let flag_path = temp.path().join("flag.md");
        fs::write(&flag_path, "from flag").expect("write");

        let inline = resolve_prompt(
            temp.path(),
            Some("inline".into()),
            Some(&flag_path),
            Some(Path::new("cfg.md")),
        )
        .expect("inline");
        assert_eq!(inline.as_deref(), Some("inline"));

        let flag = resolve_prompt(temp.path(), None, Some(&flag_path), Some(Path::new("cfg.md")))
            .expect("flag");
        assert_eq!(flag.as_deref(), Some("from flag"));

        let cfg = resolve_prompt(temp.path(), None, None, Some(Path::new("cfg.md"))).expect("cfg");
        assert_eq!(cfg.as_deref(), Some("from config"));

        assert_eq!(resolve_prompt(temp.path(), None, None, None).expect("none"), None);
        assert!(resolve_prompt(temp.path(), None, None, Some(Path::new("missing.md"))).is_err());
    }
}
