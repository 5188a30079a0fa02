//! Git adapter for the watcher and reconciler.
//!
//! Local queries run `git` directly; `push` goes through the timeout-bounded
//! process helper because it talks to the remote.

use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::CommitId;
use crate::io::process::run_command_with_timeout;

pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;

/// Version-control operations the reconciliation loop depends on.
pub trait VersionControl {
    /// Name of the checked-out branch (errors on detached HEAD).
    fn current_branch(&self) -> Result<String>;
    fn head_commit(&self) -> Result<CommitId>;
    /// Default branch of `remote`, without the remote prefix.
    fn default_branch(&self, remote: &str) -> Result<String>;
    /// Number of commits in a revision range such as `origin/main..HEAD`.
    fn commit_count(&self, range: &str) -> Result<u32>;
    fn merge_base(&self, left: &str, right: &str) -> Result<CommitId>;
    /// Commit subjects in `range`, most recent first, at most `limit` entries.
    fn commit_log(&self, range: &str, limit: usize) -> Result<Vec<String>>;
    /// Create or fast-forward `branch` on `remote`.
    fn push(&self, remote: &str, branch: &str) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    push_timeout: Duration,
    output_limit_bytes: usize,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_push_timeout(mut self, timeout: Duration, output_limit_bytes: usize) -> Self {
        self.push_timeout = timeout;
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    /// Top-level directory of the repository containing `workdir`.
    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// True if `refs/remotes/<remote>/<branch>` exists locally.
    pub fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/remotes/{remote}/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Working-tree mutations used to build scratch repositories in tests.
#[cfg(any(test, feature = "test-support"))]
impl Git {
    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }
}

impl VersionControl for Git {
    #[instrument(skip_all)]
    fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (no branch to open a pull request from)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    fn head_commit(&self) -> Result<CommitId> {
        let out = self.run_capture(&["rev-parse", "--verify", "HEAD"])?;
        Ok(CommitId::new(out.trim()))
    }

    #[instrument(skip_all, fields(remote))]
    fn default_branch(&self, remote: &str) -> Result<String> {
        let head_ref = format!("refs/remotes/{remote}/HEAD");
        let out = self.run(&["symbolic-ref", "--quiet", "--short", &head_ref])?;
        if out.status.success() {
            let full = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if let Some(branch) = parse_remote_head(&full, remote) {
                debug!(branch = %branch, "default branch from remote HEAD");
                return Ok(branch);
            }
        }
        for candidate in ["main", "master"] {
            if self.remote_branch_exists(remote, candidate)? {
                debug!(branch = candidate, "default branch from remote-tracking refs");
                return Ok(candidate.to_string());
            }
        }
        Err(anyhow!(
            "cannot determine default branch of remote '{remote}' (set base_branch in config)"
        ))
    }

    fn commit_count(&self, range: &str) -> Result<u32> {
        let out = self.run_capture(&["rev-list", "--count", range])?;
        out.trim()
            .parse()
            .with_context(|| format!("parse commit count for {range}: '{}'", out.trim()))
    }

    fn merge_base(&self, left: &str, right: &str) -> Result<CommitId> {
        let out = self.run_capture(&["merge-base", left, right])?;
        Ok(CommitId::new(out.trim()))
    }

    fn commit_log(&self, range: &str, limit: usize) -> Result<Vec<String>> {
        let limit_arg = format!("--max-count={limit}");
        let out = self.run_capture(&["log", "--format=%s", &limit_arg, range])?;
        Ok(parse_subjects(&out))
    }

    #[instrument(skip_all, fields(remote, branch))]
    fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("{branch}:refs/heads/{branch}");
        let mut cmd = Command::new("git");
        cmd.args(["push", "--set-upstream", remote, &refspec])
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0");
        let output = run_command_with_timeout(cmd, self.push_timeout, self.output_limit_bytes)
            .with_context(|| format!("git push {remote} {branch}"))?;
        output.ensure_success(&format!("git push {remote} {branch}"))?;
        info!(remote, branch, "pushed branch");
        Ok(())
    }
}

/// Strip `<remote>/` from the short form of `refs/remotes/<remote>/HEAD`.
fn parse_remote_head(short: &str, remote: &str) -> Option<String> {
    let branch = short.strip_prefix(remote)?.strip_prefix('/')?;
    if branch.is_empty() || branch == "HEAD" {
        return None;
    }
    Some(branch.to_string())
}

fn parse_subjects(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn parses_remote_head() {
        assert_eq!(
            parse_remote_head("origin/main", "origin").as_deref(),
            Some("main")
        );
        assert_eq!(
            parse_remote_head("upstream/release/2.x", "upstream").as_deref(),
            Some("release/2.x")
        );
        assert_eq!(parse_remote_head("origin/HEAD", "origin"), None);
        assert_eq!(parse_remote_head("other/main", "origin"), None);
    }

    #[test]
    fn parses_subjects_skipping_blank_lines() {
        assert_eq!(
            parse_subjects("feat: b\n\nfix: a\n"),
            vec!["feat: b".to_string(), "fix: a".to_string()]
        );
    }

    #[test]
    fn counts_and_logs_commits_ahead_of_remote() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        git.checkout_new_branch("agent/t-1").expect("branch");
        repo.commit_file("a.txt", "a", "first").expect("commit");
        repo.commit_file("b.txt", "b", "second").expect("commit");

        assert_eq!(git.default_branch("origin").expect("default"), "main");
        assert_eq!(git.commit_count("origin/main..HEAD").expect("count"), 2);
        let base = git.merge_base("origin/main", "HEAD").expect("merge base");
        let log = git
            .commit_log(&format!("{base}..HEAD"), 10)
            .expect("log");
        assert_eq!(log, vec!["second".to_string(), "first".to_string()]);
        assert_eq!(
            git.commit_log(&format!("{base}..HEAD"), 1).expect("log"),
            vec!["second".to_string()]
        );
    }

    #[test]
    fn push_creates_remote_branch() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        git.checkout_new_branch("agent/t-1").expect("branch");
        repo.commit_file("a.txt", "a", "first").expect("commit");

        git.push("origin", "agent/t-1").expect("push");
        let head = git.head_commit().expect("head");
        assert_eq!(
            repo.remote_branch_head("agent/t-1").expect("remote head"),
            Some(head)
        );
    }

    #[test]
    fn current_branch_rejects_detached_head() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let head = git.head_commit().expect("head");
        repo.git_checked(&["checkout", "--detach", head.as_str()])
            .expect("detach");
        let err = git.current_branch().unwrap_err();
        assert!(err.to_string().contains("detached HEAD"));
    }
}
