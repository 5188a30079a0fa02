//! Code-hosting adapter backed by the `gh` CLI.
//!
//! The [`CodeHost`] trait keeps the reconciler independent of `gh`; tests use
//! in-memory hosts that record calls instead of spawning processes.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::types::{PrState, PullRequestRecord};
use crate::io::process::run_command_with_timeout;

/// Parameters for opening a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePrRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub draft: bool,
}

/// Abstraction over the hosting service's pull request API.
pub trait CodeHost {
    /// Open pull request whose source branch is `branch`, if any.
    fn find_open_pr(&self, branch: &str) -> Result<Option<PullRequestRecord>>;
    fn create_pr(&self, request: &CreatePrRequest) -> Result<PullRequestRecord>;
}

/// The host rejected a create because the branch already has an open pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestExistsError {
    pub branch: String,
}

impl fmt::Display for PullRequestExistsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a pull request for branch '{}' already exists", self.branch)
    }
}

impl std::error::Error for PullRequestExistsError {}

/// [`CodeHost`] that shells out to `gh`.
#[derive(Debug, Clone)]
pub struct GhCli {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl GhCli {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("gh");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GH_PROMPT_DISABLED", "1")
            .env("NO_COLOR", "1");
        cmd
    }
}

impl CodeHost for GhCli {
    #[instrument(skip_all, fields(branch = %branch))]
    fn find_open_pr(&self, branch: &str) -> Result<Option<PullRequestRecord>> {
        let cmd = self.command(&[
            "pr",
            "list",
            "--head",
            branch,
            "--state",
            "open",
            "--json",
            "number,url,state,headRefName",
        ]);
        let output = run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .context("gh pr list")?;
        output.ensure_success("gh pr list")?;
        let found = parse_pr_list(&output.stdout_text(), branch)?;
        debug!(found = found.as_ref().map(|pr| pr.number), "queried open pull requests");
        Ok(found)
    }

    #[instrument(skip_all, fields(head = %request.head, base = %request.base))]
    fn create_pr(&self, request: &CreatePrRequest) -> Result<PullRequestRecord> {
        let mut args = vec![
            "pr",
            "create",
            "--head",
            request.head.as_str(),
            "--base",
            request.base.as_str(),
            "--title",
            request.title.as_str(),
            "--body",
            request.body.as_str(),
        ];
        if request.draft {
            args.push("--draft");
        }
        let output = run_command_with_timeout(
            self.command(&args),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("gh pr create")?;

        if !output.timed_out && !output.status.success() && is_already_exists(&output.stderr_text())
        {
            return Err(PullRequestExistsError {
                branch: request.head.clone(),
            }
            .into());
        }
        output.ensure_success("gh pr create")?;

        let record = parse_created_pr(&output.stdout_text(), &request.head)?;
        info!(number = record.number, url = %record.url, "created pull request");
        Ok(record)
    }
}

/// Pick the open pull request for `branch` out of `gh pr list --json` output.
fn parse_pr_list(json: &str, branch: &str) -> Result<Option<PullRequestRecord>> {
    let records: Vec<PullRequestRecord> =
        serde_json::from_str(json.trim()).context("parse gh pr list output")?;
    Ok(records
        .into_iter()
        .find(|pr| pr.state == PrState::Open && pr.head_ref == branch))
}

/// `gh pr create` prints the new pull request URL as its last stdout line.
fn parse_created_pr(stdout: &str, branch: &str) -> Result<PullRequestRecord> {
    let url = find_pull_url(stdout)
        .ok_or_else(|| anyhow!("gh pr create printed no pull request url: '{}'", stdout.trim()))?;
    let number = pull_number(url)
        .ok_or_else(|| anyhow!("cannot parse pull request number from '{url}'"))?;
    Ok(PullRequestRecord {
        number,
        url: url.to_string(),
        state: PrState::Open,
        head_ref: branch.to_string(),
    })
}

fn find_pull_url(text: &str) -> Option<&str> {
    text.split_whitespace()
        .rev()
        .find(|token| token.starts_with("http") && token.contains("/pull/"))
}

fn pull_number(url: &str) -> Option<u64> {
    let (_, tail) = url.rsplit_once("/pull/")?;
    tail.trim_end_matches('/').parse().ok()
}

fn is_already_exists(stderr: &str) -> bool {
    stderr.contains("already exists")
}
