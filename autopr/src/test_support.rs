//! Test-only fakes and a scratch git repository with a bare remote.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::pr_text::DEFAULT_TITLE_TEMPLATE;
use crate::core::types::{CommitId, PrState, PullRequestRecord};
use crate::io::agent::{AgentExit, AgentLauncher};
use crate::io::git::{Git, VersionControl};
use crate::io::hosting::{CodeHost, CreatePrRequest, PullRequestExistsError};
use crate::reconcile::ReconcileSettings;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Settings targeting `origin/main` with the default title template.
pub fn settings(task_id: &str) -> ReconcileSettings {
    ReconcileSettings {
        remote: "origin".to_string(),
        base_branch: Some("main".to_string()),
        task_id: task_id.to_string(),
        title_template: DEFAULT_TITLE_TEMPLATE.to_string(),
        max_body_commits: 20,
        draft: false,
    }
}

/// A call recorded by [`FakeRepo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCall {
    CurrentBranch,
    HeadCommit,
    DefaultBranch(String),
    CommitCount(String),
    MergeBase(String, String),
    CommitLog(String, usize),
    Push(String, String),
}

#[derive(Debug)]
struct RepoState {
    branch: String,
    head: String,
    default_branch: String,
    ahead: u32,
    /// Most recent first.
    subjects: Vec<String>,
    next_commit: u32,
    push_error: Option<String>,
    head_read_failures: u32,
    pushes: Vec<(String, String)>,
    calls: Vec<RepoCall>,
}

/// In-memory [`VersionControl`] with scriptable head and ahead count.
#[derive(Debug)]
pub struct FakeRepo {
    state: Mutex<RepoState>,
}

impl FakeRepo {
    pub fn new(branch: &str, head: &str, ahead: u32) -> Self {
        let subjects = (1..=ahead).rev().map(|n| format!("commit {n}")).collect();
        Self {
            state: Mutex::new(RepoState {
                branch: branch.to_string(),
                head: head.to_string(),
                default_branch: "main".to_string(),
                ahead,
                subjects,
                next_commit: 1,
                push_error: None,
                head_read_failures: 0,
                pushes: Vec::new(),
                calls: Vec::new(),
            }),
        }
    }

    /// Replace the subjects (most recent first); `ahead` follows their count.
    pub fn with_subjects(self, subjects: &[&str]) -> Self {
        {
            let mut state = lock(&self.state);
            state.subjects = subjects.iter().map(|s| s.to_string()).collect();
            state.ahead = subjects.len() as u32;
        }
        self
    }

    pub fn with_default_branch(self, branch: &str) -> Self {
        lock(&self.state).default_branch = branch.to_string();
        self
    }

    pub fn set_head(&self, head: &str) {
        lock(&self.state).head = head.to_string();
    }

    /// Simulate the agent committing on the current branch.
    pub fn add_commit(&self, subject: &str) -> CommitId {
        let mut state = lock(&self.state);
        let id = format!("fake-{}", state.next_commit);
        state.next_commit += 1;
        state.head = id.clone();
        state.ahead += 1;
        state.subjects.insert(0, subject.to_string());
        CommitId::new(id)
    }

    pub fn fail_push(&self, message: &str) {
        lock(&self.state).push_error = Some(message.to_string());
    }

    pub fn fail_head_reads(&self, count: u32) {
        lock(&self.state).head_read_failures = count;
    }

    pub fn pushes(&self) -> Vec<(String, String)> {
        lock(&self.state).pushes.clone()
    }

    pub fn calls(&self) -> Vec<RepoCall> {
        lock(&self.state).calls.clone()
    }
}

impl VersionControl for FakeRepo {
    fn current_branch(&self) -> Result<String> {
        let mut state = lock(&self.state);
        state.calls.push(RepoCall::CurrentBranch);
        Ok(state.branch.clone())
    }

    fn head_commit(&self) -> Result<CommitId> {
        let mut state = lock(&self.state);
        state.calls.push(RepoCall::HeadCommit);
        if state.head_read_failures > 0 {
            state.head_read_failures -= 1;
            return Err(anyhow!("fatal: Unable to create '.git/index.lock': File exists"));
        }
        Ok(CommitId::new(state.head.clone()))
    }

    fn default_branch(&self, remote: &str) -> Result<String> {
        let mut state = lock(&self.state);
        state.calls.push(RepoCall::DefaultBranch(remote.to_string()));
        Ok(state.default_branch.clone())
    }

    fn commit_count(&self, range: &str) -> Result<u32> {
        let mut state = lock(&self.state);
        state.calls.push(RepoCall::CommitCount(range.to_string()));
        Ok(state.ahead)
    }

    fn merge_base(&self, left: &str, right: &str) -> Result<CommitId> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(RepoCall::MergeBase(left.to_string(), right.to_string()));
        Ok(CommitId::new("merge-base"))
    }

    fn commit_log(&self, range: &str, limit: usize) -> Result<Vec<String>> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(RepoCall::CommitLog(range.to_string(), limit));
        Ok(state.subjects.iter().take(limit).cloned().collect())
    }

    fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(RepoCall::Push(remote.to_string(), branch.to_string()));
        if let Some(message) = &state.push_error {
            return Err(anyhow!("git push {remote} {branch} failed: {message}"));
        }
        state.pushes.push((remote.to_string(), branch.to_string()));
        Ok(())
    }
}

/// A call recorded by [`FakeHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Find(String),
    Create(String),
}

#[derive(Debug, Default)]
struct HostState {
    prs: Vec<PullRequestRecord>,
    created: Vec<CreatePrRequest>,
    calls: Vec<HostCall>,
    next_number: u64,
    fail_next: Option<String>,
    fail_always: Option<String>,
    race_number: Option<u64>,
}

impl HostState {
    fn take_failure(&mut self) -> Option<String> {
        self.fail_next.take().or_else(|| self.fail_always.clone())
    }

    fn open(&mut self, branch: &str, number: u64) -> PullRequestRecord {
        let record = PullRequestRecord {
            number,
            url: format!("https://github.example/acme/widgets/pull/{number}"),
            state: PrState::Open,
            head_ref: branch.to_string(),
        };
        self.prs.push(record.clone());
        record
    }
}

/// In-memory [`CodeHost`] that enforces one open pull request per branch.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_existing(&self, branch: &str, number: u64) {
        lock(&self.state).open(branch, number);
    }

    /// Fail the next call with `message`.
    pub fn fail_next(&self, message: &str) {
        lock(&self.state).fail_next = Some(message.to_string());
    }

    pub fn fail_always(&self, message: &str) {
        lock(&self.state).fail_always = Some(message.to_string());
    }

    /// On the next create, a concurrent actor opens PR `number` first.
    pub fn race_on_create(&self, number: u64) {
        lock(&self.state).race_number = Some(number);
    }

    pub fn created(&self) -> Vec<CreatePrRequest> {
        lock(&self.state).created.clone()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.state).calls.clone()
    }

    pub fn open_for(&self, branch: &str) -> Vec<PullRequestRecord> {
        lock(&self.state)
            .prs
            .iter()
            .filter(|pr| pr.state == PrState::Open && pr.head_ref == branch)
            .cloned()
            .collect()
    }
}

impl CodeHost for FakeHost {
    fn find_open_pr(&self, branch: &str) -> Result<Option<PullRequestRecord>> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Find(branch.to_string()));
        if let Some(message) = state.take_failure() {
            return Err(anyhow!("gh pr list failed (exit 1): {message}"));
        }
        Ok(state
            .prs
            .iter()
            .find(|pr| pr.state == PrState::Open && pr.head_ref == branch)
            .cloned())
    }

    fn create_pr(&self, request: &CreatePrRequest) -> Result<PullRequestRecord> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Create(request.head.clone()));
        if let Some(message) = state.take_failure() {
            return Err(anyhow!("gh pr create failed (exit 1): {message}"));
        }
        if let Some(number) = state.race_number.take() {
            state.open(&request.head, number);
        }
        let exists = state
            .prs
            .iter()
            .any(|pr| pr.state == PrState::Open && pr.head_ref == request.head);
        if exists {
            return Err(PullRequestExistsError {
                branch: request.head.clone(),
            }
            .into());
        }
        state.next_number += 1;
        let number = 100 + state.next_number;
        state.created.push(request.clone());
        Ok(state.open(&request.head, number))
    }
}

/// [`AgentLauncher`] that runs a closure instead of a process.
pub struct ScriptedAgent<F> {
    script: F,
    prompts: Mutex<Vec<Option<String>>>,
}

impl<F: Fn() -> AgentExit> ScriptedAgent<F> {
    pub fn new(script: F) -> Self {
        Self {
            script,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Option<String>> {
        lock(&self.prompts).clone()
    }
}

impl<F: Fn() -> AgentExit> AgentLauncher for ScriptedAgent<F> {
    fn launch(&self, prompt: Option<&str>) -> AgentExit {
        lock(&self.prompts).push(prompt.map(str::to_string));
        (self.script)()
    }
}

/// Scratch working repository on `main`, with `origin` pointing at a bare repo.
#[derive(Debug)]
pub struct TestRepo {
    _temp: TempDir,
    root: PathBuf,
    remote: PathBuf,
}

impl TestRepo {
    /// Create the repo with one pushed commit on `main` and `origin/HEAD` set.
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let remote = temp.path().join("remote.git");
        let root = temp.path().join("work");
        std::fs::create_dir_all(&root).context("create work dir")?;

        run_git(temp.path(), &["init", "--bare", "--quiet", "remote.git"])?;
        run_git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"])?;

        run_git(&root, &["init", "--quiet"])?;
        run_git(&root, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        run_git(&root, &["config", "user.email", "autopr@example.com"])?;
        run_git(&root, &["config", "user.name", "autopr tests"])?;
        run_git(&root, &["config", "commit.gpgsign", "false"])?;
        let remote_str = remote
            .to_str()
            .ok_or_else(|| anyhow!("non-utf8 temp path"))?;
        run_git(&root, &["remote", "add", "origin", remote_str])?;

        let repo = Self {
            _temp: temp,
            root,
            remote,
        };
        repo.commit_file("README.md", "# scratch\n", "initial commit")?;
        run_git(&repo.root, &["push", "--quiet", "-u", "origin", "main"])?;
        run_git(&repo.root, &["remote", "set-head", "origin", "main"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git(&self) -> Git {
        Git::new(&self.root)
    }

    /// Write `name` and commit it; returns the new head.
    pub fn commit_file(&self, name: &str, contents: &str, message: &str) -> Result<CommitId> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        let git = self.git();
        git.add_all()?;
        if !git.commit_staged(message)? {
            return Err(anyhow!("nothing to commit for {name}"));
        }
        git.head_commit()
    }

    /// Run git in the working repository and return trimmed stdout.
    pub fn git_checked(&self, args: &[&str]) -> Result<String> {
        run_git(&self.root, args)
    }

    /// Head of `branch` in the bare remote, if the branch exists there.
    pub fn remote_branch_head(&self, branch: &str) -> Result<Option<CommitId>> {
        let out = Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .current_dir(&self.remote)
            .output()
            .context("spawn git rev-parse")?;
        if !out.status.success() {
            return Ok(None);
        }
        Ok(Some(CommitId::new(
            String::from_utf8_lossy(&out.stdout).trim(),
        )))
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !out.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}
