//! Pull request reconciliation.
//!
//! One call makes the hosted pull request consistent with the local branch:
//! nothing when no commits are ahead of the base, create when no open pull
//! request exists, push otherwise. Repeating a call with no new commits
//! degenerates to a push.

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::pr_text::{BodyInputs, render_body, render_title};
use crate::core::types::ReconcileOutcome;
use crate::io::config::AutoprConfig;
use crate::io::git::VersionControl;
use crate::io::hosting::{CodeHost, CreatePrRequest, PullRequestExistsError};

/// Reconciler inputs that stay fixed for a whole session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub remote: String,
    /// Target branch; detected from the remote on every attempt when `None`.
    pub base_branch: Option<String>,
    pub task_id: String,
    pub title_template: String,
    pub max_body_commits: usize,
    pub draft: bool,
}

impl ReconcileSettings {
    pub fn from_config(cfg: &AutoprConfig, task_id: impl Into<String>) -> Self {
        Self {
            remote: cfg.remote.clone(),
            base_branch: cfg.base_branch.clone(),
            task_id: task_id.into(),
            title_template: cfg.pr.title_template.clone(),
            max_body_commits: cfg.pr.max_body_commits,
            draft: cfg.pr.draft,
        }
    }
}

#[derive(Debug)]
pub struct Reconciler<V, H> {
    vcs: V,
    host: H,
    settings: ReconcileSettings,
}

impl<V: VersionControl, H: CodeHost> Reconciler<V, H> {
    pub fn new(vcs: V, host: H, settings: ReconcileSettings) -> Self {
        Self {
            vcs,
            host,
            settings,
        }
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Reconcile once, converting any failure into [`ReconcileOutcome::Failed`].
    ///
    /// Never returns an error: callers retry on the next detected change.
    pub fn attempt(&self) -> ReconcileOutcome {
        match self.reconcile() {
            Ok(outcome) => outcome,
            Err(err) => {
                // The caller reports the outcome; keep this out of the default filter.
                debug!(err = %format!("{err:#}"), "reconciliation failed");
                ReconcileOutcome::Failed {
                    reason: format!("{err:#}"),
                }
            }
        }
    }

    /// Reconcile once, propagating the first failure.
    #[instrument(skip_all, fields(task_id = %self.settings.task_id))]
    pub fn reconcile(&self) -> Result<ReconcileOutcome> {
        let remote = self.settings.remote.as_str();
        let base = match &self.settings.base_branch {
            Some(base) => base.clone(),
            None => self.vcs.default_branch(remote)?,
        };
        let upstream = format!("{remote}/{base}");

        let commits = self.vcs.commit_count(&format!("{upstream}..HEAD"))?;
        if commits == 0 {
            debug!(upstream = %upstream, "no commits ahead of base");
            return Ok(ReconcileOutcome::NoCommits);
        }

        let branch = self.vcs.current_branch()?;
        if branch == base {
            return Err(anyhow!(
                "on base branch '{base}'; check out a feature branch to open a pull request"
            ));
        }

        if let Some(record) = self.host.find_open_pr(&branch)? {
            self.vcs.push(remote, &branch)?;
            info!(number = record.number, commits, "pushed to existing pull request");
            return Ok(ReconcileOutcome::Updated { record, commits });
        }

        self.vcs.push(remote, &branch)?;
        let request = self.compose(&branch, &base, &upstream, commits)?;
        match self.host.create_pr(&request) {
            Ok(record) => {
                info!(number = record.number, commits, "opened pull request");
                Ok(ReconcileOutcome::Created { record, commits })
            }
            Err(err) if err.downcast_ref::<PullRequestExistsError>().is_some() => {
                // Opened by someone else between the lookup and the create.
                let record = self.host.find_open_pr(&branch)?.ok_or(err)?;
                info!(number = record.number, "pull request appeared concurrently");
                Ok(ReconcileOutcome::Updated { record, commits })
            }
            Err(err) => Err(err),
        }
    }

    fn compose(
        &self,
        branch: &str,
        base: &str,
        upstream: &str,
        commits: u32,
    ) -> Result<CreatePrRequest> {
        let merge_base = self.vcs.merge_base(upstream, "HEAD")?;
        let subjects = self.vcs.commit_log(
            &format!("{merge_base}..HEAD"),
            self.settings.max_body_commits,
        )?;
        let title = render_title(&self.settings.title_template, &self.settings.task_id)?;
        let body = render_body(&BodyInputs {
            task_id: &self.settings.task_id,
            branch,
            base,
            subjects: &subjects,
            total_commits: commits,
        })?;
        Ok(CreatePrRequest {
            title,
            body,
            head: branch.to_string(),
            base: base.to_string(),
            draft: self.settings.draft,
        })
    }
}
