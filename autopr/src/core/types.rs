//! Shared types for reconciliation logic.
//!
//! These types carry no I/O and are owned by whichever component produced
//! them; nothing here is cached across reconciliation attempts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Full object id of a commit (as printed by `git rev-parse`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated id for status output.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map_or(self.0.len(), |(idx, _)| idx);
        &self.0[..end]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pull request state as reported by the hosting service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// The hosting service's view of a pull request.
///
/// Field names follow `gh --json number,url,state,headRefName`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub number: u64,
    pub url: String,
    pub state: PrState,
    #[serde(rename = "headRefName")]
    pub head_ref: String,
}

/// Result of a single reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No local commits ahead of the base branch; nothing was pushed or queried.
    NoCommits,
    /// Branch pushed and a new pull request opened.
    Created {
        record: PullRequestRecord,
        commits: u32,
    },
    /// Branch pushed to an already-open pull request.
    Updated {
        record: PullRequestRecord,
        commits: u32,
    },
    /// The attempt was abandoned; the next detected change retries from scratch.
    Failed { reason: String },
}

impl ReconcileOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Operator-facing status line. `NoCommits` is silent.
    pub fn status_line(&self) -> Option<String> {
        match self {
            Self::NoCommits => None,
            Self::Created { record, commits } => Some(format!(
                "opened PR #{} ({} {}): {}",
                record.number,
                commits,
                plural(*commits, "commit"),
                record.url
            )),
            Self::Updated { record, commits } => Some(format!(
                "pushed to existing PR #{} ({} {}): {}",
                record.number,
                commits,
                plural(*commits, "commit"),
                record.url
            )),
            Self::Failed { reason } => Some(format!("pull request sync failed: {reason}")),
        }
    }
}

fn plural(count: u32, noun: &str) -> String {
    if count == 1 {
        noun.to_string()
    } else {
        format!("{noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PullRequestRecord {
        PullRequestRecord {
            number: 7,
            url: "https://github.com/acme/widgets/pull/7".to_string(),
            state: PrState::Open,
            head_ref: "agent/task-1".to_string(),
        }
    }

    #[test]
    fn short_commit_id_truncates_to_eight_chars() {
        let id = CommitId::new("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert_eq!(CommitId::new("abc").short(), "abc");
    }

    #[test]
    fn no_commits_is_silent() {
        assert_eq!(ReconcileOutcome::NoCommits.status_line(), None);
    }

    #[test]
    fn status_lines_name_the_pull_request() {
        let created = ReconcileOutcome::Created {
            record: record(),
            commits: 1,
        };
        assert_eq!(
            created.status_line().as_deref(),
            Some("opened PR #7 (1 commit): https://github.com/acme/widgets/pull/7")
        );

        let updated = ReconcileOutcome::Updated {
            record: record(),
            commits: 3,
        };
        let line = updated.status_line().expect("line");
        assert!(line.starts_with("pushed to existing PR #7 (3 commits)"));
    }

    #[test]
    fn parses_gh_json_record() {
        let raw = r#"{"number":7,"url":"https://github.com/acme/widgets/pull/7","state":"OPEN","headRefName":"agent/task-1"}"#;
        let parsed: PullRequestRecord = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed, record());
    }
}
