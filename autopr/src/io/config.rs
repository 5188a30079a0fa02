//! autopr configuration stored under `.autopr/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::pr_text::{DEFAULT_TITLE_TEMPLATE, render_title};

/// Default location of the config file, relative to the repository root.
pub const DEFAULT_CONFIG_PATH: &str = ".autopr/config.toml";

/// autopr configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutoprConfig {
    /// Seconds between head-commit polls while the agent runs.
    pub poll_interval_secs: u64,

    /// Remote that branches are pushed to.
    pub remote: String,

    /// Target branch for pull requests. Detected from the remote when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,

    /// Task identifier used in the pull request title. Defaults to the branch name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Wall-clock limit for each `git push` / `gh` invocation.
    pub command_timeout_secs: u64,

    /// Truncate captured `git push` / `gh` output beyond this many bytes.
    pub output_limit_bytes: usize,

    pub agent: AgentConfig,

    pub pr: PrConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command (argv) that starts the interactive agent.
    pub command: Vec<String>,

    /// File whose contents are passed to the agent as its initial instruction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrConfig {
    /// minijinja template for the title; `task_id` is in scope.
    pub title_template: String,

    /// Cap on commit subjects listed in the body.
    pub max_body_commits: usize,

    /// Open new pull requests as drafts.
    pub draft: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string()],
            prompt_file: None,
        }
    }
}

impl Default for PrConfig {
    fn default() -> Self {
        Self {
            title_template: DEFAULT_TITLE_TEMPLATE.to_string(),
            max_body_commits: 20,
            draft: false,
        }
    }
}

impl Default for AutoprConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            remote: "origin".to_string(),
            base_branch: None,
            task_id: None,
            command_timeout_secs: 120,
            output_limit_bytes: 100_000,
            agent: AgentConfig::default(),
            pr: PrConfig::default(),
        }
    }
}

impl AutoprConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.remote.trim().is_empty() {
            return Err(anyhow!("remote must not be empty"));
        }
        if self
            .base_branch
            .as_deref()
            .is_some_and(|b| b.trim().is_empty())
        {
            return Err(anyhow!("base_branch must not be empty when set"));
        }
        if self.task_id.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(anyhow!("task_id must not be empty when set"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.pr.max_body_commits == 0 {
            return Err(anyhow!("pr.max_body_commits must be > 0"));
        }
        render_title(&self.pr.title_template, "task")
            .context("pr.title_template is not a usable template")?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutoprConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutoprConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = AutoprConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutoprConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AutoprConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
