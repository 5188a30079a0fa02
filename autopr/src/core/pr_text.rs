//! Pull request title and body composition.
//!
//! Rendering is deterministic: the same task id and commit subjects always
//! produce the same text.

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};

const BODY_TEMPLATE: &str = include_str!("templates/pr_body.md");

/// Title template used when the config does not override it.
pub const DEFAULT_TITLE_TEMPLATE: &str = "agent: {{ task_id }}";

/// Inputs for the pull request body.
#[derive(Debug, Clone)]
pub struct BodyInputs<'a> {
    pub task_id: &'a str,
    pub branch: &'a str,
    pub base: &'a str,
    /// Commit subjects, most recent first, already capped.
    pub subjects: &'a [String],
    /// Total commits on the branch; anything beyond `subjects.len()` is summarized.
    pub total_commits: u32,
}

/// Render the title template and collapse it onto a single line.
pub fn render_title(template: &str, task_id: &str) -> Result<String> {
    let env = Environment::new();
    let rendered = env
        .render_str(template, context! { task_id => task_id })
        .context("render pull request title")?;
    let title = rendered.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        return Err(anyhow!("pull request title template rendered empty"));
    }
    Ok(title)
}

pub fn render_body(inputs: &BodyInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("pr_body", BODY_TEMPLATE)
        .expect("pr body template should be valid");
    let omitted = (inputs.total_commits as usize).saturating_sub(inputs.subjects.len());
    let template = env.get_template("pr_body")?;
    let mut body = template
        .render(context! {
            task_id => inputs.task_id,
            branch => inputs.branch,
            base => inputs.base,
            subjects => inputs.subjects,
            omitted => omitted,
        })
        .context("render pull request body")?
        .trim_end()
        .to_string();
    body.push('\n');
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subjects(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_title_embeds_task_id() {
        let title = render_title(DEFAULT_TITLE_TEMPLATE, "fix-login").expect("title");
        assert_eq!(title, "agent: fix-login");
    }

    #[test]
    fn title_is_collapsed_to_one_line() {
        let title = render_title("{{ task_id }}\n  wip ", "t-1").expect("title");
        assert_eq!(title, "t-1 wip");
    }

    #[test]
    fn empty_title_is_rejected() {
        let err = render_title("   ", "t-1").unwrap_err();
        assert!(err.to_string().contains("rendered empty"));
    }

    #[test]
    fn body_lists_subjects_in_given_order() {
        let items = subjects(&["third", "second", "first"]);
        let body = render_body(&BodyInputs {
            task_id: "t-1",
            branch: "agent/t-1",
            base: "main",
            subjects: &items,
            total_commits: 3,
        })
        .expect("body");

        assert!(body.starts_with("## t-1\n"));
        assert!(body.contains("`agent/t-1` into `main`"));
        assert!(body.contains("- third\n- second\n- first\n"));
        assert!(!body.contains("earlier"));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn body_summarizes_omitted_commits() {
        let items = subjects(&["newest", "older"]);
        let body = render_body(&BodyInputs {
            task_id: "t-1",
            branch: "agent/t-1",
            base: "main",
            subjects: &items,
            total_commits: 5,
        })
        .expect("body");
        assert!(body.contains("- older\n- ...and 3 earlier commits"));

        let body = render_body(&BodyInputs {
            task_id: "t-1",
            branch: "agent/t-1",
            base: "main",
            subjects: &items,
            total_commits: 3,
        })
        .expect("body");
        assert!(body.ends_with("- ...and 1 earlier commit\n"));
    }
}
