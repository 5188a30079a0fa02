//! Pull request automation for interactive coding-agent sessions.
//!
//! `autopr` runs an agent in the foreground and, whenever the agent's commits
//! move the branch head, makes sure an open pull request tracks the branch:
//! created on the first change, pushed to on every later one. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (change detection, PR text).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (git, `gh`, the agent process,
//!   config). Each external service sits behind a trait for testing.
//!
//! Orchestration modules ([`reconcile`], [`watcher`], [`session`]) combine
//! core logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod reconcile;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watcher;
