//! Stable exit codes for autopr CLI commands.

/// Command succeeded (for `run`: the agent exited with status 0).
pub const OK: i32 = 0;
/// Invalid config, arguments, or repository setup.
pub const INVALID: i32 = 1;
/// `autopr run`: the agent exited non-zero, was killed, or failed to start.
/// The final reconciliation still ran.
pub const AGENT_FAILED: i32 = 2;
/// `autopr reconcile`: the reconciliation attempt failed.
pub const RECONCILE_FAILED: i32 = 3;
