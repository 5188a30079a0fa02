//! Pure, deterministic reconciliation logic. No I/O.

pub mod change;
pub mod pr_text;
pub mod types;
