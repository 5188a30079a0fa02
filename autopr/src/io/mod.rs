//! Side-effecting adapters: git, the hosting CLI, the agent process, config.

pub mod agent;
pub mod config;
pub mod git;
pub mod hosting;
pub mod process;
