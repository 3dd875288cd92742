//! I/O adapters: processes, git, agents, quality gates, and persisted files.

pub mod agent;
pub mod artifacts;
pub mod config;
pub mod git;
pub mod plan;
pub mod process;
pub mod quality_gates;
pub mod run_state;
