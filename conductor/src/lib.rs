//! Autonomous implement → verify → fix runner for a phased task plan.
//!
//! Agents are driven one step at a time against a git repository; accepted
//! work is committed and the durable run record is rewritten after every
//! transition so an interrupted run resumes where it stopped.
//!
//! - **[`core`]**: Pure, deterministic logic (domain types, plan model,
//!   response parsers, failure classification). No I/O.
//! - **[`io`]**: Side effects (processes, git, agent and gate execution, run
//!   state, artifacts, config). Collaborators sit behind traits so tests can
//!   script them.
//!
//! Orchestration modules ([`task_runner`], [`run_executor`], [`session`])
//! coordinate core logic with I/O to implement the CLI commands.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run_executor;
pub mod session;
pub mod task_runner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
