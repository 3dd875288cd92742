//! Stable exit codes for conductor CLI commands.

/// Run completed or paused at a cap, or a dry run finished.
pub const OK: i32 = 0;
/// Invalid input, configuration, repository state, or any other error.
pub const ERROR: i32 = 1;
/// The run ended blocked; a hand-off document was written.
pub const BLOCKED: i32 = 3;
