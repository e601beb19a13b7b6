//! Stable exit codes for simrun CLI commands.

/// Command succeeded; for `run`, the run completed with no recorded errors.
pub const OK: i32 = 0;
/// Invalid input: unreadable options, unusable model file, bad arguments.
pub const INVALID: i32 = 1;
/// `simrun run` completed but recorded at least one error.
pub const FAILED: i32 = 2;
