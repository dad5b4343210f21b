//! Stable exit codes for sandbox CLI commands.

/// Command succeeded; for validation commands, the script passed.
pub const OK: i32 = 0;
/// Invalid input, configuration or I/O, or a script that failed to run.
pub const INVALID: i32 = 1;
/// Validation ran and rejected the script.
pub const REJECTED: i32 = 2;
