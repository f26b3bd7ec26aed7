//! Stable exit codes for interview CLI commands.

/// The interview completed, or every validated flow is valid.
pub const OK: i32 = 0;
/// Invalid config or flow, or any other command failure.
pub const INVALID: i32 = 1;
/// A turn recorded an error on the session.
pub const SESSION_ERROR: i32 = 2;
/// The interview stopped before reaching the terminal stage.
pub const INCOMPLETE: i32 = 3;
