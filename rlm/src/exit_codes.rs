//! Stable exit codes for `rlm` CLI commands.

/// The step (or the final turn of a loop) converged, or the command succeeded.
pub const CONVERGED: i32 = 0;
/// Invalid configuration, arguments or other errors.
pub const INVALID: i32 = 1;
/// Reasoning finished without converging.
pub const NOT_CONVERGED: i32 = 2;
