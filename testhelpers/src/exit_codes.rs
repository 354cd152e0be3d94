//! Stable exit codes for `testhelpers` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Collaborator, configuration, or decoding failure.
pub const FAILED: i32 = 1;
/// The named pool or role does not exist; nothing was written.
pub const NOT_FOUND: i32 = 2;
