//! Stable exit codes for autocommit CLI commands.

/// Command succeeded, or the daemon shut down on a signal.
pub const OK: i32 = 0;
/// Startup failed: bad config, not a repository, unknown command, or a failed `once` cycle.
pub const FAILURE: i32 = 1;
