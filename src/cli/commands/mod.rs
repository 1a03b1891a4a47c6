//! CLI command implementations
//!
//! Commands return process exit codes: 0 success, 1 partial success,
//! 2 configuration error, 5 fatal error, 130 interrupted.

pub mod export;
pub mod init;
pub mod serve;
pub mod status;
pub mod validate;

/// Success
pub const EXIT_OK: i32 = 0;
/// Finished, but some projects failed
pub const EXIT_PARTIAL: i32 = 1;
/// Configuration could not be loaded or is invalid
pub const EXIT_CONFIG: i32 = 2;
/// Unrecoverable error
pub const EXIT_FATAL: i32 = 5;
/// Stopped by a signal
pub const EXIT_INTERRUPTED: i32 = 130;
