//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

#![allow(dead_code)]

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Validation error - a body failed its schema
pub const VALIDATION_ERROR: i32 = 2;

/// Configuration error - unreadable or invalid config file
pub const CONFIG_ERROR: i32 = 3;

/// Not found - the object does not exist
pub const NOT_FOUND: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Timeout - a wait did not converge in time
pub const TIMEOUT: i32 = 6;

/// Unsupported - the cluster serves no usable version of the kind
pub const UNSUPPORTED: i32 = 7;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
