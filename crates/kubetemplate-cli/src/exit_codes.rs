//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Template error - parsing, rendering or a resource lookup failed
pub const TEMPLATE_ERROR: i32 = 3;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Cluster error - the Kubernetes API could not be reached
pub const CLUSTER_ERROR: i32 = 6;

/// Watch failure - a namespace cache went stale; restart the process
pub const WATCH_FAILURE: i32 = 7;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
