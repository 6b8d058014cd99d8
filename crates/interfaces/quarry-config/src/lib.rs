//! Central configuration constants for runtime limits and defaults.

use std::time::Duration;

/// Version string shown in the log header and mixed into the application identity.
pub const LAUNCHER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long a secondary process waits for the primary to accept a forwarded command.
pub const PEER_MESSAGE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Time a child process gets to exit after a graceful terminate before it is killed.
pub const ABORT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Default console buffer length for instances that don't configure one.
pub const DEFAULT_CONSOLE_MAX_LINES: usize = 100_000;

/// Minimum console buffer length; smaller values are clamped up.
pub const MIN_CONSOLE_MAX_LINES: usize = 100;

/// Whether a full console buffer stops accepting lines instead of evicting old ones.
pub const DEFAULT_STOP_ON_OVERFLOW: bool = true;

/// Base name of the rotated application log files (`quarry-0.log` is the newest).
pub const LOG_FILE_BASE: &str = "quarry";

/// Number of rotated application log files kept in the data directory.
pub const LOG_FILE_COUNT: usize = 5;

/// Directory under the data directory that holds one folder per instance.
pub const INSTANCES_DIR: &str = "instances";

/// Per-instance configuration file name.
pub const INSTANCE_CONFIG_FILE: &str = "instance.json";

/// Convenience function to clamp a console length into the allowed range.
pub fn clamp_console_lines(v: usize) -> usize {
    v.max(MIN_CONSOLE_MAX_LINES)
}
