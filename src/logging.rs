//! Operational logging with timestamps and source locations.
//!
//! Provides the [`ulog!`] macro for consistent log output in the format:
//!
//! ```text
//! 20260802T14:03:12.000 - src/server.rs:42 - reaper: removed 3 expired message(s)
//! ```
//!
//! Logging is for process lifecycle events only: startup, shutdown, reaper
//! sweeps, fabric registry warnings. Never log per-request lines, account
//! identifiers, route parameters, or payloads. The `none` level suppresses
//! every write, including errors. Log lines go to stderr.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use time::macros::format_description;
use time::OffsetDateTime;

static ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize the logging system. Call once at startup before any logging.
/// The level `none` disables all output; every other level enables it.
pub fn init(level: &str) {
    ENABLED.store(level != "none", Ordering::Relaxed);
}

/// Returns whether logging is enabled.
pub fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Format the current wall-clock time as `YYYYMMDDTHH:MM:SS.mmm`.
pub fn format_timestamp() -> String {
    let fmt = format_description!(
        "[year][month][day]T[hour]:[minute]:[second].[subsecond digits:3]"
    );
    OffsetDateTime::now_utc()
        .format(&fmt)
        .unwrap_or_else(|_| String::from("00000000T00:00:00.000"))
}

/// Write a single log line to the current writer.
///
/// Called by the [`ulog!`] macro; not intended for direct use.
pub fn emit(file: &str, line: u32, msg: &str) {
    if !enabled() {
        return;
    }
    let ts = format_timestamp();
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "{ts} - {file}:{line} - {msg}");
}

/// Emit a log line with timestamp and source location, unless the log level
/// is `none`.
///
/// # Usage
///
/// ```ignore
/// ulog!("umbra listening on port {}", port);
/// ```
#[macro_export]
macro_rules! ulog {
    ($($arg:tt)*) => {{
        $crate::logging::emit(file!(), line!(), &format!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_fixed_width() {
        init("info");
        let ts = format_timestamp();
        // YYYYMMDDTHH:MM:SS.mmm
        assert_eq!(ts.len(), 21);
        assert_eq!(&ts[8..9], "T");
    }

    #[test]
    fn none_level_disables_output() {
        init("none");
        assert!(!enabled());
        init("info");
        assert!(enabled());
    }
}
