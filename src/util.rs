//! Small free-function helpers shared across the server: logging, time, and
//! a couple of string/number conversions used by config parsing.

use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::process::{abort, id};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub enum LogLevel {
    Debug,
    Verbose,
    Notice,
    Warning,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ch = match self {
            Self::Debug => '.',
            Self::Verbose => '-',
            Self::Notice => '*',
            Self::Warning => '#',
        };
        write!(f, "{ch}")
    }
}

pub fn timestamp() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap()
}

pub fn get_time_ms() -> u128 {
    timestamp().as_millis()
}

pub fn add_ms_to_now(ms: u128) -> u128 {
    get_time_ms() + ms
}

/// Writes one log line to `log_file` (stdout if empty) when `level` meets
/// or exceeds `min_level`. Mirrors the `[pid] timestamp level: body` format.
pub fn log(min_level: LogLevel, level: LogLevel, log_file: &str, body: &str) {
    if level < min_level {
        return;
    }
    let line = format!("[{}] {} {}: {}\n", id(), get_time_ms(), level, body);
    if log_file.is_empty() {
        let _ = io::stdout().write_all(line.as_bytes());
    } else {
        match OpenOptions::new().create(true).append(true).open(log_file) {
            Ok(mut f) => {
                let _ = f.write_all(line.as_bytes());
            },
            Err(e) => eprintln!("can't open log file '{log_file}': {e}"),
        }
    }
}

/// Redis generally does not try to recover from out-of-memory conditions:
/// the networking layer itself needs heap allocations to report anything,
/// so the process just aborts.
pub fn oom(log_file: &str, msg: &str) -> ! {
    log(LogLevel::Warning, LogLevel::Warning, log_file, &format!("{msg}: Out of memory"));
    abort();
}

pub fn yes_no_to_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(format!("argument must be 'yes' or 'no', got '{other}'")),
    }
}

/// Last OS error number, mirroring the teacher's `anet`-style helpers that
/// wrap raw libc calls.
pub fn error() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Notice);
        assert!(LogLevel::Notice < LogLevel::Warning);
    }

    #[test]
    fn yes_no_parses() {
        assert_eq!(yes_no_to_bool("yes"), Ok(true));
        assert_eq!(yes_no_to_bool("No"), Ok(false));
        assert!(yes_no_to_bool("maybe").is_err());
    }
}
