use std::sync::atomic::{AtomicU8, Ordering};

pub use chrono;

pub const ERROR: u8 = 0;
pub const WARN: u8 = 1;
pub const INFO: u8 = 2;
pub const DEBUG: u8 = 3;
pub const TRACE: u8 = 4;

pub static LOG_LEVEL: AtomicU8 = AtomicU8::new(INFO);

/// Read the log level from `RUST_LOG`. Unknown values fall back to `info`.
pub fn init() {
    let level = match std::env::var("RUST_LOG") {
        Err(_) => INFO,
        Ok(value) => parse_level(&value).unwrap_or(INFO),
    };

    set_level(level);
}

pub fn parse_level(value: &str) -> Option<u8> {
    match value.trim().to_ascii_lowercase().as_str() {
        "error" => Some(ERROR),
        "warn" => Some(WARN),
        "info" => Some(INFO),
        "debug" => Some(DEBUG),
        "trace" => Some(TRACE),
        _ => None,
    }
}

pub fn set_level(level: u8) {
    LOG_LEVEL.store(level.min(TRACE), Ordering::Relaxed);
}

#[inline]
pub fn enabled(level: u8) -> bool {
    LOG_LEVEL.load(Ordering::Relaxed) >= level
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{ $crate::format_log!(0, "\x1b[31mERROR\x1b[0m", $($arg)*) }}
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{ $crate::format_log!(1, "\x1b[33mWARN \x1b[0m", $($arg)*) }}
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{ $crate::format_log!(2, "\x1b[32mINFO \x1b[0m", $($arg)*) }}
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{ $crate::format_log!(3, "\x1b[34mDEBUG\x1b[0m", $($arg)*) }}
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{ $crate::format_log!(4, "\x1b[36mTRACE\x1b[0m", $($arg)*) }}
}

/// Writes to stderr; stdout belongs to the programs' own output.
#[macro_export]
macro_rules! format_log {
    ($log_level_int:literal, $log_level_str:literal, $($arg:tt)*) => {{
        if $crate::enabled($log_level_int) {
            // [2023-09-19T18:10:27Z INFO  responder::executor] worker 0 adopted connection 12
            eprintln!(
                "[{timestamp} {log_level} {module_path}] {msg}",
                timestamp = $crate::chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                log_level = $log_level_str,
                module_path = std::module_path!(),
                msg = format_args!($($arg)*),
            );
        }
    }};
}
