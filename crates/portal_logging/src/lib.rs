#![deny(missing_docs)]
//! Logging for the portal crates.
//!
//! Every crate logs through the `portal_*` macros so call sites stay
//! uniform. The binary picks a [`LogDestination`] and a level; below
//! `Trace` only records from the `portal_*` crates are kept, since the HTTP
//! and WebSocket stacks are chatty at debug level.

use std::fs::File;
use std::path::Path;

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

/// Log file written by [`LogDestination::File`], relative to the working directory.
pub const LOG_FILE: &str = "portal.log";

/// Module-path prefix shared by the workspace crates.
const PORTAL_TARGET: &str = "portal";

/// `log::trace!` for portal code.
#[macro_export]
macro_rules! portal_trace {
    ($($arg:tt)*) => {{
        log::trace!($($arg)*);
    }};
}

/// `log::debug!` for portal code.
#[macro_export]
macro_rules! portal_debug {
    ($($arg:tt)*) => {{
        log::debug!($($arg)*);
    }};
}

/// `log::info!` for portal code.
#[macro_export]
macro_rules! portal_info {
    ($($arg:tt)*) => {{
        log::info!($($arg)*);
    }};
}

/// `log::warn!` for portal code.
#[macro_export]
macro_rules! portal_warn {
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
    }};
}

/// `log::error!` for portal code.
#[macro_export]
macro_rules! portal_error {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
    }};
}

/// Where [`initialize`] sends records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDestination {
    /// [`LOG_FILE`], truncated at start-up.
    File,
    /// The terminal; warnings and errors go to stderr.
    Terminal,
    /// Both of the above.
    Both,
}

impl LogDestination {
    fn to_terminal(self) -> bool {
        matches!(self, LogDestination::Terminal | LogDestination::Both)
    }

    fn to_file(self) -> bool {
        matches!(self, LogDestination::File | LogDestination::Both)
    }
}

/// Whether records from outside the portal crates pass at `level`.
pub fn shows_dependency_logs(level: LevelFilter) -> bool {
    level == LevelFilter::Trace
}

/// Terminal logger for tests. Safe to call from every test; only the first
/// call installs it.
pub fn initialize_for_tests() {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        build_config(level),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}

/// Install the global logger. A log file that cannot be created is reported
/// on stderr and left out; the terminal half of `Both` still works.
pub fn initialize(destination: LogDestination, level: LevelFilter) {
    let config = build_config(level);
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    if destination.to_terminal() {
        loggers.push(TermLogger::new(
            level,
            config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }
    if destination.to_file() {
        if let Some(file_logger) = create_file_logger(Path::new(LOG_FILE), level, config) {
            loggers.push(file_logger);
        }
    }
    if loggers.is_empty() {
        return;
    }
    let _ = CombinedLogger::init(loggers);
}

fn build_config(level: LevelFilter) -> Config {
    let mut builder = ConfigBuilder::new();
    builder
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error);
    if !shows_dependency_logs(level) {
        builder.add_filter_allow_str(PORTAL_TARGET);
    }
    builder.build()
}

fn create_file_logger(
    path: &Path,
    level: LevelFilter,
    config: Config,
) -> Option<Box<WriteLogger<File>>> {
    match File::create(path) {
        Ok(file) => Some(WriteLogger::new(level, config, file)),
        Err(err) => {
            eprintln!("Warning: could not create log file {path:?}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_trace_lets_dependency_records_through() {
        assert!(shows_dependency_logs(LevelFilter::Trace));
        for level in [LevelFilter::Debug, LevelFilter::Info, LevelFilter::Warn] {
            assert!(!shows_dependency_logs(level), "{level}");
        }
    }

    #[test]
    fn both_writes_to_terminal_and_file() {
        assert!(LogDestination::Both.to_terminal() && LogDestination::Both.to_file());
        assert!(!LogDestination::File.to_terminal());
        assert!(!LogDestination::Terminal.to_file());
    }

    #[test]
    fn unwritable_log_file_is_skipped() {
        let dir = std::env::temp_dir().join("portal_logging_missing_dir/nested");
        let logger = create_file_logger(
            &dir.join(LOG_FILE),
            LevelFilter::Info,
            build_config(LevelFilter::Info),
        );
        assert!(logger.is_none());
    }

    #[test]
    fn file_logger_creates_the_file() {
        let path = std::env::temp_dir().join(format!("portal_logging_{}.log", std::process::id()));
        let logger = create_file_logger(&path, LevelFilter::Debug, build_config(LevelFilter::Debug));
        assert!(logger.is_some());
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
    }
}
