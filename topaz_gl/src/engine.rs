/// Topaz Engine - process-wide logging facade
///
/// The logger is the only global state in Topaz. Devices, renderers and the
/// render graph are plain values owned by the application (see
/// `DeviceContext`), so nothing here holds GPU objects.

use std::sync::{OnceLock, RwLock};
use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

fn logger() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger::default())))
}

/// Static entry point for the logging API used by the `engine_*` macros
pub struct Engine;

impl Engine {
    /// Replace the current logger
    ///
    /// # Example
    ///
    /// ```no_run
    /// use topaz_gl::topaz::{Engine, log::{Logger, LogEntry}};
    ///
    /// struct Silent;
    /// impl Logger for Silent {
    ///     fn log(&self, _entry: &LogEntry) {}
    /// }
    ///
    /// Engine::set_logger(Silent);
    /// ```
    pub fn set_logger<L: Logger + 'static>(logger_impl: L) {
        if let Ok(mut lock) = logger().write() {
            *lock = Box::new(logger_impl);
        }
    }

    /// Reset logger to `DefaultLogger::default()`
    pub fn reset_logger() {
        if let Ok(mut lock) = logger().write() {
            *lock = Box::new(DefaultLogger::default());
        }
    }

    /// Log without call-site information (used by engine_info!, engine_warn!...)
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        if let Ok(lock) = logger().read() {
            lock.log(&LogEntry::new(severity, source, message));
        }
    }

    /// Log with file:line information (used by engine_error!, engine_err!)
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        if let Ok(lock) = logger().read() {
            lock.log(&LogEntry::new(severity, source, message).at(file, line));
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
