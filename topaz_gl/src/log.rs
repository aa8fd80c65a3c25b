//! Logging for the Topaz renderer frontend
//!
//! All frontend and backend diagnostics go through the `engine_*` macros,
//! which forward to the logger installed with `Engine::set_logger`. The
//! default logger prints coloured lines to stdout; ERROR entries carry the
//! file and line of the call site.

use colored::*;
use std::time::SystemTime;
use chrono::{DateTime, Local};

/// Logger trait for custom logging implementations
///
/// # Example
///
/// ```ignore
/// use topaz_gl::topaz::log::{Logger, LogEntry};
///
/// struct FileLogger {
///     file: std::sync::Mutex<std::fs::File>,
/// }
///
/// impl Logger for FileLogger {
///     fn log(&self, entry: &LogEntry) {
///         // Write to file...
///     }
/// }
/// ```
pub trait Logger: Send + Sync {
    /// Log an entry
    fn log(&self, entry: &LogEntry);
}

/// Log entry containing all information about a log message
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity level
    pub severity: LogSeverity,

    /// Timestamp when the log was created
    pub timestamp: SystemTime,

    /// Source module (e.g., "topaz::Renderer", "topaz::vulkan")
    pub source: String,

    /// Log message
    pub message: String,

    /// Source file (only for detailed ERROR logs)
    pub file: Option<&'static str>,

    /// Source line (only for detailed ERROR logs)
    pub line: Option<u32>,
}

impl LogEntry {
    /// Build an entry stamped with the current time
    pub fn new(severity: LogSeverity, source: &str, message: String) -> Self {
        Self {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message,
            file: None,
            line: None,
        }
    }

    /// Attach a call site
    pub fn at(mut self, file: &'static str, line: u32) -> Self {
        self.file = Some(file);
        self.line = Some(line);
        self
    }
}

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    /// Per-frame detail (command recording, submissions)
    Trace,

    /// Development information (allocations, rebuilds)
    Debug,

    /// Lifecycle events (renderer created/destroyed)
    Info,

    /// Recoverable problems (pool retries, out-of-date surfaces, ignored edits)
    Warn,

    /// Contract violations and fatal backend errors
    Error,
}

impl LogSeverity {
    fn label(self) -> ColoredString {
        match self {
            LogSeverity::Trace => "TRACE".bright_black(),
            LogSeverity::Debug => "DEBUG".cyan(),
            LogSeverity::Info => "INFO ".green(),
            LogSeverity::Warn => "WARN ".yellow(),
            LogSeverity::Error => "ERROR".red().bold(),
        }
    }
}

/// Default logger: coloured console output
///
/// Format:
/// - Normal: `[timestamp] [SEVERITY] [source] message`
/// - Error: `[timestamp] [ERROR] [source] message (file:line)`
///
/// Entries below `min_severity` are dropped.
pub struct DefaultLogger {
    pub min_severity: LogSeverity,
}

impl DefaultLogger {
    /// Logger printing everything from `min_severity` upwards
    pub fn new(min_severity: LogSeverity) -> Self {
        Self { min_severity }
    }

    /// Render an entry the way it is printed, without colours applied
    pub fn format_entry(entry: &LogEntry) -> String {
        let datetime: DateTime<Local> = entry.timestamp.into();
        let timestamp = datetime.format("%Y-%m-%d %H:%M:%S%.3f");
        match (entry.file, entry.line) {
            (Some(file), Some(line)) => format!(
                "[{}] [{:?}] [{}] {} ({}:{})",
                timestamp, entry.severity, entry.source, entry.message, file, line
            ),
            _ => format!(
                "[{}] [{:?}] [{}] {}",
                timestamp, entry.severity, entry.source, entry.message
            ),
        }
    }
}

impl Default for DefaultLogger {
    fn default() -> Self {
        Self::new(if cfg!(debug_assertions) { LogSeverity::Debug } else { LogSeverity::Info })
    }
}

impl Logger for DefaultLogger {
    fn log(&self, entry: &LogEntry) {
        if entry.severity < self.min_severity {
            return;
        }

        let datetime: DateTime<Local> = entry.timestamp.into();
        let timestamp = datetime.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        let severity = entry.severity.label();
        let source = entry.source.bright_blue();

        if let (Some(file), Some(line)) = (entry.file, entry.line) {
            println!("[{}] [{}] [{}] {} ({}:{})", timestamp, severity, source, entry.message, file, line);
        } else {
            println!("[{}] [{}] [{}] {}", timestamp, severity, source, entry.message);
        }
    }
}

// ===== LOGGING MACROS =====

/// Log a TRACE message
///
/// ```ignore
/// engine_trace!("topaz::Renderer", "Recording work commands for {} targets", count);
/// ```
#[macro_export]
macro_rules! engine_trace {
    ($source:expr, $($arg:tt)*) => {
        $crate::topaz::Engine::log(
            $crate::topaz::log::LogSeverity::Trace,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log a DEBUG message
///
/// ```ignore
/// engine_debug!("topaz::DescriptorManager", "Allocated {} descriptor sets", count);
/// ```
#[macro_export]
macro_rules! engine_debug {
    ($source:expr, $($arg:tt)*) => {
        $crate::topaz::Engine::log(
            $crate::topaz::log::LogSeverity::Debug,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log an INFO message
#[macro_export]
macro_rules! engine_info {
    ($source:expr, $($arg:tt)*) => {
        $crate::topaz::Engine::log(
            $crate::topaz::log::LogSeverity::Info,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log a WARN message
///
/// ```ignore
/// engine_warn!("topaz::Renderer", "Surface out of date, retry {}", attempt);
/// ```
#[macro_export]
macro_rules! engine_warn {
    ($source:expr, $($arg:tt)*) => {
        $crate::topaz::Engine::log(
            $crate::topaz::log::LogSeverity::Warn,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log an ERROR message with file:line information
#[macro_export]
macro_rules! engine_error {
    ($source:expr, $($arg:tt)*) => {
        $crate::topaz::Engine::log_detailed(
            $crate::topaz::log::LogSeverity::Error,
            $source,
            format!($($arg)*),
            file!(),
            line!()
        )
    };
}

/// Log an ERROR message and evaluate to an `Error::BackendError` carrying it
///
/// ```ignore
/// device.device_wait_idle().map_err(|e| engine_err!("topaz::vulkan", "wait idle failed: {:?}", e))?;
/// ```
#[macro_export]
macro_rules! engine_err {
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::topaz::Engine::log_detailed(
            $crate::topaz::log::LogSeverity::Error,
            $source,
            message.clone(),
            file!(),
            line!()
        );
        $crate::topaz::Error::BackendError(message)
    }};
}

/// Log an ERROR message and return early with an `Error::BackendError`
#[macro_export]
macro_rules! engine_bail {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::engine_err!($source, $($arg)*))
    };
}

/// Logger that keeps every entry in memory, for tests asserting on diagnostics
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct CapturingLogger {
    pub entries: std::sync::Arc<std::sync::Mutex<Vec<LogEntry>>>,
}

#[cfg(test)]
impl CapturingLogger {
    pub fn messages(&self, severity: LogSeverity) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.severity == severity)
            .map(|e| e.message.clone())
            .collect()
    }
}

#[cfg(test)]
impl Logger for CapturingLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
