//! Integration tests for the Engine logging system
//!
//! These tests drive the logger registry and the exported `engine_*` macros
//! from outside the crate. No GPU required.
//!
//! Run with: cargo test --test logging_integration_tests

use std::sync::{Arc, Mutex};
use serial_test::serial;
use topaz_gl::topaz::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
use topaz_gl::topaz::{Engine, Error, Result};
use topaz_gl::{engine_bail, engine_err, engine_info, engine_warn};

// ============================================================================
// TEST LOGGER IMPLEMENTATION
// ============================================================================

/// Test logger that captures log entries for verification
struct TestLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl TestLogger {
    fn new() -> (Self, Arc<Mutex<Vec<LogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        (Self { entries: entries.clone() }, entries)
    }
}

impl Logger for TestLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn failing_operation(size: u64) -> Result<u64> {
    if size == 0 {
        engine_bail!("test::device", "Cannot create a buffer of {} bytes", size);
    }
    Ok(size)
}

// ============================================================================
// LOGGING TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_custom_logger() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    Engine::log(LogSeverity::Info, "test::module", "Test info message".to_string());
    Engine::log(LogSeverity::Warn, "test::module", "Test warning message".to_string());
    Engine::log(LogSeverity::Error, "test::module", "Test error message".to_string());

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 3);
    assert_eq!(captured[0].severity, LogSeverity::Info);
    assert_eq!(captured[0].source, "test::module");
    assert_eq!(captured[0].message, "Test info message");
    assert_eq!(captured[1].severity, LogSeverity::Warn);
    assert_eq!(captured[2].severity, LogSeverity::Error);
    assert_eq!(captured[2].message, "Test error message");
    drop(captured);

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_macros_forward_to_logger() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    engine_info!("test::Renderer", "Created renderer '{}'", "blur");
    engine_warn!("test::Renderer", "Retry {}", 2);

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 2);
    assert_eq!(captured[0].message, "Created renderer 'blur'");
    assert_eq!(captured[0].file, None);
    assert_eq!(captured[1].severity, LogSeverity::Warn);
    assert_eq!(captured[1].message, "Retry 2");
    drop(captured);

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_engine_err_logs_location_and_builds_error() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    let error = engine_err!("test::device", "Queue lost: {}", 7);

    assert!(matches!(&error, Error::BackendError(message) if message == "Queue lost: 7"));
    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Error);
    assert_eq!(captured[0].file, Some(file!()));
    assert!(captured[0].line.is_some());
    drop(captured);

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_engine_bail_returns_early() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    assert_eq!(failing_operation(16).unwrap(), 16);
    assert!(matches!(failing_operation(0), Err(Error::BackendError(_))));

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].source, "test::device");
    drop(captured);

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_error_logging_with_location() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    Engine::log_detailed(
        LogSeverity::Error,
        "test::error",
        "Critical error occurred".to_string(),
        "test_file.rs",
        42,
    );

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].file, Some("test_file.rs"));
    assert_eq!(captured[0].line, Some(42));
    drop(captured);

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_logger_reset() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    Engine::log(LogSeverity::Info, "test", "Message 1".to_string());
    assert_eq!(entries.lock().unwrap().len(), 1);

    Engine::reset_logger();

    // Goes to the default logger, not captured
    Engine::log(LogSeverity::Info, "test", "Message 2".to_string());
    assert_eq!(entries.lock().unwrap().len(), 1);
}

#[test]
fn test_integration_default_logger_format() {
    let entry = LogEntry::new(LogSeverity::Error, "topaz::vulkan", "Device lost".to_string()).at("device.rs", 12);

    let line = DefaultLogger::format_entry(&entry);

    assert!(line.contains("[topaz::vulkan]"));
    assert!(line.contains("Device lost"));
    assert!(line.contains("device.rs:12"));
}
