//! Error types for the Topaz renderer frontend
//!
//! Every fallible operation in the frontend and its backends returns
//! [`Result`]. Contract violations (bad handles, illegal shader stage
//! combinations, resizing a fixed resource...) are reported with their own
//! variants so callers can tell them apart from backend failures.

use std::fmt;

/// Result type for Topaz operations
pub type Result<T> = std::result::Result<T, Error>;

/// Topaz errors
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Backend-specific error (Vulkan, mock device, etc.)
    BackendError(String),

    /// Out of GPU memory (device memory or a command pool)
    OutOfMemory,

    /// Invalid resource (zero-sized, wrong access mode, conflicting flags...)
    InvalidResource(String),

    /// A resource or renderer handle that does not resolve to anything
    InvalidHandle(String),

    /// Renderer configuration that can never be valid
    InvalidConfiguration(String),

    /// Initialization failed (device, surface, renderer)
    InitializationFailed(String),

    /// The presentation surface no longer matches the window
    OutOfDate,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InvalidHandle(msg) => write!(f, "Invalid handle: {}", msg),
            Error::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::OutOfDate => write!(f, "Surface out of date"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
