//! # CareWave Common
//!
//! Common error types and logging configuration shared by the CareWave
//! workspace crates.
//!
//! ## Features
//!
//! - Unified error type with backtrace support for internal failures
//! - Logging configuration and setup
//! - Result extension traits

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for CareWave.
#[derive(Error, Debug)]
pub enum CareWaveError {
    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// Storage shim errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Service worker registration errors.
    #[error("Registration error: {0}")]
    Registration(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl CareWaveError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a registration error.
    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration(message.into())
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            CareWaveError::Config(_) => "config",
            CareWaveError::Storage(_) => "storage",
            CareWaveError::Registration(_) => "registration",
            CareWaveError::Io(_) => "io",
            CareWaveError::NotFound(_) => "not_found",
            CareWaveError::InvalidArgument(_) => "invalid_argument",
            CareWaveError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for CareWave operations.
pub type Result<T> = std::result::Result<T, CareWaveError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| CareWaveError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| CareWaveError::NotFound(resource.into()))
    }
}
