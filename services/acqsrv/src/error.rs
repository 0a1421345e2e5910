//! Error types for acqsrv

use fieldlink_modbus::ModbusError;
use thiserror::Error;

/// Result type for acqsrv operations
pub type Result<T> = std::result::Result<T, AcqError>;

/// Service-level errors
#[derive(Debug, Error)]
pub enum AcqError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Runtime Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Modbus(#[from] ModbusError),
}

impl AcqError {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AcqError::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for AcqError {
    fn from(err: figment::Error) -> Self {
        AcqError::Configuration(err.to_string())
    }
}

/// Why one acquisition cycle produced no reading.
///
/// A cycle error never escapes the poller; it is logged and the previous
/// snapshot stays authoritative.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CycleError {
    #[error("connect failed: {0}")]
    Connect(ModbusError),

    #[error("required block '{block}' failed: {source}")]
    RequiredBlock {
        block: String,
        #[source]
        source: ModbusError,
    },

    #[error("required block '{block}' decoded {decoded} of {expected} floats")]
    Decode {
        block: String,
        decoded: usize,
        expected: usize,
    },
}

impl CycleError {
    /// Short classification used in logs and API payloads
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Connect(_) => "connect_failed",
            CycleError::RequiredBlock { .. } => "read_error",
            CycleError::Decode { .. } => "decode_error",
        }
    }
}
