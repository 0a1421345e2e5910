//! Modbus Error Types
//!
//! Every failure the register layer can produce. Callers classify by variant:
//! connection problems, call-shape rejections, device exceptions, malformed
//! payloads and decode failures are all distinct.

use crate::constants::exception_description;
use thiserror::Error;

/// Result type for fieldlink-modbus operations
pub type ModbusResult<T> = std::result::Result<T, ModbusError>;

/// Register access errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModbusError {
    /// TCP connect refused or reset
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connect, send or receive exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Socket I/O failure after the connection was established
    #[error("IO error: {0}")]
    Io(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Frame-level violation (bad protocol id, foreign transaction id, ...)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The client does not accept this call shape
    #[error("Unsupported call: {0}")]
    Unsupported(String),

    /// No call convention was accepted by the client
    #[error("No call convention accepted for {operation} ({attempted} attempted)")]
    Capability {
        operation: &'static str,
        attempted: usize,
    },

    /// Exception response returned by the device
    #[error(
        "Device exception on FC{:02X}: 0x{:02X} ({})",
        .function,
        .code,
        exception_description(*.code)
    )]
    Device { function: u8, code: u8 },

    /// Empty, short or inconsistent register payload
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Registers could not be turned into a value
    #[error("Decode error: {0}")]
    Decode(String),

    /// Request parameters outside protocol limits
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Io(err.to_string())
    }
}

// Helper methods for creating errors
impl ModbusError {
    pub fn connection(msg: impl Into<String>) -> Self {
        ModbusError::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ModbusError::Timeout(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        ModbusError::Protocol(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        ModbusError::Unsupported(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        ModbusError::Malformed(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        ModbusError::Decode(msg.into())
    }

    /// Check if the transport is unusable and must be reopened
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            ModbusError::Connection(_)
                | ModbusError::Timeout(_)
                | ModbusError::Io(_)
                | ModbusError::NotConnected
        )
    }

    /// Check if this error came from the device itself
    pub fn is_device_error(&self) -> bool {
        matches!(self, ModbusError::Device { .. })
    }

    /// Short classification string for API payloads and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ModbusError::Connection(_) | ModbusError::Timeout(_) | ModbusError::NotConnected => {
                "connection"
            },
            ModbusError::Io(_) => "io",
            ModbusError::Protocol(_) => "protocol",
            ModbusError::Unsupported(_) => "unsupported",
            ModbusError::Capability { .. } => "capability",
            ModbusError::Device { .. } => "device",
            ModbusError::Malformed(_) => "malformed",
            ModbusError::Decode(_) => "decode",
            ModbusError::InvalidRequest(_) => "invalid_request",
        }
    }
}
