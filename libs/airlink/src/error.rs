//! Error types for the airlink library
//!
//! Wire-level faults are described by [`TransportError`]; the session retries
//! the transient ones before they are wrapped into [`AirlinkError::Transport`].

use thiserror::Error;

/// Errors raised while talking to the bridge over Modbus
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// No response within the per-request deadline
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Frame checksum did not match
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    Crc { expected: u16, actual: u16 },

    /// Response could not be decoded or did not match the request
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Response came from a different slave than the one addressed
    #[error("Response from slave {actual}, expected {expected}")]
    SlaveMismatch { expected: u8, actual: u8 },

    /// The slave answered with a Modbus exception
    #[error("Modbus exception 0x{code:02X} ({}) for function 0x{function:02X}", describe(.code))]
    Exception { function: u8, code: u8 },

    /// Underlying serial I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The transport has no open connection
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Invalid transport configuration
    #[error("Transport configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// Whether a retry of the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_)
            | Self::Crc { .. }
            | Self::Malformed(_)
            | Self::SlaveMismatch { .. }
            | Self::Io(_) => true,
            Self::Exception { code, .. } => matches!(code, 0x05 | 0x06 | 0x0A | 0x0B),
            Self::NotConnected(_) | Self::Config(_) => false,
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<tokio_serial::Error> for TransportError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::NotConnected(err.to_string())
    }
}

fn describe(code: &u8) -> &'static str {
    exception_description(*code)
}

/// Human readable name of a Modbus exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

/// Application visible error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AirlinkError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown product code 0x{0:08X}")]
    UnknownProduct(u32),

    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("A binding session is already active")]
    BindingInProgress,

    #[error("Invalid slave address: {0}")]
    InvalidAddress(String),

    #[error("Slave {0} is not bound to the bridge")]
    NodeNotBound(u8),

    #[error("Field {field} holds {actual}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for airlink operations
pub type Result<T> = std::result::Result<T, AirlinkError>;

impl AirlinkError {
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedCapability(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for transport faults that survived the retry budget
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<figment::Error> for AirlinkError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for AirlinkError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(format!("invalid profile definition: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Timeout(1000).is_transient());
        assert!(TransportError::Crc {
            expected: 0x0A84,
            actual: 0
        }
        .is_transient());
        assert!(TransportError::Exception {
            function: 0x83,
            code: 0x06
        }
        .is_transient());
        assert!(!TransportError::Exception {
            function: 0x83,
            code: 0x02
        }
        .is_transient());
        assert!(!TransportError::Config("bad".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::Exception {
            function: 0x83,
            code: 0x02,
        };
        assert_eq!(
            err.to_string(),
            "Modbus exception 0x02 (Illegal Data Address) for function 0x83"
        );

        let err = AirlinkError::UnknownProduct(0x0001C849);
        assert_eq!(err.to_string(), "Unknown product code 0x0001C849");
    }
}
