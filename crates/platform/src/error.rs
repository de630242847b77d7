//! Error types for Fynx

use std::fmt;

/// Unified error type for all Fynx operations
#[derive(Debug)]
pub enum FynxError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error
    Protocol(String),

    /// Security error (key derivation, negotiation failure, etc.)
    Security(String),

    /// Local resource could not be obtained (SPIs, kernel transforms)
    Resource(String),

    /// Operation on a session that has already shut down
    Closed(String),

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for FynxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FynxError::Io(e) => write!(f, "IO error: {}", e),
            FynxError::Config(msg) => write!(f, "Configuration error: {}", msg),
            FynxError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            FynxError::Security(msg) => write!(f, "Security error: {}", msg),
            FynxError::Resource(msg) => write!(f, "Resource unavailable: {}", msg),
            FynxError::Closed(msg) => write!(f, "Session closed: {}", msg),
            FynxError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for FynxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FynxError::Io(e) => Some(e),
            FynxError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FynxError {
    fn from(err: std::io::Error) -> Self {
        FynxError::Io(err)
    }
}

/// Result type for Fynx operations
pub type FynxResult<T> = Result<T, FynxError>;
