//! Error types for Child SA session operations
//!
//! This module defines a unified error type for the child session controller.
//! Peer-signaled protocol errors map one-to-one onto RFC 7296 error notify
//! types, so the same value can be raised from an inbound error notify and
//! turned back into an outbound one.

use crate::ikev2::constants::NotifyType;
use crate::ikev2::payload::NotifyPayload;
use fynx_platform::FynxError;
use std::fmt;

/// Result type for child session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Child session errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing or malformed payload (INVALID_SYNTAX)
    InvalidSyntax(String),

    /// No acceptable proposal found (NO_PROPOSAL_CHOSEN)
    NoProposalChosen,

    /// KE payload absent or using the wrong DH group (INVALID_KE_PAYLOAD)
    InvalidKe {
        /// DH group the receiver expects
        expected_group: u16,
    },

    /// Peer refuses additional Child SAs (NO_ADDITIONAL_SAS)
    NoAdditionalSas,

    /// Peer is temporarily busy, retry later (TEMPORARY_FAILURE)
    TemporaryFailure,

    /// Peer could not assign an internal address (INTERNAL_ADDRESS_FAILURE)
    InternalAddressFailure,

    /// Traffic selectors not acceptable (TS_UNACCEPTABLE)
    TsUnacceptable,

    /// Peer only accepts a single selector pair (SINGLE_PAIR_REQUIRED)
    SinglePairRequired,

    /// Configuration payload required by peer (FAILED_CP_REQUIRED)
    FailedCpRequired,

    /// Referenced Child SA does not exist (CHILD_SA_NOT_FOUND)
    ChildSaNotFound,

    /// Invalid Security Parameter Index (INVALID_SPI)
    InvalidSpi(u32),

    /// Error notify with a type this implementation does not model
    UnrecognizedNotify(u16),

    /// Local resource (SPI, kernel transform) could not be obtained
    ResourceUnavailable(String),

    /// Child SA key derivation failed
    KeyDerivation(String),

    /// Cryptographic operation failed
    CryptoError(String),

    /// Invalid configuration parameter
    InvalidParameter(String),

    /// Operation not allowed in the current state
    InvalidState(String),

    /// Internal error (should not happen)
    Internal(String),
}

impl Error {
    /// Map an inbound error notify onto an error
    ///
    /// Returns `None` for status notifies (types at or above 16384).
    pub fn from_notify(notify: &NotifyPayload) -> Option<Error> {
        let notify_type = notify.notify_type;
        if !notify_type.is_error() {
            return None;
        }

        let err = match notify_type {
            NotifyType::InvalidSyntax => {
                Error::InvalidSyntax("peer reported INVALID_SYNTAX".into())
            }
            NotifyType::NoProposalChosen => Error::NoProposalChosen,
            NotifyType::InvalidKePayload => {
                let expected_group = match notify.data.as_slice() {
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                    _ => 0,
                };
                Error::InvalidKe { expected_group }
            }
            NotifyType::NoAdditionalSas => Error::NoAdditionalSas,
            NotifyType::TemporaryFailure => Error::TemporaryFailure,
            NotifyType::InternalAddressFailure => Error::InternalAddressFailure,
            NotifyType::TsUnacceptable => Error::TsUnacceptable,
            NotifyType::SinglePairRequired => Error::SinglePairRequired,
            NotifyType::FailedCpRequired => Error::FailedCpRequired,
            NotifyType::ChildSaNotFound => Error::ChildSaNotFound,
            NotifyType::InvalidSpi => Error::InvalidSpi(notify.spi.unwrap_or(0)),
            other => Error::UnrecognizedNotify(other.to_u16()),
        };
        Some(err)
    }

    /// Error notify type used when reporting this error to the peer
    ///
    /// Local errors with no wire representation are reported as INVALID_SYNTAX.
    pub fn notify_type(&self) -> NotifyType {
        match self {
            Error::NoProposalChosen => NotifyType::NoProposalChosen,
            Error::InvalidKe { .. } => NotifyType::InvalidKePayload,
            Error::NoAdditionalSas => NotifyType::NoAdditionalSas,
            Error::TemporaryFailure => NotifyType::TemporaryFailure,
            Error::InternalAddressFailure => NotifyType::InternalAddressFailure,
            Error::TsUnacceptable => NotifyType::TsUnacceptable,
            Error::SinglePairRequired => NotifyType::SinglePairRequired,
            Error::FailedCpRequired => NotifyType::FailedCpRequired,
            Error::ChildSaNotFound => NotifyType::ChildSaNotFound,
            Error::InvalidSpi(_) => NotifyType::InvalidSpi,
            _ => NotifyType::InvalidSyntax,
        }
    }

    /// Build the error notify payload reporting this error to the peer
    pub fn to_notify(&self) -> NotifyPayload {
        let data = match self {
            Error::InvalidKe { expected_group } => expected_group.to_be_bytes().to_vec(),
            _ => Vec::new(),
        };
        NotifyPayload::error(self.notify_type(), data)
    }

    /// Whether the error came from a peer error notify
    pub fn is_peer_signaled(&self) -> bool {
        matches!(
            self,
            Error::NoProposalChosen
                | Error::InvalidKe { .. }
                | Error::NoAdditionalSas
                | Error::TemporaryFailure
                | Error::InternalAddressFailure
                | Error::TsUnacceptable
                | Error::SinglePairRequired
                | Error::FailedCpRequired
                | Error::ChildSaNotFound
                | Error::InvalidSpi(_)
                | Error::UnrecognizedNotify(_)
        )
    }

    /// Whether a create procedure failing with this error closes the session
    ///
    /// Only TEMPORARY_FAILURE is retried.
    pub fn is_fatal_for_create(&self) -> bool {
        !matches!(self, Error::TemporaryFailure)
    }

    /// Error as reported to users
    ///
    /// Local resource and crypto failures surface as `Internal`.
    pub fn wrap_internal(self) -> Error {
        match self {
            Error::ResourceUnavailable(msg)
            | Error::KeyDerivation(msg)
            | Error::CryptoError(msg)
            | Error::InvalidState(msg) => Error::Internal(msg),
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSyntax(msg) => write!(f, "Invalid syntax: {}", msg),
            Error::NoProposalChosen => {
                write!(f, "No acceptable proposal found in negotiation")
            }
            Error::InvalidKe { expected_group } => {
                write!(f, "Invalid KE payload, expected DH group {}", expected_group)
            }
            Error::NoAdditionalSas => write!(f, "Peer does not accept additional Child SAs"),
            Error::TemporaryFailure => write!(f, "Temporary failure, retry later"),
            Error::InternalAddressFailure => {
                write!(f, "Peer failed to assign an internal address")
            }
            Error::TsUnacceptable => write!(f, "Traffic selectors unacceptable"),
            Error::SinglePairRequired => write!(f, "Single traffic selector pair required"),
            Error::FailedCpRequired => write!(f, "Configuration payload required by peer"),
            Error::ChildSaNotFound => write!(f, "Child SA not found"),
            Error::InvalidSpi(spi) => write!(f, "Invalid SPI: 0x{:08x}", spi),
            Error::UnrecognizedNotify(t) => write!(f, "Unrecognized error notify: {}", t),
            Error::ResourceUnavailable(msg) => write!(f, "Resource unavailable: {}", msg),
            Error::KeyDerivation(msg) => write!(f, "Key derivation failed: {}", msg),
            Error::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for FynxError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidParameter(msg) => FynxError::Config(msg),
            Error::ResourceUnavailable(msg) => FynxError::Resource(msg),
            Error::KeyDerivation(msg) | Error::CryptoError(msg) => FynxError::Security(msg),
            other => FynxError::Protocol(other.to_string()),
        }
    }
}
