//! IKEv2 protocol constants used by Child SA exchanges (RFC 7296)

/// Size of an ESP/AH SPI on the wire (4 bytes)
pub const CHILD_SPI_SIZE: usize = 4;

/// Exchange Types (RFC 7296 Section 3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExchangeType {
    /// IKE_SA_INIT exchange (34)
    IkeSaInit = 34,
    /// IKE_AUTH exchange (35)
    IkeAuth = 35,
    /// CREATE_CHILD_SA exchange (36)
    CreateChildSa = 36,
    /// INFORMATIONAL exchange (37)
    Informational = 37,
}

impl ExchangeType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            34 => Some(ExchangeType::IkeSaInit),
            35 => Some(ExchangeType::IkeAuth),
            36 => Some(ExchangeType::CreateChildSa),
            37 => Some(ExchangeType::Informational),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Child-level meaning of an inbound request
///
/// The parent IKE session classifies each inbound request before routing it
/// to the child session that owns the referenced SPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeSubtype {
    /// CREATE_CHILD_SA carrying a REKEY_SA notify
    RekeyChild,
    /// INFORMATIONAL carrying Delete payloads for ESP/AH SPIs
    DeleteChild,
}

/// Payload Types (RFC 7296 Section 3.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadType {
    /// Security Association (33)
    SA = 33,
    /// Key Exchange (34)
    KE = 34,
    /// Nonce (40)
    Nonce = 40,
    /// Notify (41)
    N = 41,
    /// Delete (42)
    D = 42,
    /// Traffic Selector - Initiator (44)
    TSi = 44,
    /// Traffic Selector - Responder (45)
    TSr = 45,
    /// Configuration (47)
    CP = 47,
}

impl PayloadType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            33 => Some(PayloadType::SA),
            34 => Some(PayloadType::KE),
            40 => Some(PayloadType::Nonce),
            41 => Some(PayloadType::N),
            42 => Some(PayloadType::D),
            44 => Some(PayloadType::TSi),
            45 => Some(PayloadType::TSr),
            47 => Some(PayloadType::CP),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Notify Message Types (RFC 7296 Section 3.10.1)
///
/// Values below 16384 are errors, the rest are status types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NotifyType {
    /// UNSUPPORTED_CRITICAL_PAYLOAD (1)
    UnsupportedCriticalPayload = 1,
    /// INVALID_SYNTAX (7)
    InvalidSyntax = 7,
    /// INVALID_SPI (11)
    InvalidSpi = 11,
    /// NO_PROPOSAL_CHOSEN (14)
    NoProposalChosen = 14,
    /// INVALID_KE_PAYLOAD (17)
    InvalidKePayload = 17,
    /// SINGLE_PAIR_REQUIRED (34)
    SinglePairRequired = 34,
    /// NO_ADDITIONAL_SAS (35)
    NoAdditionalSas = 35,
    /// INTERNAL_ADDRESS_FAILURE (36)
    InternalAddressFailure = 36,
    /// FAILED_CP_REQUIRED (37)
    FailedCpRequired = 37,
    /// TS_UNACCEPTABLE (38)
    TsUnacceptable = 38,
    /// TEMPORARY_FAILURE (43)
    TemporaryFailure = 43,
    /// CHILD_SA_NOT_FOUND (44)
    ChildSaNotFound = 44,
    /// USE_TRANSPORT_MODE (16391)
    UseTransportMode = 16391,
    /// REKEY_SA (16393)
    RekeySa = 16393,
    /// ESP_TFC_PADDING_NOT_SUPPORTED (16394)
    EspTfcPaddingNotSupported = 16394,
    /// NON_FIRST_FRAGMENTS_ALSO (16395)
    NonFirstFragmentsAlso = 16395,
}

impl NotifyType {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(NotifyType::UnsupportedCriticalPayload),
            7 => Some(NotifyType::InvalidSyntax),
            11 => Some(NotifyType::InvalidSpi),
            14 => Some(NotifyType::NoProposalChosen),
            17 => Some(NotifyType::InvalidKePayload),
            34 => Some(NotifyType::SinglePairRequired),
            35 => Some(NotifyType::NoAdditionalSas),
            36 => Some(NotifyType::InternalAddressFailure),
            37 => Some(NotifyType::FailedCpRequired),
            38 => Some(NotifyType::TsUnacceptable),
            43 => Some(NotifyType::TemporaryFailure),
            44 => Some(NotifyType::ChildSaNotFound),
            16391 => Some(NotifyType::UseTransportMode),
            16393 => Some(NotifyType::RekeySa),
            16394 => Some(NotifyType::EspTfcPaddingNotSupported),
            16395 => Some(NotifyType::NonFirstFragmentsAlso),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Error notify types occupy 0..16384
    pub fn is_error(self) -> bool {
        self.to_u16() < 16384
    }
}
