//! Child SA Proposal and Transform structures
//!
//! Implements Child SA proposal negotiation as defined in RFC 7296 Section 3.3.
//!
//! # Structure
//!
//! ```text
//! SA Payload
//!   └── Proposal(s)       (ESP, one SPI per proposal)
//!         └── Transform(s) (ENCR, INTEG, D-H, ESN)
//! ```
//!
//! An offered proposal may list several transforms of the same type. A
//! negotiated proposal carries exactly one transform per type.

use crate::{Error, Result};

/// Transform Type (RFC 7296 Section 3.3.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransformType {
    /// Encryption Algorithm (ENCR)
    Encr = 1,
    /// Pseudo-random Function (PRF)
    Prf = 2,
    /// Integrity Algorithm (INTEG)
    Integ = 3,
    /// Diffie-Hellman Group (D-H)
    Dh = 4,
    /// Extended Sequence Numbers (ESN)
    Esn = 5,
}

impl TransformType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(TransformType::Encr),
            2 => Some(TransformType::Prf),
            3 => Some(TransformType::Integ),
            4 => Some(TransformType::Dh),
            5 => Some(TransformType::Esn),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Transform ID for Encryption (ENCR) algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EncrTransformId {
    /// AES-CBC, key length carried as attribute
    AesCbc = 12,
    /// AES-GCM with 16-byte ICV, key length carried as attribute
    AesGcm16 = 20,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305 = 28,
}

impl EncrTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            12 => Some(EncrTransformId::AesCbc),
            20 => Some(EncrTransformId::AesGcm16),
            28 => Some(EncrTransformId::ChaCha20Poly1305),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Check if this is an AEAD cipher
    pub fn is_aead(self) -> bool {
        matches!(
            self,
            EncrTransformId::AesGcm16 | EncrTransformId::ChaCha20Poly1305
        )
    }

    /// Salt bytes appended to the key for AEAD ciphers (RFC 4106, RFC 7634)
    pub fn salt_len(self) -> usize {
        if self.is_aead() {
            4
        } else {
            0
        }
    }
}

/// Transform ID for Integrity algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum IntegTransformId {
    /// No integrity (AEAD ciphers)
    None = 0,
    /// HMAC-SHA1-96
    HmacSha1_96 = 2,
    /// HMAC-SHA2-256-128 (128-bit ICV)
    HmacSha256_128 = 12,
    /// HMAC-SHA2-384-192 (192-bit ICV)
    HmacSha384_192 = 13,
    /// HMAC-SHA2-512-256 (256-bit ICV)
    HmacSha512_256 = 14,
}

impl IntegTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(IntegTransformId::None),
            2 => Some(IntegTransformId::HmacSha1_96),
            12 => Some(IntegTransformId::HmacSha256_128),
            13 => Some(IntegTransformId::HmacSha384_192),
            14 => Some(IntegTransformId::HmacSha512_256),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            IntegTransformId::None => 0,
            IntegTransformId::HmacSha1_96 => 20,
            IntegTransformId::HmacSha256_128 => 32,
            IntegTransformId::HmacSha384_192 => 48,
            IntegTransformId::HmacSha512_256 => 64,
        }
    }
}

/// Transform ID for Diffie-Hellman groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DhTransformId {
    /// No DH (when listed explicitly in an offer)
    None = 0,
    /// 1024-bit MODP Group
    Group2 = 2,
    /// 2048-bit MODP Group
    Group14 = 14,
    /// 3072-bit MODP Group
    Group15 = 15,
    /// 4096-bit MODP Group
    Group16 = 16,
    /// 256-bit random ECP group
    Group19 = 19,
    /// Curve25519
    Group31 = 31,
}

impl DhTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(DhTransformId::None),
            2 => Some(DhTransformId::Group2),
            14 => Some(DhTransformId::Group14),
            15 => Some(DhTransformId::Group15),
            16 => Some(DhTransformId::Group16),
            19 => Some(DhTransformId::Group19),
            31 => Some(DhTransformId::Group31),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Transform ID for Extended Sequence Numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EsnTransformId {
    /// 32-bit sequence numbers
    NoEsn = 0,
    /// 64-bit extended sequence numbers
    Esn = 1,
}

impl EsnTransformId {
    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Child SA Transform
///
/// Represents a single cryptographic algorithm choice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transform {
    /// Transform type
    pub transform_type: TransformType,

    /// Transform ID
    pub transform_id: u16,

    /// Key length attribute in bits (AES-CBC, AES-GCM)
    pub key_length: Option<u16>,
}

impl Transform {
    /// Create new transform
    pub fn new(transform_type: TransformType, transform_id: u16) -> Self {
        Transform {
            transform_type,
            transform_id,
            key_length: None,
        }
    }

    /// Create encryption transform
    pub fn encr(id: EncrTransformId, key_length: Option<u16>) -> Self {
        Transform {
            key_length,
            ..Transform::new(TransformType::Encr, id.to_u16())
        }
    }

    /// Create integrity transform
    pub fn integ(id: IntegTransformId) -> Self {
        Transform::new(TransformType::Integ, id.to_u16())
    }

    /// Create DH group transform
    pub fn dh(group: u16) -> Self {
        Transform::new(TransformType::Dh, group)
    }

    /// Create ESN transform
    pub fn esn(id: EsnTransformId) -> Self {
        Transform::new(TransformType::Esn, id.to_u16())
    }

    /// Check if this transform is compatible with another
    pub fn is_compatible_with(&self, other: &Transform) -> bool {
        self.transform_type == other.transform_type
            && self.transform_id == other.transform_id
            && self.key_length == other.key_length
    }

    /// Encryption key length in bytes, including AEAD salt
    pub fn encr_key_len(&self) -> Option<usize> {
        if self.transform_type != TransformType::Encr {
            return None;
        }
        let id = EncrTransformId::from_u16(self.transform_id)?;
        let key_bytes = match id {
            EncrTransformId::ChaCha20Poly1305 => 32,
            _ => usize::from(self.key_length?) / 8,
        };
        Some(key_bytes + id.salt_len())
    }
}

/// Protocol ID (RFC 7296 Section 3.3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolId {
    /// IKE protocol
    Ike = 1,
    /// Authentication Header
    Ah = 2,
    /// Encapsulating Security Payload
    Esp = 3,
}

impl ProtocolId {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ProtocolId::Ike),
            2 => Some(ProtocolId::Ah),
            3 => Some(ProtocolId::Esp),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Child SA Proposal
///
/// Represents a single proposal containing one or more transforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Proposal number (1-based)
    pub proposal_num: u8,

    /// Protocol ID (ESP or AH)
    pub protocol_id: ProtocolId,

    /// Sender's inbound SPI, absent in configured proposals
    pub spi: Option<u32>,

    /// List of transforms
    pub transforms: Vec<Transform>,
}

impl Proposal {
    /// Create new proposal
    pub fn new(proposal_num: u8, protocol_id: ProtocolId) -> Self {
        Proposal {
            proposal_num,
            protocol_id,
            spi: None,
            transforms: Vec::new(),
        }
    }

    /// Add transform to proposal
    pub fn add_transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Set SPI
    pub fn with_spi(mut self, spi: u32) -> Self {
        self.spi = Some(spi);
        self
    }

    /// Set proposal number
    pub fn with_proposal_num(mut self, proposal_num: u8) -> Self {
        self.proposal_num = proposal_num;
        self
    }

    /// Replace every D-H transform with a single group
    pub fn with_dh_group(mut self, group: u16) -> Self {
        self.transforms
            .retain(|t| t.transform_type != TransformType::Dh);
        self.transforms.push(Transform::dh(group));
        self
    }

    /// Get first transform by type
    pub fn get_transform(&self, transform_type: TransformType) -> Option<&Transform> {
        self.transforms
            .iter()
            .find(|t| t.transform_type == transform_type)
    }

    /// All transforms of a type
    pub fn transforms_of(&self, transform_type: TransformType) -> impl Iterator<Item = &Transform> {
        self.transforms
            .iter()
            .filter(move |t| t.transform_type == transform_type)
    }

    /// Real D-H groups in this proposal (the NONE group excluded)
    pub fn dh_groups(&self) -> Vec<u16> {
        self.transforms_of(TransformType::Dh)
            .map(|t| t.transform_id)
            .filter(|&id| id != DhTransformId::None.to_u16())
            .collect()
    }

    /// First real D-H group
    pub fn dh_group(&self) -> Option<u16> {
        self.dh_groups().into_iter().next()
    }

    /// Whether a non-null integrity algorithm is present
    pub fn has_integrity(&self) -> bool {
        self.transforms_of(TransformType::Integ)
            .any(|t| t.transform_id != IntegTransformId::None.to_u16())
    }

    /// Whether the first encryption transform is an AEAD cipher
    pub fn is_aead(&self) -> bool {
        self.get_transform(TransformType::Encr)
            .and_then(|t| EncrTransformId::from_u16(t.transform_id))
            .map(EncrTransformId::is_aead)
            .unwrap_or(false)
    }

    /// Negotiate this offered proposal against one configured proposal
    ///
    /// Picks one transform per type, preferring the offer's order. `extra_dh`
    /// is an additional acceptable D-H group (the IKE SA's group during a
    /// remote rekey). Returns `None` when any type cannot be matched.
    pub fn negotiate(&self, configured: &Proposal, extra_dh: Option<u16>) -> Option<Proposal> {
        if self.protocol_id != configured.protocol_id {
            return None;
        }

        let mut chosen = Proposal {
            proposal_num: self.proposal_num,
            protocol_id: self.protocol_id,
            spi: self.spi,
            transforms: Vec::new(),
        };

        for transform_type in [TransformType::Encr, TransformType::Integ, TransformType::Esn] {
            let wanted: Vec<&Transform> = configured.transforms_of(transform_type).collect();
            let offered: Vec<&Transform> = self.transforms_of(transform_type).collect();
            match (wanted.is_empty(), offered.is_empty()) {
                (true, true) => continue,
                (true, false) => {
                    // Only a NONE integrity may be offered when not configured
                    if offered.iter().all(|t| t.transform_id == 0) {
                        continue;
                    }
                    return None;
                }
                (false, true) => {
                    if transform_type == TransformType::Esn {
                        continue;
                    }
                    return None;
                }
                (false, false) => {
                    let pick = offered
                        .iter()
                        .find(|o| wanted.iter().any(|w| o.is_compatible_with(w)))?;
                    chosen.transforms.push((*pick).clone());
                }
            }
        }

        let offered_dh = self.dh_groups();
        let configured_dh = configured.dh_groups();
        if offered_dh.is_empty() {
            if !configured_dh.is_empty() {
                return None;
            }
        } else {
            let group = offered_dh
                .iter()
                .copied()
                .find(|g| configured_dh.contains(g) || extra_dh == Some(*g))?;
            chosen.transforms.push(Transform::dh(group));
        }

        Some(chosen)
    }

    /// Check that this negotiated proposal was selected from an offer
    ///
    /// Every type carries exactly one transform, each drawn from the offer,
    /// and every type the offer lists must be answered (a missing D-H type
    /// is allowed only when the offer lists the NONE group).
    pub fn is_negotiated_from(&self, offered: &Proposal) -> bool {
        if self.protocol_id != offered.protocol_id {
            return false;
        }

        for transform_type in [
            TransformType::Encr,
            TransformType::Integ,
            TransformType::Dh,
            TransformType::Esn,
        ] {
            let mine: Vec<&Transform> = self.transforms_of(transform_type).collect();
            let theirs: Vec<&Transform> = offered.transforms_of(transform_type).collect();

            if mine.len() > 1 {
                return false;
            }
            match mine.first() {
                Some(t) => {
                    if !theirs.iter().any(|o| o.is_compatible_with(t)) {
                        return false;
                    }
                }
                None => {
                    let optional = theirs.is_empty()
                        || transform_type == TransformType::Esn
                        || theirs.iter().any(|o| o.transform_id == 0);
                    if !optional {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Same algorithms as another proposal once D-H groups are ignored
    pub fn matches_ignoring_dh(&self, other: &Proposal) -> bool {
        let strip = |p: &Proposal| -> Vec<Transform> {
            let mut ts: Vec<Transform> = p
                .transforms
                .iter()
                .filter(|t| t.transform_type != TransformType::Dh)
                .cloned()
                .collect();
            ts.sort_by_key(|t| (t.transform_type.to_u8(), t.transform_id, t.key_length));
            ts
        };
        self.protocol_id == other.protocol_id && strip(self) == strip(other)
    }
}

/// Select first acceptable proposal
///
/// # Arguments
///
/// * `offered` - Proposals offered by peer
/// * `configured` - Locally configured acceptable proposals
/// * `extra_dh` - Additional acceptable D-H group
///
/// # Returns
///
/// Returns the negotiated proposal, or `NoProposalChosen` if none matches.
pub fn select_proposal(
    offered: &[Proposal],
    configured: &[Proposal],
    extra_dh: Option<u16>,
) -> Result<Proposal> {
    offered
        .iter()
        .find_map(|o| configured.iter().find_map(|c| o.negotiate(c, extra_dh)))
        .ok_or(Error::NoProposalChosen)
}
