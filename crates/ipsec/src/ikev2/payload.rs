//! IKEv2 payloads exchanged by Child SA procedures
//!
//! Implements the payload model of RFC 7296 Section 3 for the payload types
//! that appear in CREATE_CHILD_SA and INFORMATIONAL exchanges. Payloads are
//! typed values: bytes on the wire are produced and parsed by the parent IKE
//! session.

use super::constants::{NotifyType, PayloadType};
use super::proposal::{Proposal, ProtocolId};
use crate::{Error, Result};
use rand::RngCore;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IKE Payload types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IkePayload {
    /// Security Association payload
    SA(SaPayload),

    /// Key Exchange payload
    KE(KePayload),

    /// Nonce payload
    Nonce(NoncePayload),

    /// Traffic Selector payload (Initiator)
    TSi(TrafficSelectorsPayload),

    /// Traffic Selector payload (Responder)
    TSr(TrafficSelectorsPayload),

    /// Notify payload
    N(NotifyPayload),

    /// Delete payload
    D(DeletePayload),

    /// Configuration payload
    CP(ConfigPayload),
}

impl IkePayload {
    /// Get payload type
    pub fn payload_type(&self) -> PayloadType {
        match self {
            IkePayload::SA(_) => PayloadType::SA,
            IkePayload::KE(_) => PayloadType::KE,
            IkePayload::Nonce(_) => PayloadType::Nonce,
            IkePayload::TSi(_) => PayloadType::TSi,
            IkePayload::TSr(_) => PayloadType::TSr,
            IkePayload::N(_) => PayloadType::N,
            IkePayload::D(_) => PayloadType::D,
            IkePayload::CP(_) => PayloadType::CP,
        }
    }
}

/// Lookup helpers over a received or built payload list
pub trait PayloadListExt {
    /// First SA payload
    fn sa(&self) -> Option<&SaPayload>;
    /// First KE payload
    fn ke(&self) -> Option<&KePayload>;
    /// All KE payloads
    fn ke_payloads(&self) -> Vec<&KePayload>;
    /// First Nonce payload
    fn nonce(&self) -> Option<&NoncePayload>;
    /// First TSi payload
    fn ts_initiator(&self) -> Option<&TrafficSelectorsPayload>;
    /// First TSr payload
    fn ts_responder(&self) -> Option<&TrafficSelectorsPayload>;
    /// All Notify payloads
    fn notifies(&self) -> Vec<&NotifyPayload>;
    /// First error notify
    fn error_notify(&self) -> Option<&NotifyPayload>;
    /// First status notify of a type
    fn status_notify(&self, notify_type: NotifyType) -> Option<&NotifyPayload>;
    /// All Delete payloads
    fn deletes(&self) -> Vec<&DeletePayload>;
    /// First Configuration payload
    fn config(&self) -> Option<&ConfigPayload>;
}

impl PayloadListExt for [IkePayload] {
    fn sa(&self) -> Option<&SaPayload> {
        self.iter().find_map(|p| match p {
            IkePayload::SA(sa) => Some(sa),
            _ => None,
        })
    }

    fn ke(&self) -> Option<&KePayload> {
        self.ke_payloads().into_iter().next()
    }

    fn ke_payloads(&self) -> Vec<&KePayload> {
        self.iter()
            .filter_map(|p| match p {
                IkePayload::KE(ke) => Some(ke),
                _ => None,
            })
            .collect()
    }

    fn nonce(&self) -> Option<&NoncePayload> {
        self.iter().find_map(|p| match p {
            IkePayload::Nonce(n) => Some(n),
            _ => None,
        })
    }

    fn ts_initiator(&self) -> Option<&TrafficSelectorsPayload> {
        self.iter().find_map(|p| match p {
            IkePayload::TSi(ts) => Some(ts),
            _ => None,
        })
    }

    fn ts_responder(&self) -> Option<&TrafficSelectorsPayload> {
        self.iter().find_map(|p| match p {
            IkePayload::TSr(ts) => Some(ts),
            _ => None,
        })
    }

    fn notifies(&self) -> Vec<&NotifyPayload> {
        self.iter()
            .filter_map(|p| match p {
                IkePayload::N(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    fn error_notify(&self) -> Option<&NotifyPayload> {
        self.notifies()
            .into_iter()
            .find(|n| n.notify_type.is_error())
    }

    fn status_notify(&self, notify_type: NotifyType) -> Option<&NotifyPayload> {
        self.notifies()
            .into_iter()
            .find(|n| n.notify_type == notify_type)
    }

    fn deletes(&self) -> Vec<&DeletePayload> {
        self.iter()
            .filter_map(|p| match p {
                IkePayload::D(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    fn config(&self) -> Option<&ConfigPayload> {
        self.iter().find_map(|p| match p {
            IkePayload::CP(cp) => Some(cp),
            _ => None,
        })
    }
}

/// Nonce Payload (RFC 7296 Section 3.9)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// ~                            Nonce Data                         ~
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoncePayload {
    /// Nonce data (typically 16-32 bytes of random data)
    pub nonce: Vec<u8>,
}

impl NoncePayload {
    /// Minimum nonce size (16 bytes)
    pub const MIN_SIZE: usize = 16;

    /// Maximum nonce size (256 bytes)
    pub const MAX_SIZE: usize = 256;

    /// Size of locally generated nonces (32 bytes)
    pub const DEFAULT_SIZE: usize = 32;

    /// Create new nonce payload
    pub fn new(nonce: Vec<u8>) -> Result<Self> {
        if nonce.len() < Self::MIN_SIZE {
            return Err(Error::InvalidSyntax(format!(
                "Nonce too short: {} bytes (minimum {})",
                nonce.len(),
                Self::MIN_SIZE
            )));
        }

        if nonce.len() > Self::MAX_SIZE {
            return Err(Error::InvalidSyntax(format!(
                "Nonce too long: {} bytes (maximum {})",
                nonce.len(),
                Self::MAX_SIZE
            )));
        }

        Ok(NoncePayload { nonce })
    }

    /// Generate a fresh random nonce
    pub fn generate() -> Self {
        let mut nonce = vec![0u8; Self::DEFAULT_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        NoncePayload { nonce }
    }
}

/// Key Exchange Payload (RFC 7296 Section 3.4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KePayload {
    /// Diffie-Hellman group number
    pub dh_group: u16,

    /// Key exchange data (public key)
    pub key_data: Vec<u8>,
}

impl KePayload {
    /// Create new KE payload
    pub fn new(dh_group: u16, key_data: Vec<u8>) -> Self {
        KePayload { dh_group, key_data }
    }
}

/// Security Association Payload (RFC 7296 Section 3.3)
///
/// Contains one or more proposals for security association negotiation.
/// A response carries exactly one, the chosen proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaPayload {
    /// Whether this SA payload answers a request
    pub is_response: bool,

    /// List of proposals
    pub proposals: Vec<Proposal>,
}

impl SaPayload {
    /// Create SA payload for a request
    pub fn request(proposals: Vec<Proposal>) -> Self {
        SaPayload {
            is_response: false,
            proposals,
        }
    }

    /// Create SA payload for a response carrying the chosen proposal
    pub fn response(proposal: Proposal) -> Self {
        SaPayload {
            is_response: true,
            proposals: vec![proposal],
        }
    }

    /// Get proposals
    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }

    /// The single chosen proposal of a response
    ///
    /// # Errors
    ///
    /// Returns `InvalidSyntax` unless exactly one proposal with an SPI is present.
    pub fn chosen_proposal(&self) -> Result<&Proposal> {
        match self.proposals.as_slice() {
            [only] if only.spi.is_some() => Ok(only),
            [_] => Err(Error::InvalidSyntax("chosen proposal carries no SPI".into())),
            _ => Err(Error::InvalidSyntax(format!(
                "response SA carries {} proposals",
                self.proposals.len()
            ))),
        }
    }
}

/// Traffic Selector Type (RFC 7296 Section 3.13.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TsType {
    /// IPv4 address range
    Ipv4AddrRange = 7,
    /// IPv6 address range
    Ipv6AddrRange = 8,
}

/// Single Traffic Selector (RFC 7296 Section 3.13.1)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrafficSelector {
    /// Selector type, derived from the address family
    pub ts_type: TsType,

    /// IP protocol ID (0 = any)
    pub ip_protocol: u8,

    /// Start port
    pub start_port: u16,

    /// End port
    pub end_port: u16,

    /// Start address
    pub start_address: IpAddr,

    /// End address
    pub end_address: IpAddr,
}

impl TrafficSelector {
    /// Create and validate a traffic selector
    pub fn new(
        ip_protocol: u8,
        start_port: u16,
        end_port: u16,
        start_address: IpAddr,
        end_address: IpAddr,
    ) -> Result<Self> {
        let ts_type = match (start_address, end_address) {
            (IpAddr::V4(_), IpAddr::V4(_)) => TsType::Ipv4AddrRange,
            (IpAddr::V6(_), IpAddr::V6(_)) => TsType::Ipv6AddrRange,
            _ => {
                return Err(Error::InvalidParameter(
                    "traffic selector mixes address families".into(),
                ))
            }
        };
        if start_port > end_port {
            return Err(Error::InvalidParameter(format!(
                "start port {} above end port {}",
                start_port, end_port
            )));
        }
        if start_address > end_address {
            return Err(Error::InvalidParameter(format!(
                "start address {} above end address {}",
                start_address, end_address
            )));
        }

        Ok(TrafficSelector {
            ts_type,
            ip_protocol,
            start_port,
            end_port,
            start_address,
            end_address,
        })
    }

    /// Any IPv4 address, any port, any protocol
    pub fn ipv4_any() -> Self {
        TrafficSelector {
            ts_type: TsType::Ipv4AddrRange,
            ip_protocol: 0,
            start_port: 0,
            end_port: u16::MAX,
            start_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            end_address: IpAddr::V4(Ipv4Addr::BROADCAST),
        }
    }

    /// Any IPv6 address, any port, any protocol
    pub fn ipv6_any() -> Self {
        TrafficSelector {
            ts_type: TsType::Ipv6AddrRange,
            ip_protocol: 0,
            start_port: 0,
            end_port: u16::MAX,
            start_address: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            end_address: IpAddr::V6(Ipv6Addr::from(u128::MAX)),
        }
    }

    /// Whether `other` is entirely covered by this selector
    pub fn contains(&self, other: &TrafficSelector) -> bool {
        self.ts_type == other.ts_type
            && (self.ip_protocol == 0 || self.ip_protocol == other.ip_protocol)
            && self.start_port <= other.start_port
            && other.end_port <= self.end_port
            && self.start_address <= other.start_address
            && other.end_address <= self.end_address
    }
}

/// Traffic Selectors Payload (RFC 7296 Section 3.13)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSelectorsPayload {
    /// TSi when true, TSr otherwise
    pub is_initiator: bool,

    /// Selectors
    pub selectors: Vec<TrafficSelector>,
}

impl TrafficSelectorsPayload {
    /// Create TSi payload
    pub fn initiator(selectors: Vec<TrafficSelector>) -> Self {
        TrafficSelectorsPayload {
            is_initiator: true,
            selectors,
        }
    }

    /// Create TSr payload
    pub fn responder(selectors: Vec<TrafficSelector>) -> Self {
        TrafficSelectorsPayload {
            is_initiator: false,
            selectors,
        }
    }

    /// Whether every selector here falls within some selector of `bounds`
    pub fn is_subset_of(&self, bounds: &[TrafficSelector]) -> bool {
        self.selectors
            .iter()
            .all(|ts| bounds.iter().any(|b| b.contains(ts)))
    }
}

/// Notify Payload (RFC 7296 Section 3.10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyPayload {
    /// Protocol of the SA named by `spi`, absent when no SPI is carried
    pub protocol_id: Option<ProtocolId>,

    /// SPI the notify refers to
    pub spi: Option<u32>,

    /// Notify message type
    pub notify_type: NotifyType,

    /// Notification data
    pub data: Vec<u8>,
}

impl NotifyPayload {
    /// Create an error notify without SPI
    pub fn error(notify_type: NotifyType, data: Vec<u8>) -> Self {
        NotifyPayload {
            protocol_id: None,
            spi: None,
            notify_type,
            data,
        }
    }

    /// Create a status notify without SPI or data
    pub fn status(notify_type: NotifyType) -> Self {
        NotifyPayload::error(notify_type, Vec::new())
    }

    /// Create a REKEY_SA notify naming the ESP SA being rekeyed
    pub fn rekey_sa(spi: u32) -> Self {
        NotifyPayload {
            protocol_id: Some(ProtocolId::Esp),
            spi: Some(spi),
            notify_type: NotifyType::RekeySa,
            data: Vec::new(),
        }
    }
}

/// Delete Payload (RFC 7296 Section 3.11)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePayload {
    /// Protocol of the SAs being deleted
    pub protocol_id: ProtocolId,

    /// SPIs to delete (empty for IKE)
    pub spis: Vec<u32>,
}

impl DeletePayload {
    /// Delete ESP SAs
    pub fn esp(spis: Vec<u32>) -> Self {
        DeletePayload {
            protocol_id: ProtocolId::Esp,
            spis,
        }
    }

    /// Delete the IKE SA that carries this message
    pub fn ike() -> Self {
        DeletePayload {
            protocol_id: ProtocolId::Ike,
            spis: Vec::new(),
        }
    }
}

/// Configuration Payload type (RFC 7296 Section 3.15)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigType {
    /// CFG_REQUEST
    Request = 1,
    /// CFG_REPLY
    Reply = 2,
}

/// Configuration attribute (RFC 7296 Section 3.15.1)
///
/// `None` values are requests for the peer to assign one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigAttribute {
    /// INTERNAL_IP4_ADDRESS
    Ipv4Address(Option<Ipv4Addr>),
    /// INTERNAL_IP4_NETMASK
    Ipv4Netmask(Option<Ipv4Addr>),
    /// INTERNAL_IP4_DNS
    Ipv4Dns(Option<Ipv4Addr>),
    /// INTERNAL_IP4_DHCP
    Ipv4Dhcp(Option<Ipv4Addr>),
    /// INTERNAL_IP4_SUBNET (address, netmask)
    Ipv4Subnet(Option<(Ipv4Addr, Ipv4Addr)>),
    /// INTERNAL_IP6_ADDRESS (address, prefix length)
    Ipv6Address(Option<(Ipv6Addr, u8)>),
    /// INTERNAL_IP6_DNS
    Ipv6Dns(Option<Ipv6Addr>),
    /// INTERNAL_IP6_SUBNET (address, prefix length)
    Ipv6Subnet(Option<(Ipv6Addr, u8)>),
}

/// Address with prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkAddress {
    /// Address
    pub address: IpAddr,
    /// Prefix length in bits
    pub prefix_len: u8,
}

fn netmask_prefix_len(mask: Ipv4Addr) -> u8 {
    // Ones are counted from the top; a malformed mask yields its leading run.
    u32::from(mask).leading_ones() as u8
}

/// Configuration Payload (RFC 7296 Section 3.15)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPayload {
    /// Request or reply
    pub config_type: ConfigType,

    /// Attributes
    pub attributes: Vec<ConfigAttribute>,
}

impl ConfigPayload {
    /// Create CFG_REQUEST
    pub fn request(attributes: Vec<ConfigAttribute>) -> Self {
        ConfigPayload {
            config_type: ConfigType::Request,
            attributes,
        }
    }

    /// Create CFG_REPLY
    pub fn reply(attributes: Vec<ConfigAttribute>) -> Self {
        ConfigPayload {
            config_type: ConfigType::Reply,
            attributes,
        }
    }

    /// Assigned internal addresses
    ///
    /// IPv4 prefixes come from INTERNAL_IP4_NETMASK when present, /32 otherwise.
    pub fn internal_addresses(&self) -> Vec<LinkAddress> {
        let v4_prefix = self
            .attributes
            .iter()
            .find_map(|a| match a {
                ConfigAttribute::Ipv4Netmask(Some(mask)) => Some(netmask_prefix_len(*mask)),
                _ => None,
            })
            .unwrap_or(32);

        self.attributes
            .iter()
            .filter_map(|a| match a {
                ConfigAttribute::Ipv4Address(Some(addr)) => Some(LinkAddress {
                    address: IpAddr::V4(*addr),
                    prefix_len: v4_prefix,
                }),
                ConfigAttribute::Ipv6Address(Some((addr, prefix_len))) => Some(LinkAddress {
                    address: IpAddr::V6(*addr),
                    prefix_len: *prefix_len,
                }),
                _ => None,
            })
            .collect()
    }

    /// Assigned internal subnets
    pub fn internal_subnets(&self) -> Vec<LinkAddress> {
        self.attributes
            .iter()
            .filter_map(|a| match a {
                ConfigAttribute::Ipv4Subnet(Some((addr, mask))) => Some(LinkAddress {
                    address: IpAddr::V4(*addr),
                    prefix_len: netmask_prefix_len(*mask),
                }),
                ConfigAttribute::Ipv6Subnet(Some((addr, prefix_len))) => Some(LinkAddress {
                    address: IpAddr::V6(*addr),
                    prefix_len: *prefix_len,
                }),
                _ => None,
            })
            .collect()
    }

    /// Assigned DNS servers
    pub fn dns_servers(&self) -> Vec<IpAddr> {
        self.attributes
            .iter()
            .filter_map(|a| match a {
                ConfigAttribute::Ipv4Dns(Some(addr)) => Some(IpAddr::V4(*addr)),
                ConfigAttribute::Ipv6Dns(Some(addr)) => Some(IpAddr::V6(*addr)),
                _ => None,
            })
            .collect()
    }

    /// Assigned DHCP servers
    pub fn dhcp_servers(&self) -> Vec<IpAddr> {
        self.attributes
            .iter()
            .filter_map(|a| match a {
                ConfigAttribute::Ipv4Dhcp(Some(addr)) => Some(IpAddr::V4(*addr)),
                _ => None,
            })
            .collect()
    }
}
