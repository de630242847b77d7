//! IKEv2 protocol elements used by Child SA exchanges (RFC 7296)
//!
//! - `constants`: exchange, payload and notify type codes
//! - `proposal`: ESP proposals, transforms and negotiation
//! - `payload`: typed payloads exchanged with the parent IKE session

pub mod constants;
pub mod payload;
pub mod proposal;

pub use constants::{ExchangeSubtype, ExchangeType, NotifyType, PayloadType};
pub use payload::{
    ConfigAttribute, ConfigPayload, DeletePayload, IkePayload, KePayload, NoncePayload,
    NotifyPayload, PayloadListExt, SaPayload, TrafficSelector, TrafficSelectorsPayload,
};
pub use proposal::{select_proposal, Proposal, ProtocolId, Transform, TransformType};
