//! Child session states and the events that drive them
//!
//! # State Transitions
//!
//! ```text
//! INITIAL
//!   ↓ (create request sent)          ↘ (first child from IKE_AUTH)
//! CREATE_LOCAL_CREATE                  ↓
//!   ↓ (create response)                ↓
//! IDLE  ←─────────────────────────────┘
//!   ├─ rekey command ──→ REKEY_LOCAL_CREATE ──→ REKEY_LOCAL_DELETE ──→ IDLE
//!   ├─ migration ──────→ MOBIKE_REKEY_LOCAL_CREATE ──→ REKEY_LOCAL_DELETE
//!   ├─ rekey request ──→ REKEY_REMOTE_DELETE ──→ IDLE (delete or timeout)
//!   ├─ delete command ─→ DELETE_LOCAL_DELETE ──→ CLOSED
//!   └─ delete request ─→ CLOSED
//!
//! REKEY_*_DELETE + request for the new SA ─→ IDLE_WITH_DEFERRED_REQUEST ─→ (replay)
//! ```

use super::record::EncapSocket;
use crate::crypto::prf::PrfAlgorithm;
use crate::ikev2::constants::{ExchangeSubtype, ExchangeType};
use crate::ikev2::payload::IkePayload;
use std::fmt;
use std::net::IpAddr;
use zeroize::Zeroizing;

/// Child session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildState {
    /// No Child SA, nothing sent
    Initial,

    /// Create request sent, waiting for response
    CreateLocalCreate,

    /// Child SA established, no procedure running
    Idle,

    /// A deferred inbound request is about to be replayed
    IdleWithDeferredRequest,

    /// Rekey request sent, waiting for response
    RekeyLocalCreate,

    /// Rekey onto new addresses sent, waiting for response
    MobikeRekeyLocalCreate,

    /// New SA installed, Delete for the old SA sent
    RekeyLocalDelete,

    /// Peer's rekey accepted, waiting for its Delete of the old SA
    RekeyRemoteDelete,

    /// Delete request sent, waiting for response
    DeleteLocalDelete,

    /// Terminal state
    Closed,
}

impl ChildState {
    /// State name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ChildState::Initial => "Initial",
            ChildState::CreateLocalCreate => "CreateLocalCreate",
            ChildState::Idle => "Idle",
            ChildState::IdleWithDeferredRequest => "IdleWithDeferredRequest",
            ChildState::RekeyLocalCreate => "RekeyLocalCreate",
            ChildState::MobikeRekeyLocalCreate => "MobikeRekeyLocalCreate",
            ChildState::RekeyLocalDelete => "RekeyLocalDelete",
            ChildState::RekeyRemoteDelete => "RekeyRemoteDelete",
            ChildState::DeleteLocalDelete => "DeleteLocalDelete",
            ChildState::Closed => "Closed",
        }
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChildState::Closed)
    }

    /// Check if a local or remote procedure is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ChildState::CreateLocalCreate
                | ChildState::RekeyLocalCreate
                | ChildState::MobikeRekeyLocalCreate
                | ChildState::RekeyLocalDelete
                | ChildState::RekeyRemoteDelete
                | ChildState::DeleteLocalDelete
        )
    }
}

impl fmt::Display for ChildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the parent IKE SA lends to its children
#[derive(Clone)]
pub struct IkeSaContext {
    /// Our outer address
    pub local_address: IpAddr,

    /// Peer's outer address
    pub remote_address: IpAddr,

    /// UDP encapsulation socket
    pub encap_socket: Option<EncapSocket>,

    /// PRF negotiated for the IKE SA
    pub prf: PrfAlgorithm,

    /// D-H group negotiated for the IKE SA
    pub ike_dh_group: u16,

    /// SK_d of the IKE SA
    pub sk_d: Zeroizing<Vec<u8>>,
}

impl IkeSaContext {
    /// Create a context
    pub fn new(
        local_address: IpAddr,
        remote_address: IpAddr,
        encap_socket: Option<EncapSocket>,
        prf: PrfAlgorithm,
        ike_dh_group: u16,
        sk_d: Vec<u8>,
    ) -> Self {
        IkeSaContext {
            local_address,
            remote_address,
            encap_socket,
            prf,
            ike_dh_group,
            sk_d: Zeroizing::new(sk_d),
        }
    }
}

impl fmt::Debug for IkeSaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IkeSaContext")
            .field("local_address", &self.local_address)
            .field("remote_address", &self.remote_address)
            .field("encap_socket", &self.encap_socket)
            .field("prf", &self.prf)
            .field("ike_dh_group", &self.ike_dh_group)
            .finish_non_exhaustive()
    }
}

/// Commands issued by the local side
#[derive(Debug, Clone)]
pub enum LocalCommand {
    /// Create a Child SA with CREATE_CHILD_SA
    Create(IkeSaContext),

    /// Adopt the Child SA negotiated inside IKE_AUTH
    FirstChild {
        /// IKE SA context
        ctx: IkeSaContext,
        /// Child payloads of the IKE_AUTH request
        request: Vec<IkePayload>,
        /// Child payloads of the IKE_AUTH response
        response: Vec<IkePayload>,
    },

    /// Rekey the current Child SA
    Rekey,

    /// Delete the Child SA
    Delete,

    /// Move to new addresses, in place when possible
    Migrate {
        /// New local address
        local: IpAddr,
        /// New remote address
        remote: IpAddr,
        /// New encapsulation socket
        encap: Option<EncapSocket>,
    },

    /// Move to new addresses with a rekey
    RekeyMigrate {
        /// New local address
        local: IpAddr,
        /// New remote address
        remote: IpAddr,
        /// New encapsulation socket
        encap: Option<EncapSocket>,
    },
}

impl LocalCommand {
    /// Command name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            LocalCommand::Create(_) => "create",
            LocalCommand::FirstChild { .. } => "first child",
            LocalCommand::Rekey => "rekey",
            LocalCommand::Delete => "delete",
            LocalCommand::Migrate { .. } => "migrate",
            LocalCommand::RekeyMigrate { .. } => "rekey migrate",
        }
    }
}

/// Delayed messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The peer did not delete the old SA after its rekey
    RekeyDeleteTimeout {
        /// Entry count of `RekeyRemoteDelete` when armed
        generation: u64,
    },

    /// Soft lifetime of a record reached
    SoftLifetime {
        /// Record the timer was armed for
        local_spi: u32,
        /// Scheduler generation when armed
        generation: u64,
    },

    /// Hard lifetime of a record reached
    HardLifetime {
        /// Record the timer was armed for
        local_spi: u32,
    },
}

/// Everything the controller queue carries
#[derive(Debug, Clone)]
pub enum Event {
    /// Local command
    Local(LocalCommand),

    /// Request from the peer, classified by the parent session
    InboundRequest {
        /// Child-level meaning
        subtype: ExchangeSubtype,
        /// Exchange that carried it
        exchange: ExchangeType,
        /// Child payloads
        payloads: Vec<IkePayload>,
    },

    /// Response to our last request
    InboundResponse {
        /// Exchange that carried it
        exchange: ExchangeType,
        /// Child payloads
        payloads: Vec<IkePayload>,
    },

    /// Delayed message
    Timer(TimerEvent),
}
