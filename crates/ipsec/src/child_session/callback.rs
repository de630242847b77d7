//! Ports between a child session and the rest of the system
//!
//! - [`SessionCallback`]: the parent IKE session, called synchronously from
//!   the controller task
//! - [`ChildSessionUserCallback`]: the API consumer, always reached through a
//!   [`TaskExecutor`]

use super::record::{Direction, IpsecTransform};
use crate::ikev2::constants::ExchangeType;
use crate::ikev2::payload::{ConfigPayload, IkePayload, LinkAddress, TrafficSelector};
use crate::Error;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Local procedure the parent session should run again later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalRequestKind {
    /// Create the Child SA
    CreateChild,
    /// Rekey the current Child SA
    RekeyChild,
    /// Delete the Child SA
    DeleteChild,
    /// Rekey onto a new address pair
    MobikeRekey,
}

/// Request handed to [`SessionCallback::schedule_retry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalRequest {
    /// Procedure to retry
    pub kind: LocalRequestKind,
}

impl LocalRequest {
    /// Wrap a request kind
    pub fn new(kind: LocalRequestKind) -> Self {
        LocalRequest { kind }
    }
}

/// Channel back to the parent IKE session
pub trait SessionCallback: Send + Sync {
    /// Send payloads in an exchange of the parent IKE SA
    fn send_outbound(&self, exchange: ExchangeType, is_response: bool, payloads: Vec<IkePayload>);

    /// Route requests naming `remote_spi` to this child session
    fn spi_created(&self, remote_spi: u32);

    /// Stop routing requests naming `remote_spi`
    fn spi_deleted(&self, remote_spi: u32);

    /// The local or remote procedure has completed
    fn procedure_finished(&self);

    /// The child session reached its terminal state
    fn session_closed(&self, user_callback: Arc<dyn ChildSessionUserCallback>);

    /// Run `request` again after `delay`
    fn schedule_retry(&self, request: LocalRequest, delay: Duration);

    /// Failure that invalidates the whole IKE SA
    fn fatal_ike_error(&self, error: Error);
}

/// Notifications delivered to the application
pub trait ChildSessionUserCallback: Send + Sync {
    /// The Child SA is up
    fn on_opened(&self, config: &ChildSessionConfiguration);

    /// The Child SA was closed normally
    fn on_closed(&self);

    /// The Child SA was closed because of `error`
    fn on_closed_with_exception(&self, error: Error);

    /// A kernel transform should be installed
    fn on_transform_created(&self, transform: &IpsecTransform, direction: Direction);

    /// A kernel transform should be removed
    fn on_transform_deleted(&self, transform: &IpsecTransform, direction: Direction);

    /// The Child SA moved to new outer addresses
    fn on_transforms_migrated(&self, inbound: &IpsecTransform, outbound: &IpsecTransform);
}

/// Runs user notifications off the controller task
pub trait TaskExecutor: Send + Sync {
    /// Run `task` at some later point, in submission order
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// Executor running each task immediately on the caller's thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task();
    }
}

/// Negotiated Child SA parameters reported on open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSessionConfiguration {
    /// Selectors for traffic arriving from the peer
    pub inbound_traffic_selectors: Vec<TrafficSelector>,

    /// Selectors for traffic sent to the peer
    pub outbound_traffic_selectors: Vec<TrafficSelector>,

    /// Internal addresses assigned by the peer
    pub internal_addresses: Vec<LinkAddress>,

    /// Subnets reachable through the tunnel
    pub internal_subnets: Vec<LinkAddress>,

    /// DNS servers
    pub dns_servers: Vec<IpAddr>,

    /// DHCP servers
    pub dhcp_servers: Vec<IpAddr>,
}

impl ChildSessionConfiguration {
    /// Combine negotiated selectors with an optional Configuration reply
    pub fn new(
        inbound_traffic_selectors: Vec<TrafficSelector>,
        outbound_traffic_selectors: Vec<TrafficSelector>,
        config_reply: Option<&ConfigPayload>,
    ) -> Self {
        let (internal_addresses, internal_subnets, dns_servers, dhcp_servers) = match config_reply
        {
            Some(cp) => (
                cp.internal_addresses(),
                cp.internal_subnets(),
                cp.dns_servers(),
                cp.dhcp_servers(),
            ),
            None => (Vec::new(), Vec::new(), Vec::new(), Vec::new()),
        };

        ChildSessionConfiguration {
            inbound_traffic_selectors,
            outbound_traffic_selectors,
            internal_addresses,
            internal_subnets,
            dns_servers,
            dhcp_servers,
        }
    }
}
