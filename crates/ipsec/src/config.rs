//! Child session configuration
//!
//! Provides the immutable session parameters handed to a child session at
//! creation time, plus the timing knobs of the controller.

use crate::ikev2::payload::{ConfigAttribute, TrafficSelector};
use crate::ikev2::proposal::{
    EncrTransformId, EsnTransformId, IntegTransformId, Proposal, ProtocolId, Transform,
    TransformType,
};
use crate::{Error, Result};
use std::time::Duration;

/// Default delay before retrying a request refused with TEMPORARY_FAILURE (15 seconds)
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// Default wait for the peer's Delete after a remote rekey (180 seconds)
pub const DEFAULT_REKEY_DELETE_TIMEOUT: Duration = Duration::from_secs(180);

/// SA Lifetime limits
///
/// Defines when an SA should be rekeyed (soft limit) and when it must
/// be deleted (hard limit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaLifetime {
    /// Soft time limit - initiate rekey when reached
    pub soft_time: Duration,

    /// Hard time limit - delete SA when reached
    pub hard_time: Duration,
}

impl Default for SaLifetime {
    /// Create default lifetime (2 hours hard, 1 hour 50 minutes soft)
    fn default() -> Self {
        SaLifetime {
            soft_time: Duration::from_secs(110 * 60),
            hard_time: Duration::from_secs(120 * 60),
        }
    }
}

impl SaLifetime {
    /// Create custom lifetime with time limits
    pub fn new(soft_time: Duration, hard_time: Duration) -> Result<Self> {
        if soft_time >= hard_time {
            return Err(Error::InvalidParameter(
                "Soft lifetime must be less than hard lifetime".into(),
            ));
        }

        Ok(SaLifetime {
            soft_time,
            hard_time,
        })
    }

    /// Check if soft lifetime has been exceeded
    pub fn is_soft_expired(&self, age: Duration) -> bool {
        age >= self.soft_time
    }

    /// Check if hard lifetime has been exceeded
    pub fn is_hard_expired(&self, age: Duration) -> bool {
        age >= self.hard_time
    }
}

/// Controller timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildTimingConfig {
    /// Delay handed to `schedule_retry` and used to reschedule a refused rekey
    pub retry_interval: Duration,

    /// How long `RekeyRemoteDelete` waits before promoting the new SA itself
    pub rekey_delete_timeout: Duration,
}

impl Default for ChildTimingConfig {
    fn default() -> Self {
        ChildTimingConfig {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            rekey_delete_timeout: DEFAULT_REKEY_DELETE_TIMEOUT,
        }
    }
}

/// Immutable Child SA session parameters
#[derive(Clone, Debug)]
pub struct ChildSessionParams {
    /// Acceptable ESP proposals, in preference order
    pub sa_proposals: Vec<Proposal>,

    /// Selectors for traffic arriving from the peer (sent as TSi)
    pub inbound_traffic_selectors: Vec<TrafficSelector>,

    /// Selectors for traffic sent to the peer (sent as TSr)
    pub outbound_traffic_selectors: Vec<TrafficSelector>,

    /// Configuration attributes requested on the first create
    pub config_requests: Vec<ConfigAttribute>,

    /// Transport mode instead of tunnel mode
    pub is_transport: bool,

    /// SA lifetime
    pub lifetime: SaLifetime,
}

impl ChildSessionParams {
    /// Create builder for session parameters
    pub fn builder() -> ChildSessionParamsBuilder {
        ChildSessionParamsBuilder::new()
    }

    /// Whether the create request should carry a Configuration payload
    pub fn has_config_requests(&self) -> bool {
        !self.is_transport && !self.config_requests.is_empty()
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if self.sa_proposals.is_empty() {
            return Err(Error::InvalidParameter(
                "At least one ESP proposal required".into(),
            ));
        }
        for proposal in &self.sa_proposals {
            if proposal.protocol_id != ProtocolId::Esp {
                return Err(Error::InvalidParameter(format!(
                    "proposal {} is not an ESP proposal",
                    proposal.proposal_num
                )));
            }
            if proposal.get_transform(TransformType::Encr).is_none() {
                return Err(Error::InvalidParameter(format!(
                    "proposal {} has no encryption transform",
                    proposal.proposal_num
                )));
            }
            if !proposal.is_aead() && !proposal.has_integrity() {
                return Err(Error::InvalidParameter(format!(
                    "proposal {} needs an integrity transform",
                    proposal.proposal_num
                )));
            }
        }
        if self.inbound_traffic_selectors.is_empty() || self.outbound_traffic_selectors.is_empty()
        {
            return Err(Error::InvalidParameter(
                "Traffic selectors cannot be empty".into(),
            ));
        }
        if self.is_transport && !self.config_requests.is_empty() {
            return Err(Error::InvalidParameter(
                "Configuration requests need tunnel mode".into(),
            ));
        }
        if self.lifetime.soft_time >= self.lifetime.hard_time {
            return Err(Error::InvalidParameter(
                "Soft lifetime must be less than hard lifetime".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for ChildSessionParams
#[derive(Default)]
pub struct ChildSessionParamsBuilder {
    sa_proposals: Vec<Proposal>,
    inbound_traffic_selectors: Vec<TrafficSelector>,
    outbound_traffic_selectors: Vec<TrafficSelector>,
    config_requests: Vec<ConfigAttribute>,
    is_transport: bool,
    lifetime: Option<SaLifetime>,
}

impl ChildSessionParamsBuilder {
    /// Create new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an ESP proposal
    pub fn with_proposal(mut self, proposal: Proposal) -> Self {
        self.sa_proposals.push(proposal);
        self
    }

    /// Add an inbound traffic selector
    pub fn with_inbound_selector(mut self, ts: TrafficSelector) -> Self {
        self.inbound_traffic_selectors.push(ts);
        self
    }

    /// Add an outbound traffic selector
    pub fn with_outbound_selector(mut self, ts: TrafficSelector) -> Self {
        self.outbound_traffic_selectors.push(ts);
        self
    }

    /// Add a configuration request attribute
    pub fn with_config_request(mut self, attr: ConfigAttribute) -> Self {
        self.config_requests.push(attr);
        self
    }

    /// Use transport mode
    pub fn with_transport_mode(mut self, is_transport: bool) -> Self {
        self.is_transport = is_transport;
        self
    }

    /// Set SA lifetime
    pub fn with_lifetime(mut self, lifetime: SaLifetime) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Build ChildSessionParams with validation
    ///
    /// Without explicit proposals a single AES-GCM-128 proposal is used, and
    /// without selectors any IPv4 traffic is covered.
    pub fn build(self) -> Result<ChildSessionParams> {
        let sa_proposals = if self.sa_proposals.is_empty() {
            vec![Proposal::new(1, ProtocolId::Esp)
                .add_transform(Transform::encr(EncrTransformId::AesGcm16, Some(128)))
                .add_transform(Transform::integ(IntegTransformId::None))
                .add_transform(Transform::esn(EsnTransformId::NoEsn))]
        } else {
            self.sa_proposals
        };
        let or_any = |ts: Vec<TrafficSelector>| {
            if ts.is_empty() {
                vec![TrafficSelector::ipv4_any()]
            } else {
                ts
            }
        };

        let params = ChildSessionParams {
            sa_proposals,
            inbound_traffic_selectors: or_any(self.inbound_traffic_selectors),
            outbound_traffic_selectors: or_any(self.outbound_traffic_selectors),
            config_requests: self.config_requests,
            is_transport: self.is_transport,
            lifetime: self.lifetime.unwrap_or_default(),
        };

        params.validate()?;
        Ok(params)
    }
}
