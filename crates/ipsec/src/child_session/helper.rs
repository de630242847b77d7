//! CREATE_CHILD_SA and INFORMATIONAL payload building and validation
//!
//! # CREATE_CHILD_SA Exchange
//!
//! ```text
//! Initiator                         Responder
//! -----------                       -----------
//! SA, Ni, [KEi], TSi, TSr,
//!   [CP(CFG_REQUEST)], [N(REKEY_SA)]  -->
//!                     <--  SA, Nr, [KEr], TSi, TSr,
//!                              [CP(CFG_REPLY)], [N(REKEY_SA)]
//! ```
//!
//! Everything here is stateless: the controller hands in the payloads it
//! sent and received and acts on the outcome.

use crate::config::ChildSessionParams;
use crate::ikev2::constants::NotifyType;
use crate::ikev2::payload::{
    ConfigPayload, ConfigType, DeletePayload, IkePayload, KePayload, NoncePayload, NotifyPayload,
    PayloadListExt, SaPayload, TrafficSelector, TrafficSelectorsPayload,
};
use crate::ikev2::proposal::{select_proposal, Proposal};
use crate::{Error, Result};

/// Outcome of a negotiation the peer responded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedChild {
    /// Proposal the responder chose
    pub proposal: Proposal,

    /// Responder's inbound SPI (our outbound)
    pub remote_spi: u32,

    /// Selectors for traffic arriving from the peer (response TSi)
    pub local_ts: Vec<TrafficSelector>,

    /// Selectors for traffic sent to the peer (response TSr)
    pub remote_ts: Vec<TrafficSelector>,

    /// Configuration reply, if the peer sent one
    pub config_reply: Option<ConfigPayload>,
}

/// Result of validating a create or rekey response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateChildResult {
    /// Response is acceptable
    Negotiated(NegotiatedChild),

    /// Peer refused with an error notify
    ErrorNotify(Error),

    /// Response is malformed
    InvalidResponse {
        /// Validation failure
        error: Error,
        /// Remote SPI if the SA payload could be read
        remote_spi: Option<u32>,
    },
}

/// Builds and validates Child SA payload sets
pub struct CreateChildHelper;

impl CreateChildHelper {
    /// D-H group a create request has to carry KE for
    pub fn create_request_dh_group(params: &ChildSessionParams) -> Option<u16> {
        params.sa_proposals.first().and_then(Proposal::dh_group)
    }

    /// Build CREATE_CHILD_SA request payloads for a new Child SA
    ///
    /// Every configured proposal is offered with `local_spi`. A configuration
    /// request is added in tunnel mode when attributes are configured.
    pub fn create_request_payloads(
        local_spi: u32,
        params: &ChildSessionParams,
        ke: Option<KePayload>,
    ) -> Vec<IkePayload> {
        let proposals = params
            .sa_proposals
            .iter()
            .enumerate()
            .map(|(i, p)| {
                // proposal numbers start at 1
                p.clone()
                    .with_proposal_num((i + 1) as u8)
                    .with_spi(local_spi)
            })
            .collect();

        let mut payloads = vec![
            IkePayload::SA(SaPayload::request(proposals)),
            IkePayload::Nonce(NoncePayload::generate()),
        ];
        if let Some(ke) = ke {
            payloads.push(IkePayload::KE(ke));
        }
        payloads.push(IkePayload::TSi(TrafficSelectorsPayload::initiator(
            params.inbound_traffic_selectors.clone(),
        )));
        payloads.push(IkePayload::TSr(TrafficSelectorsPayload::responder(
            params.outbound_traffic_selectors.clone(),
        )));
        if params.has_config_requests() {
            payloads.push(IkePayload::CP(ConfigPayload::request(
                params.config_requests.clone(),
            )));
        }
        if params.is_transport {
            payloads.push(IkePayload::N(NotifyPayload::status(
                NotifyType::UseTransportMode,
            )));
        }
        payloads
    }

    /// Build CREATE_CHILD_SA request payloads rekeying `current_local_spi`
    pub fn rekey_request_payloads(
        proposal: &Proposal,
        new_local_spi: u32,
        current_local_spi: u32,
        local_ts: &[TrafficSelector],
        remote_ts: &[TrafficSelector],
        is_transport: bool,
        ke: Option<KePayload>,
    ) -> Vec<IkePayload> {
        let offer = proposal.clone().with_proposal_num(1).with_spi(new_local_spi);

        let mut payloads = vec![
            IkePayload::SA(SaPayload::request(vec![offer])),
            IkePayload::Nonce(NoncePayload::generate()),
        ];
        if let Some(ke) = ke {
            payloads.push(IkePayload::KE(ke));
        }
        payloads.push(IkePayload::TSi(TrafficSelectorsPayload::initiator(
            local_ts.to_vec(),
        )));
        payloads.push(IkePayload::TSr(TrafficSelectorsPayload::responder(
            remote_ts.to_vec(),
        )));
        payloads.push(IkePayload::N(NotifyPayload::rekey_sa(current_local_spi)));
        if is_transport {
            payloads.push(IkePayload::N(NotifyPayload::status(
                NotifyType::UseTransportMode,
            )));
        }
        payloads
    }

    /// Build the response accepting a peer's rekey request
    ///
    /// The request's selectors are echoed back unchanged.
    pub fn rekey_response_payloads(
        chosen: &Proposal,
        new_local_spi: u32,
        ts_i: &TrafficSelectorsPayload,
        ts_r: &TrafficSelectorsPayload,
        current_local_spi: u32,
        is_transport: bool,
        ke: Option<KePayload>,
    ) -> Vec<IkePayload> {
        let mut payloads = vec![
            IkePayload::SA(SaPayload::response(chosen.clone().with_spi(new_local_spi))),
            IkePayload::Nonce(NoncePayload::generate()),
        ];
        if let Some(ke) = ke {
            payloads.push(IkePayload::KE(ke));
        }
        payloads.push(IkePayload::TSi(ts_i.clone()));
        payloads.push(IkePayload::TSr(ts_r.clone()));
        payloads.push(IkePayload::N(NotifyPayload::rekey_sa(current_local_spi)));
        if is_transport {
            payloads.push(IkePayload::N(NotifyPayload::status(
                NotifyType::UseTransportMode,
            )));
        }
        payloads
    }

    /// Build a Delete payload set for our inbound SPI
    pub fn delete_payloads(local_spi: u32) -> Vec<IkePayload> {
        vec![IkePayload::D(DeletePayload::esp(vec![local_spi]))]
    }

    /// Build an error notify payload set reporting `error`
    pub fn error_notify_payloads(error: &Error) -> Vec<IkePayload> {
        vec![IkePayload::N(error.to_notify())]
    }

    /// Check KE payloads against the negotiated proposal
    ///
    /// With a negotiated D-H group exactly one KE of that group is needed.
    /// Without one, a KE is only tolerated in requests.
    ///
    /// # Errors
    ///
    /// - `InvalidSyntax` for a response that breaks either rule
    /// - `InvalidKe` for a request whose KE is missing or uses another group
    pub fn validate_ke_payloads(
        payloads: &[IkePayload],
        is_response: bool,
        negotiated: &Proposal,
    ) -> Result<()> {
        let kes = payloads.ke_payloads();

        match negotiated.dh_group() {
            Some(group) => {
                let matches = kes.len() == 1 && kes[0].dh_group == group;
                if matches {
                    Ok(())
                } else if is_response {
                    Err(Error::InvalidSyntax(format!(
                        "response needs one KE of D-H group {}",
                        group
                    )))
                } else {
                    Err(Error::InvalidKe {
                        expected_group: group,
                    })
                }
            }
            None if is_response && !kes.is_empty() => Err(Error::InvalidSyntax(
                "unexpected KE in response".into(),
            )),
            None => Ok(()),
        }
    }

    /// Validate a CREATE_CHILD_SA (or IKE_AUTH) response against our request
    pub fn validate_response(
        request: &[IkePayload],
        response: &[IkePayload],
        is_transport: bool,
    ) -> CreateChildResult {
        if let Some(err) = response.error_notify().and_then(Error::from_notify) {
            return CreateChildResult::ErrorNotify(err);
        }

        let invalid = |error: Error, remote_spi: Option<u32>| CreateChildResult::InvalidResponse {
            error,
            remote_spi,
        };

        let chosen = match response.sa().map(SaPayload::chosen_proposal) {
            Some(Ok(p)) => p,
            Some(Err(e)) => return invalid(e, None),
            None => return invalid(Error::InvalidSyntax("missing SA payload".into()), None),
        };
        let Some(remote_spi) = chosen.spi else {
            return invalid(Error::InvalidSyntax("chosen proposal has no SPI".into()), None);
        };
        let remote_spi = Some(remote_spi);

        let (Some(_), Some(ts_i), Some(ts_r)) = (
            response.nonce(),
            response.ts_initiator(),
            response.ts_responder(),
        ) else {
            return invalid(
                Error::InvalidSyntax("missing Nonce or TS payload".into()),
                remote_spi,
            );
        };

        let offered = request.sa().map(SaPayload::proposals).unwrap_or_default();
        if !offered.iter().any(|o| chosen.is_negotiated_from(o)) {
            return invalid(
                Error::InvalidSyntax("chosen proposal was not offered".into()),
                remote_spi,
            );
        }

        if let Err(e) = Self::validate_ke_payloads(response, true, chosen) {
            return invalid(e, remote_spi);
        }

        let ts_within_request = match (request.ts_initiator(), request.ts_responder()) {
            (Some(req_i), Some(req_r)) => {
                ts_i.is_subset_of(&req_i.selectors) && ts_r.is_subset_of(&req_r.selectors)
            }
            _ => false,
        };
        if !ts_within_request {
            return invalid(
                Error::InvalidSyntax("response selectors exceed the request".into()),
                remote_spi,
            );
        }

        if is_transport && response.status_notify(NotifyType::UseTransportMode).is_none() {
            return invalid(
                Error::InvalidSyntax("peer did not accept transport mode".into()),
                remote_spi,
            );
        }

        let config_reply = response
            .config()
            .filter(|cp| cp.config_type == ConfigType::Reply)
            .cloned();

        CreateChildResult::Negotiated(NegotiatedChild {
            proposal: chosen.clone(),
            remote_spi: chosen.spi.unwrap_or_default(),
            local_ts: ts_i.selectors.clone(),
            remote_ts: ts_r.selectors.clone(),
            config_reply,
        })
    }

    /// Negotiate a peer's rekey request
    ///
    /// `ike_dh_group` is accepted in addition to the configured groups.
    /// `local_ts` and `remote_ts` bound the selectors the peer may ask for.
    ///
    /// # Errors
    ///
    /// - `InvalidSyntax` for missing payloads, or a D-H offer without KE
    /// - `NoProposalChosen` when no configured proposal matches
    /// - `InvalidKe` when the KE does not use the chosen group
    /// - `TsUnacceptable` when selectors widen the current ones
    pub fn negotiate_rekey_request(
        request: &[IkePayload],
        configured: &[Proposal],
        ike_dh_group: u16,
        local_ts: &[TrafficSelector],
        remote_ts: &[TrafficSelector],
    ) -> Result<Proposal> {
        let sa = request
            .sa()
            .ok_or_else(|| Error::InvalidSyntax("missing SA payload".into()))?;
        let (Some(_), Some(ts_i), Some(ts_r)) = (
            request.nonce(),
            request.ts_initiator(),
            request.ts_responder(),
        ) else {
            return Err(Error::InvalidSyntax(
                "missing Nonce or TS payload".into(),
            ));
        };

        let offers_dh = sa.proposals().iter().any(|p| p.dh_group().is_some());
        if offers_dh && request.ke().is_none() {
            return Err(Error::InvalidSyntax(
                "D-H group offered without KE".into(),
            ));
        }

        let chosen = select_proposal(sa.proposals(), configured, Some(ike_dh_group))?;
        if chosen.spi.is_none() {
            return Err(Error::InvalidSyntax("offered proposal has no SPI".into()));
        }
        Self::validate_ke_payloads(request, false, &chosen)?;

        // The peer's TSi is its side of the tunnel, our outbound side
        if !ts_i.is_subset_of(remote_ts) || !ts_r.is_subset_of(local_ts) {
            return Err(Error::TsUnacceptable);
        }

        Ok(chosen)
    }
}
