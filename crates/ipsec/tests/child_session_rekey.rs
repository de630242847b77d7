//! Local and remote Child SA rekeys, collisions and lifetime timers

mod common;

use common::*;
use fynx_ipsec::child_session::{ChildState, CreateChildHelper, Direction, LocalRequestKind};
use fynx_ipsec::config::{
    ChildSessionParams, SaLifetime, DEFAULT_REKEY_DELETE_TIMEOUT, DEFAULT_RETRY_INTERVAL,
};
use fynx_ipsec::ikev2::constants::{ExchangeSubtype, ExchangeType, NotifyType};
use fynx_ipsec::ikev2::payload::{
    IkePayload, KePayload, PayloadListExt, TrafficSelector,
};
use fynx_ipsec::ikev2::proposal::{EncrTransformId, Proposal, ProtocolId, Transform};
use fynx_ipsec::Error;
use std::time::Duration;

fn any() -> Vec<TrafficSelector> {
    vec![TrafficSelector::ipv4_any()]
}

/// Peer's request rekeying our current SA with its new inbound SPI
fn remote_rekey_request(proposal: &Proposal, new_remote_spi: u32, rekeyed: u32) -> Vec<IkePayload> {
    let ke = proposal
        .dh_group()
        .map(|group| KePayload::new(group, vec![0xa5; 256]));
    CreateChildHelper::rekey_request_payloads(
        proposal,
        new_remote_spi,
        rekeyed,
        &any(),
        &any(),
        false,
        ke,
    )
}

fn start_local_rekey(harness: &mut Harness) -> Vec<IkePayload> {
    harness.child.rekey_child_session();
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::RekeyLocalCreate);
    sent_request(&calls).to_vec()
}

fn response_to(request: &[IkePayload], remote_spi: u32) -> Vec<IkePayload> {
    let proposal = request.sa().unwrap().proposals()[0].clone();
    create_response(&proposal, remote_spi)
}

fn error_response(error: Error) -> Vec<IkePayload> {
    CreateChildHelper::error_notify_payloads(&error)
}

fn error_notify_type(payloads: &[IkePayload]) -> NotifyType {
    payloads.error_notify().unwrap().notify_type
}

#[test]
fn test_local_rekey() {
    let mut harness = Harness::open(params(), &[LOCAL_INIT_NEW_LOCAL_SPI]);

    let request = start_local_rekey(&mut harness);
    let proposals = request.sa().unwrap().proposals();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].proposal_num, 1);
    assert_eq!(proposals[0].spi, Some(LOCAL_INIT_NEW_LOCAL_SPI));
    let rekey = request.status_notify(NotifyType::RekeySa).unwrap();
    assert_eq!(rekey.protocol_id, Some(ProtocolId::Esp));
    assert_eq!(rekey.spi, Some(CURRENT_LOCAL_SPI));
    assert!(request.config().is_none());

    harness.child.receive_response(
        ExchangeType::CreateChildSa,
        response_to(&request, LOCAL_INIT_NEW_REMOTE_SPI),
    );
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::RekeyLocalDelete);
    assert_eq!(calls[0], Call::SpiCreated(LOCAL_INIT_NEW_REMOTE_SPI));
    let delete = sent_request(&calls);
    assert_eq!(delete.deletes()[0].spis, vec![CURRENT_LOCAL_SPI]);
    // the procedure is still running
    assert_eq!(count(&calls, &Call::ProcedureFinished), 0);
    assert_eq!(
        harness.run_tasks(),
        vec![
            Call::Created(LOCAL_INIT_NEW_LOCAL_SPI, Direction::Inbound),
            Call::Created(LOCAL_INIT_NEW_REMOTE_SPI, Direction::Outbound),
        ]
    );

    harness.child.receive_response(
        ExchangeType::Informational,
        CreateChildHelper::delete_payloads(CURRENT_REMOTE_SPI),
    );
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::Idle);
    assert_eq!(
        calls,
        vec![Call::SpiDeleted(CURRENT_REMOTE_SPI), Call::ProcedureFinished]
    );
    assert_eq!(
        harness.run_tasks(),
        vec![
            Call::Deleted(CURRENT_LOCAL_SPI, Direction::Inbound),
            Call::Deleted(CURRENT_REMOTE_SPI, Direction::Outbound),
        ]
    );
    assert_eq!(
        harness.child.current_spis(),
        Some((LOCAL_INIT_NEW_LOCAL_SPI, LOCAL_INIT_NEW_REMOTE_SPI))
    );
    assert_eq!(harness.spis.released(), vec![CURRENT_LOCAL_SPI]);
}

#[test]
fn test_local_rekey_temporary_failure_retries() {
    let mut harness = Harness::open(params(), &[LOCAL_INIT_NEW_LOCAL_SPI]);
    start_local_rekey(&mut harness);

    harness
        .child
        .receive_response(ExchangeType::CreateChildSa, error_response(Error::TemporaryFailure));
    let calls = harness.dispatch();

    assert_eq!(harness.state(), ChildState::Idle);
    assert_eq!(
        calls,
        vec![
            Call::Retry(LocalRequestKind::RekeyChild, DEFAULT_RETRY_INTERVAL),
            Call::ProcedureFinished,
        ]
    );
    assert_eq!(harness.spis.released(), vec![LOCAL_INIT_NEW_LOCAL_SPI]);
    assert_eq!(
        harness.child.current_spis(),
        Some((CURRENT_LOCAL_SPI, CURRENT_REMOTE_SPI))
    );
}

#[test]
fn test_local_rekey_refused_keeps_current_sa() {
    let mut harness = Harness::open(params(), &[LOCAL_INIT_NEW_LOCAL_SPI, 0x3000]);
    start_local_rekey(&mut harness);

    harness
        .child
        .receive_response(ExchangeType::CreateChildSa, error_response(Error::NoProposalChosen));
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::Idle);
    assert_eq!(calls, vec![Call::ProcedureFinished]);
    assert_eq!(harness.executor.pending(), 0);

    // the rekey is tried again after the retry interval
    harness.clock.advance(DEFAULT_RETRY_INTERVAL);
    harness.dispatch();
    assert_eq!(harness.state(), ChildState::RekeyLocalCreate);
}

#[test]
fn test_local_rekey_internal_address_failure_reschedules() {
    let mut harness = Harness::open(params(), &[LOCAL_INIT_NEW_LOCAL_SPI, 0x3000]);
    start_local_rekey(&mut harness);

    harness.child.receive_response(
        ExchangeType::CreateChildSa,
        error_response(Error::InternalAddressFailure),
    );
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::Idle);
    assert_eq!(calls, vec![Call::ProcedureFinished]);
    assert!(!calls.iter().any(|c| matches!(c, Call::Retry(..))));
    assert!(harness.spis.released().contains(&LOCAL_INIT_NEW_LOCAL_SPI));

    // the child's own rekey timer fires, no parent retry is needed
    harness.clock.advance(DEFAULT_RETRY_INTERVAL);
    harness.dispatch();
    assert_eq!(harness.state(), ChildState::RekeyLocalCreate);
}

#[test]
fn test_local_rekey_invalid_response_closes_session() {
    let mut harness = Harness::open(params(), &[LOCAL_INIT_NEW_LOCAL_SPI]);
    let request = start_local_rekey(&mut harness);

    let response: Vec<IkePayload> = response_to(&request, LOCAL_INIT_NEW_REMOTE_SPI)
        .into_iter()
        .filter(|p| !matches!(p, IkePayload::Nonce(_)))
        .collect();
    harness
        .child
        .receive_response(ExchangeType::CreateChildSa, response);
    let calls = harness.dispatch();

    assert_eq!(harness.state(), ChildState::Closed);
    assert_eq!(
        calls,
        vec![
            Call::SpiCreated(LOCAL_INIT_NEW_REMOTE_SPI),
            Call::SpiDeleted(LOCAL_INIT_NEW_REMOTE_SPI),
            Call::SpiDeleted(CURRENT_REMOTE_SPI),
            Call::ProcedureFinished,
            Call::SessionClosed,
        ]
    );
    // one task for the current record, one for the close
    assert_eq!(harness.executor.pending(), 2);
    let notices = harness.run_tasks();
    assert_eq!(notices[0], Call::Deleted(CURRENT_LOCAL_SPI, Direction::Inbound));
    assert_eq!(notices[1], Call::Deleted(CURRENT_REMOTE_SPI, Direction::Outbound));
    assert!(matches!(notices[2], Call::ClosedWithException(Error::InvalidSyntax(_))));
}

#[test]
fn test_local_rekey_spi_exhaustion_reschedules() {
    let mut harness = Harness::open(params(), &[]);
    harness.child.rekey_child_session();
    let calls = harness.dispatch();

    assert_eq!(harness.state(), ChildState::Idle);
    assert_eq!(calls, vec![Call::ProcedureFinished]);

    harness.spis.push(LOCAL_INIT_NEW_LOCAL_SPI);
    harness.clock.advance(DEFAULT_RETRY_INTERVAL);
    harness.dispatch();
    assert_eq!(harness.state(), ChildState::RekeyLocalCreate);
}

#[test]
fn test_remote_rekey() {
    let mut harness = Harness::open(params(), &[REMOTE_INIT_NEW_LOCAL_SPI]);
    let request = remote_rekey_request(&esp_proposal(), REMOTE_INIT_NEW_REMOTE_SPI, CURRENT_REMOTE_SPI);

    harness
        .child
        .receive_request(ExchangeSubtype::RekeyChild, ExchangeType::CreateChildSa, request.clone());
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::RekeyRemoteDelete);
    assert_eq!(calls[0], Call::SpiCreated(REMOTE_INIT_NEW_REMOTE_SPI));

    let response = sent_response(&calls);
    let chosen = response.sa().unwrap().chosen_proposal().unwrap();
    assert_eq!(chosen.spi, Some(REMOTE_INIT_NEW_LOCAL_SPI));
    assert!(response.ke().is_none());
    assert_eq!(count(&calls, &Call::ProcedureFinished), 0);

    // only the inbound half is installed until the old SA is gone
    assert_eq!(
        harness.run_tasks(),
        vec![Call::Created(REMOTE_INIT_NEW_LOCAL_SPI, Direction::Inbound)]
    );
    let built = harness.factory.calls().pop().unwrap();
    assert!(!built.config.local_init);
    assert_eq!(built.remote_payloads, request);

    harness.child.receive_request(
        ExchangeSubtype::DeleteChild,
        ExchangeType::Informational,
        CreateChildHelper::delete_payloads(CURRENT_REMOTE_SPI),
    );
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::Idle);
    assert_eq!(sent_response(&calls).deletes()[0].spis, vec![CURRENT_LOCAL_SPI]);
    assert_eq!(
        without_sends(calls),
        vec![Call::SpiDeleted(CURRENT_REMOTE_SPI), Call::ProcedureFinished]
    );

    assert_eq!(harness.executor.pending(), 2);
    assert_eq!(
        harness.run_tasks(),
        vec![
            Call::Created(REMOTE_INIT_NEW_REMOTE_SPI, Direction::Outbound),
            Call::Deleted(CURRENT_LOCAL_SPI, Direction::Inbound),
            Call::Deleted(CURRENT_REMOTE_SPI, Direction::Outbound),
        ]
    );
    assert_eq!(
        harness.child.current_spis(),
        Some((REMOTE_INIT_NEW_LOCAL_SPI, REMOTE_INIT_NEW_REMOTE_SPI))
    );
}

#[test]
fn test_remote_rekey_delete_timeout() {
    let mut harness = Harness::open(params(), &[REMOTE_INIT_NEW_LOCAL_SPI]);
    harness.child.receive_request(
        ExchangeSubtype::RekeyChild,
        ExchangeType::CreateChildSa,
        remote_rekey_request(&esp_proposal(), REMOTE_INIT_NEW_REMOTE_SPI, CURRENT_REMOTE_SPI),
    );
    harness.dispatch();
    harness.run_tasks();

    harness
        .clock
        .advance(DEFAULT_REKEY_DELETE_TIMEOUT - Duration::from_secs(1));
    assert!(harness.dispatch().is_empty());
    assert_eq!(harness.state(), ChildState::RekeyRemoteDelete);

    harness.clock.advance(Duration::from_secs(1));
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::Idle);
    // nothing is sent: the peer owns the Delete of the old SA
    assert_eq!(
        calls,
        vec![Call::SpiDeleted(CURRENT_REMOTE_SPI), Call::ProcedureFinished]
    );
}

#[test]
fn test_remote_rekey_accepts_ike_dh_group() {
    let mut harness = Harness::open(params(), &[REMOTE_INIT_NEW_LOCAL_SPI]);
    harness.child.receive_request(
        ExchangeSubtype::RekeyChild,
        ExchangeType::CreateChildSa,
        remote_rekey_request(
            &esp_proposal_with_dh(IKE_DH_GROUP),
            REMOTE_INIT_NEW_REMOTE_SPI,
            CURRENT_REMOTE_SPI,
        ),
    );
    let calls = harness.dispatch();

    assert_eq!(harness.state(), ChildState::RekeyRemoteDelete);
    let response = sent_response(&calls);
    assert_eq!(response.ke().unwrap().dh_group, IKE_DH_GROUP);
    assert_eq!(
        harness.factory.calls().pop().unwrap().config.dh_group,
        Some(IKE_DH_GROUP)
    );
}

#[test]
fn test_remote_rekey_rejections() {
    let unknown = Proposal::new(1, ProtocolId::Esp)
        .add_transform(Transform::encr(EncrTransformId::AesGcm16, Some(256)));
    let ipv6 = vec![TrafficSelector::ipv6_any()];
    let wider = CreateChildHelper::rekey_request_payloads(
        &esp_proposal(),
        REMOTE_INIT_NEW_REMOTE_SPI,
        CURRENT_REMOTE_SPI,
        &ipv6,
        &ipv6,
        false,
        None,
    );
    let mut missing_ke = remote_rekey_request(
        &esp_proposal_with_dh(IKE_DH_GROUP),
        REMOTE_INIT_NEW_REMOTE_SPI,
        CURRENT_REMOTE_SPI,
    );
    missing_ke.retain(|p| !matches!(p, IkePayload::KE(_)));

    let cases = vec![
        (
            remote_rekey_request(&unknown, REMOTE_INIT_NEW_REMOTE_SPI, CURRENT_REMOTE_SPI),
            NotifyType::NoProposalChosen,
        ),
        (wider, NotifyType::TsUnacceptable),
        (missing_ke, NotifyType::InvalidSyntax),
    ];

    for (request, expected) in cases {
        let mut harness = Harness::open(params(), &[REMOTE_INIT_NEW_LOCAL_SPI]);
        harness
            .child
            .receive_request(ExchangeSubtype::RekeyChild, ExchangeType::CreateChildSa, request);
        let calls = harness.dispatch();

        assert_eq!(harness.state(), ChildState::Idle);
        assert_eq!(error_notify_type(sent_response(&calls)), expected);
        assert_eq!(without_sends(calls), vec![Call::ProcedureFinished]);
        assert_eq!(
            harness.child.current_spis(),
            Some((CURRENT_LOCAL_SPI, CURRENT_REMOTE_SPI))
        );
    }
}

#[test]
fn test_remote_rekey_with_wrong_ke_group() {
    let mut harness = Harness::open(params(), &[REMOTE_INIT_NEW_LOCAL_SPI]);
    let request = CreateChildHelper::rekey_request_payloads(
        &esp_proposal_with_dh(IKE_DH_GROUP),
        REMOTE_INIT_NEW_REMOTE_SPI,
        CURRENT_REMOTE_SPI,
        &any(),
        &any(),
        false,
        Some(KePayload::new(2, vec![0xa5; 128])),
    );
    harness
        .child
        .receive_request(ExchangeSubtype::RekeyChild, ExchangeType::CreateChildSa, request);
    let calls = harness.dispatch();

    assert_eq!(harness.state(), ChildState::Idle);
    let notify = sent_response(&calls).error_notify().unwrap().clone();
    assert_eq!(notify.notify_type, NotifyType::InvalidKePayload);
    assert_eq!(notify.data, IKE_DH_GROUP.to_be_bytes().to_vec());
    assert_eq!(without_sends(calls), vec![Call::ProcedureFinished]);
    assert_eq!(
        harness.child.current_spis(),
        Some((CURRENT_LOCAL_SPI, CURRENT_REMOTE_SPI))
    );
}

#[test]
fn test_remote_rekey_local_failure_refuses() {
    // no SPI left for the new inbound SA
    let mut harness = Harness::open(params(), &[]);
    harness.child.receive_request(
        ExchangeSubtype::RekeyChild,
        ExchangeType::CreateChildSa,
        remote_rekey_request(&esp_proposal(), REMOTE_INIT_NEW_REMOTE_SPI, CURRENT_REMOTE_SPI),
    );
    let calls = harness.dispatch();
    assert_eq!(
        error_notify_type(sent_response(&calls)),
        NotifyType::NoProposalChosen
    );
    assert_eq!(harness.state(), ChildState::Idle);

    // key derivation failure unregisters the new remote SPI
    let mut harness = Harness::open(params(), &[REMOTE_INIT_NEW_LOCAL_SPI]);
    harness
        .factory
        .fail_next_record(Error::KeyDerivation("bad nonce".into()));
    harness.child.receive_request(
        ExchangeSubtype::RekeyChild,
        ExchangeType::CreateChildSa,
        remote_rekey_request(&esp_proposal(), REMOTE_INIT_NEW_REMOTE_SPI, CURRENT_REMOTE_SPI),
    );
    let calls = harness.dispatch();
    assert_eq!(
        error_notify_type(sent_response(&calls)),
        NotifyType::NoProposalChosen
    );
    assert_eq!(
        without_sends(calls),
        vec![
            Call::SpiCreated(REMOTE_INIT_NEW_REMOTE_SPI),
            Call::SpiDeleted(REMOTE_INIT_NEW_REMOTE_SPI),
            Call::ProcedureFinished,
        ]
    );
    assert_eq!(harness.spis.released(), vec![REMOTE_INIT_NEW_LOCAL_SPI]);
}

#[test]
fn test_rekey_collision_replies_temporary_failure() {
    let mut harness = Harness::open(params(), &[LOCAL_INIT_NEW_LOCAL_SPI]);
    start_local_rekey(&mut harness);

    harness.child.receive_request(
        ExchangeSubtype::RekeyChild,
        ExchangeType::CreateChildSa,
        remote_rekey_request(&esp_proposal(), REMOTE_INIT_NEW_REMOTE_SPI, CURRENT_REMOTE_SPI),
    );
    let calls = harness.dispatch();

    assert_eq!(harness.state(), ChildState::RekeyLocalCreate);
    assert_eq!(calls.len(), 1);
    let Call::Send {
        exchange,
        is_response,
        payloads,
    } = &calls[0]
    else {
        panic!("expected collision reply");
    };
    assert_eq!(*exchange, ExchangeType::Informational);
    assert!(*is_response);
    assert_eq!(error_notify_type(payloads), NotifyType::TemporaryFailure);
}

#[test]
fn test_delete_during_local_rekey() {
    let mut harness = Harness::open(params(), &[LOCAL_INIT_NEW_LOCAL_SPI]);
    let request = start_local_rekey(&mut harness);

    harness.child.receive_request(
        ExchangeSubtype::DeleteChild,
        ExchangeType::Informational,
        CreateChildHelper::delete_payloads(CURRENT_REMOTE_SPI),
    );
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::RekeyLocalCreate);
    assert_eq!(sent_response(&calls).deletes()[0].spis, vec![CURRENT_LOCAL_SPI]);
    assert_eq!(without_sends(calls), vec![Call::SpiDeleted(CURRENT_REMOTE_SPI)]);
    assert_eq!(
        harness.run_tasks(),
        vec![
            Call::Deleted(CURRENT_LOCAL_SPI, Direction::Inbound),
            Call::Deleted(CURRENT_REMOTE_SPI, Direction::Outbound),
            Call::Closed,
        ]
    );

    // the rekey response no longer matters
    harness.child.receive_response(
        ExchangeType::CreateChildSa,
        response_to(&request, LOCAL_INIT_NEW_REMOTE_SPI),
    );
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::Closed);
    assert_eq!(calls, vec![Call::ProcedureFinished, Call::SessionClosed]);
    assert_eq!(harness.executor.pending(), 0);
    assert!(harness.spis.released().contains(&LOCAL_INIT_NEW_LOCAL_SPI));
}

#[test]
fn test_requests_for_new_sa_are_deferred_after_local_rekey() {
    let mut harness = Harness::open(params(), &[LOCAL_INIT_NEW_LOCAL_SPI]);
    let request = start_local_rekey(&mut harness);
    harness.child.receive_response(
        ExchangeType::CreateChildSa,
        response_to(&request, LOCAL_INIT_NEW_REMOTE_SPI),
    );
    harness.dispatch();
    harness.run_tasks();
    assert_eq!(harness.state(), ChildState::RekeyLocalDelete);

    // peer already deletes the new SA: finish the rekey, then handle the delete
    harness.child.receive_request(
        ExchangeSubtype::DeleteChild,
        ExchangeType::Informational,
        CreateChildHelper::delete_payloads(LOCAL_INIT_NEW_REMOTE_SPI),
    );
    let calls = harness.dispatch();

    assert_eq!(harness.state(), ChildState::Closed);
    assert_eq!(
        sent_response(&calls).deletes()[0].spis,
        vec![LOCAL_INIT_NEW_LOCAL_SPI]
    );
    assert_eq!(
        without_sends(calls),
        vec![
            Call::SpiDeleted(CURRENT_REMOTE_SPI),
            Call::SpiDeleted(LOCAL_INIT_NEW_REMOTE_SPI),
            Call::ProcedureFinished,
            Call::SessionClosed,
        ]
    );
    assert_eq!(
        harness.run_tasks(),
        vec![
            Call::Deleted(CURRENT_LOCAL_SPI, Direction::Inbound),
            Call::Deleted(CURRENT_REMOTE_SPI, Direction::Outbound),
            Call::Deleted(LOCAL_INIT_NEW_LOCAL_SPI, Direction::Inbound),
            Call::Deleted(LOCAL_INIT_NEW_REMOTE_SPI, Direction::Outbound),
            Call::Closed,
        ]
    );
}

#[test]
fn test_requests_for_new_sa_are_deferred_after_remote_rekey() {
    let mut harness = Harness::open(params(), &[REMOTE_INIT_NEW_LOCAL_SPI, 0x4000]);
    harness.child.receive_request(
        ExchangeSubtype::RekeyChild,
        ExchangeType::CreateChildSa,
        remote_rekey_request(&esp_proposal(), REMOTE_INIT_NEW_REMOTE_SPI, CURRENT_REMOTE_SPI),
    );
    harness.dispatch();

    // a rekey of the SA created by the previous rekey
    harness.child.receive_request(
        ExchangeSubtype::RekeyChild,
        ExchangeType::CreateChildSa,
        remote_rekey_request(&esp_proposal(), 0x5000, REMOTE_INIT_NEW_REMOTE_SPI),
    );
    let calls = harness.dispatch();

    assert_eq!(harness.state(), ChildState::RekeyRemoteDelete);
    assert_eq!(calls[0], Call::SpiDeleted(CURRENT_REMOTE_SPI));
    let response = sent_response(&calls);
    assert_eq!(
        response.sa().unwrap().chosen_proposal().unwrap().spi,
        Some(0x4000)
    );
}

#[test]
fn test_simultaneous_delete_of_old_sa_during_local_rekey() {
    let mut harness = Harness::open(params(), &[LOCAL_INIT_NEW_LOCAL_SPI]);
    let request = start_local_rekey(&mut harness);
    harness.child.receive_response(
        ExchangeType::CreateChildSa,
        response_to(&request, LOCAL_INIT_NEW_REMOTE_SPI),
    );
    harness.dispatch();

    harness.child.receive_request(
        ExchangeSubtype::DeleteChild,
        ExchangeType::Informational,
        CreateChildHelper::delete_payloads(CURRENT_REMOTE_SPI),
    );
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::RekeyLocalDelete);
    assert!(sent_response(&calls).is_empty());

    harness
        .child
        .receive_response(ExchangeType::Informational, Vec::new());
    harness.dispatch();
    assert_eq!(harness.state(), ChildState::Idle);
    assert_eq!(
        harness.child.current_spis(),
        Some((LOCAL_INIT_NEW_LOCAL_SPI, LOCAL_INIT_NEW_REMOTE_SPI))
    );
}

#[test]
fn test_soft_lifetime_triggers_rekey() {
    let lifetime = SaLifetime::new(Duration::from_secs(300), Duration::from_secs(360)).unwrap();
    let params = ChildSessionParams::builder()
        .with_proposal(esp_proposal())
        .with_lifetime(lifetime)
        .build()
        .unwrap();
    let mut harness = Harness::open(params, &[LOCAL_INIT_NEW_LOCAL_SPI]);

    harness.clock.advance(Duration::from_secs(299));
    assert!(harness.dispatch().is_empty());

    harness.clock.advance(Duration::from_secs(1));
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::RekeyLocalCreate);
    assert!(sent_request(&calls).status_notify(NotifyType::RekeySa).is_some());
}

#[test]
fn test_hard_lifetime_deletes_sa() {
    let lifetime = SaLifetime::new(Duration::from_secs(300), Duration::from_secs(360)).unwrap();
    let params = ChildSessionParams::builder()
        .with_proposal(esp_proposal())
        .with_lifetime(lifetime)
        .build()
        .unwrap();
    // no SPI for the rekey, so the soft lifetime keeps failing
    let mut harness = Harness::open(params, &[]);

    harness.clock.advance(Duration::from_secs(360));
    let calls = harness.dispatch();
    assert_eq!(harness.state(), ChildState::DeleteLocalDelete);
    assert_eq!(
        sent_request(&calls).deletes()[0].spis,
        vec![CURRENT_LOCAL_SPI]
    );
}

#[test]
fn test_first_child_rekey_uses_configured_dh_group() {
    let params = ChildSessionParams::builder()
        .with_proposal(esp_proposal_with_dh(IKE_DH_GROUP))
        .build()
        .unwrap();
    // IKE_AUTH never negotiates D-H for the first child
    let auth_request = vec![
        IkePayload::SA(fynx_ipsec::ikev2::payload::SaPayload::request(vec![
            esp_proposal().with_spi(CURRENT_LOCAL_SPI),
        ])),
        IkePayload::Nonce(fynx_ipsec::ikev2::payload::NoncePayload::generate()),
        IkePayload::TSi(fynx_ipsec::ikev2::payload::TrafficSelectorsPayload::initiator(any())),
        IkePayload::TSr(fynx_ipsec::ikev2::payload::TrafficSelectorsPayload::responder(any())),
    ];
    let auth_response = create_response(&esp_proposal(), CURRENT_REMOTE_SPI);

    let mut harness = Harness::new(params, &[LOCAL_INIT_NEW_LOCAL_SPI]);
    harness
        .child
        .handle_first_child_exchange(auth_request, auth_response, ike_context());
    harness.dispatch();
    assert_eq!(harness.state(), ChildState::Idle);

    let request = start_local_rekey(&mut harness);
    assert_eq!(request.ke().unwrap().dh_group, IKE_DH_GROUP);
    assert_eq!(
        request.sa().unwrap().proposals()[0].dh_group(),
        Some(IKE_DH_GROUP)
    );

    harness.child.receive_response(
        ExchangeType::CreateChildSa,
        response_to(&request, LOCAL_INIT_NEW_REMOTE_SPI),
    );
    harness.dispatch();
    assert_eq!(harness.state(), ChildState::RekeyLocalDelete);
    assert_eq!(
        harness.factory.calls().pop().unwrap().config.dh_group,
        Some(IKE_DH_GROUP)
    );
}
