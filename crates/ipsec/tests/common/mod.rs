//! Fixtures shared by the child session integration tests

#![allow(dead_code)]

use fynx_ipsec::child_session::{
    ChildSaRecord, ChildSessionConfiguration, ChildSessionController, ChildSessionDeps,
    ChildSessionUserCallback, ChildState, Direction, IkeSaContext, IpsecTransform, LocalRequest,
    LocalRequestKind, ManualClock, SaRecordConfig, SaRecordFactory, SessionCallback,
    SpiAllocator, TaskExecutor, TransformMigrator,
};
use fynx_ipsec::config::ChildSessionParams;
use fynx_ipsec::crypto::prf::{ChildKeyMaterial, PrfAlgorithm};
use fynx_ipsec::ikev2::constants::ExchangeType;
use fynx_ipsec::ikev2::payload::{
    IkePayload, KePayload, NoncePayload, PayloadListExt, SaPayload, TrafficSelector,
    TrafficSelectorsPayload,
};
use fynx_ipsec::ikev2::proposal::{
    EncrTransformId, IntegTransformId, Proposal, ProtocolId, Transform,
};
use fynx_ipsec::{Error, Result};
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CURRENT_LOCAL_SPI: u32 = 0x2ad4c0a2;
pub const CURRENT_REMOTE_SPI: u32 = 0xcae7019f;
pub const LOCAL_INIT_NEW_LOCAL_SPI: u32 = 0x57a09b0f;
pub const LOCAL_INIT_NEW_REMOTE_SPI: u32 = 0xcd1736b3;
pub const REMOTE_INIT_NEW_LOCAL_SPI: u32 = 0xd2d01795;
pub const REMOTE_INIT_NEW_REMOTE_SPI: u32 = 0xc8833649;

pub const LOCAL_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 200));
pub const UPDATED_LOCAL_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 201));
pub const REMOTE_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 100));
pub const INTERNAL_ADDRESS: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 100);

pub const IKE_DH_GROUP: u16 = 14;
const SK_D_HEX: &str = "C86B56EFCF684DCC2877578AEF3137167FE0EBF6";

/// Everything the controller told the outside world, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send {
        exchange: ExchangeType,
        is_response: bool,
        payloads: Vec<IkePayload>,
    },
    SpiCreated(u32),
    SpiDeleted(u32),
    ProcedureFinished,
    SessionClosed,
    Retry(LocalRequestKind, Duration),
    FatalIke(Error),
    Opened(ChildSessionConfiguration),
    Closed,
    ClosedWithException(Error),
    Created(u32, Direction),
    Deleted(u32, Direction),
    Migrated(IpsecTransform, IpsecTransform),
}

/// Records both the parent session and user callbacks into one log
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

impl SessionCallback for Recorder {
    fn send_outbound(&self, exchange: ExchangeType, is_response: bool, payloads: Vec<IkePayload>) {
        self.push(Call::Send {
            exchange,
            is_response,
            payloads,
        });
    }

    fn spi_created(&self, remote_spi: u32) {
        self.push(Call::SpiCreated(remote_spi));
    }

    fn spi_deleted(&self, remote_spi: u32) {
        self.push(Call::SpiDeleted(remote_spi));
    }

    fn procedure_finished(&self) {
        self.push(Call::ProcedureFinished);
    }

    fn session_closed(&self, _user_callback: Arc<dyn ChildSessionUserCallback>) {
        self.push(Call::SessionClosed);
    }

    fn schedule_retry(&self, request: LocalRequest, delay: Duration) {
        self.push(Call::Retry(request.kind, delay));
    }

    fn fatal_ike_error(&self, error: Error) {
        self.push(Call::FatalIke(error));
    }
}

impl ChildSessionUserCallback for Recorder {
    fn on_opened(&self, config: &ChildSessionConfiguration) {
        self.push(Call::Opened(config.clone()));
    }

    fn on_closed(&self) {
        self.push(Call::Closed);
    }

    fn on_closed_with_exception(&self, error: Error) {
        self.push(Call::ClosedWithException(error));
    }

    fn on_transform_created(&self, transform: &IpsecTransform, direction: Direction) {
        self.push(Call::Created(transform.spi, direction));
    }

    fn on_transform_deleted(&self, transform: &IpsecTransform, direction: Direction) {
        self.push(Call::Deleted(transform.spi, direction));
    }

    fn on_transforms_migrated(&self, inbound: &IpsecTransform, outbound: &IpsecTransform) {
        self.push(Call::Migrated(inbound.clone(), outbound.clone()));
    }
}

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executor holding tasks until the test runs them
#[derive(Default)]
pub struct LateExecutor {
    tasks: Mutex<VecDeque<Task>>,
}

impl LateExecutor {
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Run every queued task, returning how many ran
    pub fn run_all(&self) -> usize {
        let tasks: Vec<Task> = self.tasks.lock().unwrap().drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }
}

impl TaskExecutor for LateExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        self.tasks.lock().unwrap().push_back(task);
    }
}

/// SPI pool handing out a fixed sequence
#[derive(Default)]
pub struct SpiPool {
    queue: Mutex<VecDeque<u32>>,
    released: Mutex<Vec<u32>>,
}

impl SpiPool {
    pub fn new(spis: &[u32]) -> Arc<Self> {
        Arc::new(SpiPool {
            queue: Mutex::new(spis.iter().copied().collect()),
            released: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, spi: u32) {
        self.queue.lock().unwrap().push_back(spi);
    }

    pub fn released(&self) -> Vec<u32> {
        self.released.lock().unwrap().clone()
    }
}

struct PoolAllocator(Arc<SpiPool>);

impl SpiAllocator for PoolAllocator {
    fn allocate_spi(&mut self, _local_address: IpAddr) -> Result<u32> {
        self.0
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::ResourceUnavailable("SPI pool exhausted".into()))
    }

    fn release_spi(&mut self, spi: u32) {
        self.0.released.lock().unwrap().push(spi);
    }
}

/// What a record factory was asked to build
#[derive(Clone)]
pub struct FactoryCall {
    pub config: SaRecordConfig,
    pub local_payloads: Vec<IkePayload>,
    pub remote_payloads: Vec<IkePayload>,
}

/// Programmable record factory
#[derive(Default)]
pub struct FactoryScript {
    calls: Mutex<Vec<FactoryCall>>,
    record_failures: Mutex<VecDeque<Error>>,
    ke_failure: Mutex<Option<Error>>,
}

impl FactoryScript {
    /// Fail the next record build with `error`
    pub fn fail_next_record(&self, error: Error) {
        self.record_failures.lock().unwrap().push_back(error);
    }

    /// Fail every KE generation with `error`
    pub fn fail_key_exchange(&self, error: Error) {
        *self.ke_failure.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<FactoryCall> {
        self.calls.lock().unwrap().clone()
    }
}

struct ScriptedFactory(Arc<FactoryScript>);

impl SaRecordFactory for ScriptedFactory {
    fn make_sa_record(
        &mut self,
        local_payloads: &[IkePayload],
        remote_payloads: &[IkePayload],
        config: SaRecordConfig,
    ) -> Result<ChildSaRecord> {
        self.0.calls.lock().unwrap().push(FactoryCall {
            config: config.clone(),
            local_payloads: local_payloads.to_vec(),
            remote_payloads: remote_payloads.to_vec(),
        });
        if let Some(err) = self.0.record_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let keys = ChildKeyMaterial {
            sk_ei: vec![0x11; 16],
            sk_ai: vec![0x22; 32],
            sk_er: vec![0x33; 16],
            sk_ar: vec![0x44; 32],
        };
        Ok(ChildSaRecord::new(&config, keys))
    }

    fn key_exchange_payload(&mut self, dh_group: u16) -> Result<KePayload> {
        if let Some(err) = self.0.ke_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(KePayload::new(dh_group, vec![0x5a; 256]))
    }
}

/// (spi, new source, new destination) of every migrated transform
pub type MovedTransforms = Arc<Mutex<Vec<(u32, IpAddr, IpAddr)>>>;

/// Kernel migrator recording the transforms it moved
pub struct RecordingMigrator {
    supported: bool,
    fail: bool,
    moved: MovedTransforms,
}

impl RecordingMigrator {
    pub fn new(supported: bool, fail: bool) -> (Self, MovedTransforms) {
        let moved = Arc::new(Mutex::new(Vec::new()));
        let migrator = RecordingMigrator {
            supported,
            fail,
            moved: moved.clone(),
        };
        (migrator, moved)
    }
}

impl TransformMigrator for RecordingMigrator {
    fn supports_migration(&self) -> bool {
        self.supported
    }

    fn migrate_transform(
        &mut self,
        transform: &IpsecTransform,
        new_source: IpAddr,
        new_destination: IpAddr,
    ) -> Result<()> {
        if self.fail {
            return Err(Error::ResourceUnavailable("transform busy".into()));
        }
        self.moved
            .lock()
            .unwrap()
            .push((transform.spi, new_source, new_destination));
        Ok(())
    }
}

/// A controller wired to recording mocks
pub struct Harness {
    pub child: ChildSessionController,
    pub recorder: Arc<Recorder>,
    pub executor: Arc<LateExecutor>,
    pub spis: Arc<SpiPool>,
    pub factory: Arc<FactoryScript>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new(params: ChildSessionParams, spis: &[u32]) -> Self {
        Self::build(params, spis, None)
    }

    pub fn with_migrator(params: ChildSessionParams, spis: &[u32], migrator: RecordingMigrator) -> Self {
        Self::build(params, spis, Some(migrator))
    }

    fn build(params: ChildSessionParams, spis: &[u32], migrator: Option<RecordingMigrator>) -> Self {
        init_tracing();
        let recorder = Arc::new(Recorder::default());
        let executor = Arc::new(LateExecutor::default());
        let pool = SpiPool::new(spis);
        let factory = Arc::new(FactoryScript::default());
        let clock = ManualClock::new();

        let mut deps = ChildSessionDeps::new(
            recorder.clone(),
            recorder.clone(),
            executor.clone(),
            Box::new(PoolAllocator(pool.clone())),
            Box::new(ScriptedFactory(factory.clone())),
        )
        .with_clock(clock.clone());
        if let Some(migrator) = migrator {
            deps = deps.with_migrator(migrator);
        }

        Harness {
            child: ChildSessionController::new(params, deps),
            recorder,
            executor,
            spis: pool,
            factory,
            clock,
        }
    }

    /// Handle every queued event, returning the calls made meanwhile
    ///
    /// User notifications stay queued on the executor.
    pub fn dispatch(&mut self) -> Vec<Call> {
        self.child.dispatch_all();
        self.recorder.take()
    }

    /// Run queued user notifications, returning what they delivered
    pub fn run_tasks(&self) -> Vec<Call> {
        self.executor.run_all();
        self.recorder.take()
    }

    pub fn state(&self) -> ChildState {
        self.child.state()
    }

    /// Drive a CREATE_CHILD_SA create to `Idle` and drop the recorded calls
    pub fn open(params: ChildSessionParams, extra_spis: &[u32]) -> Self {
        let mut spis = vec![CURRENT_LOCAL_SPI];
        spis.extend_from_slice(extra_spis);
        let mut harness = Harness::new(params, &spis);

        harness.child.create_child_session(ike_context());
        let calls = harness.dispatch();
        let request = sent_request(&calls).to_vec();
        let proposal = request.sa().unwrap().proposals()[0].clone();

        harness.child.receive_response(
            ExchangeType::CreateChildSa,
            create_response(&proposal, CURRENT_REMOTE_SPI),
        );
        harness.dispatch();
        harness.run_tasks();
        assert_eq!(harness.state(), ChildState::Idle);
        harness
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn esp_proposal() -> Proposal {
    Proposal::new(1, ProtocolId::Esp)
        .add_transform(Transform::encr(EncrTransformId::AesCbc, Some(128)))
        .add_transform(Transform::integ(IntegTransformId::HmacSha256_128))
}

pub fn esp_proposal_with_dh(group: u16) -> Proposal {
    esp_proposal().add_transform(Transform::dh(group))
}

pub fn params() -> ChildSessionParams {
    ChildSessionParams::builder()
        .with_proposal(esp_proposal())
        .build()
        .unwrap()
}

pub fn sk_d() -> Vec<u8> {
    hex::decode(SK_D_HEX).unwrap()
}

pub fn ike_context() -> IkeSaContext {
    IkeSaContext::new(
        LOCAL_ADDRESS,
        REMOTE_ADDRESS,
        None,
        PrfAlgorithm::HmacSha256,
        IKE_DH_GROUP,
        sk_d(),
    )
}

fn any_selectors() -> (TrafficSelectorsPayload, TrafficSelectorsPayload) {
    (
        TrafficSelectorsPayload::initiator(vec![TrafficSelector::ipv4_any()]),
        TrafficSelectorsPayload::responder(vec![TrafficSelector::ipv4_any()]),
    )
}

/// Peer response accepting `proposal` with `remote_spi`
pub fn create_response(proposal: &Proposal, remote_spi: u32) -> Vec<IkePayload> {
    let (ts_i, ts_r) = any_selectors();
    let mut payloads = vec![
        IkePayload::SA(SaPayload::response(proposal.clone().with_spi(remote_spi))),
        IkePayload::Nonce(NoncePayload::generate()),
    ];
    if let Some(group) = proposal.dh_group() {
        payloads.push(IkePayload::KE(KePayload::new(group, vec![0xa5; 256])));
    }
    payloads.push(IkePayload::TSi(ts_i));
    payloads.push(IkePayload::TSr(ts_r));
    payloads
}

/// Payloads of the only request in `calls`
pub fn sent_request(calls: &[Call]) -> &[IkePayload] {
    let requests: Vec<&Vec<IkePayload>> = calls
        .iter()
        .filter_map(|c| match c {
            Call::Send {
                is_response: false,
                payloads,
                ..
            } => Some(payloads),
            _ => None,
        })
        .collect();
    assert_eq!(requests.len(), 1, "expected one request in {:?}", calls);
    requests[0]
}

/// Payloads of the only response in `calls`
pub fn sent_response(calls: &[Call]) -> &[IkePayload] {
    let responses: Vec<&Vec<IkePayload>> = calls
        .iter()
        .filter_map(|c| match c {
            Call::Send {
                is_response: true,
                payloads,
                ..
            } => Some(payloads),
            _ => None,
        })
        .collect();
    assert_eq!(responses.len(), 1, "expected one response in {:?}", calls);
    responses[0]
}

pub fn count(calls: &[Call], wanted: &Call) -> usize {
    calls.iter().filter(|c| *c == wanted).count()
}

/// Calls other than outbound messages
pub fn without_sends(calls: Vec<Call>) -> Vec<Call> {
    calls
        .into_iter()
        .filter(|c| !matches!(c, Call::Send { .. }))
        .collect()
}
