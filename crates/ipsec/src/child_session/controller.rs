//! Child session controller
//!
//! [`ChildSessionController`] owns one Child SA pair for its whole life:
//! creation, local and remote rekeys, MOBIKE migration and deletion.
//!
//! Every public call except [`ChildSessionController::kill_session`] only
//! enqueues an [`Event`]. Events are processed one at a time, to completion,
//! by [`ChildSessionController::dispatch_next`] or
//! [`ChildSessionController::dispatch_all`]. Timers are delayed events in a
//! [`TimerQueue`] read against the injected [`Clock`].
//!
//! # Notifications
//!
//! Calls into the parent [`SessionCallback`] happen synchronously while an
//! event is handled. User notifications are packaged as owned closures and
//! handed to the [`TaskExecutor`], one task per user-visible step.

use super::callback::{
    ChildSessionConfiguration, ChildSessionUserCallback, LocalRequest, LocalRequestKind,
    SessionCallback, TaskExecutor,
};
use super::helper::{CreateChildHelper, CreateChildResult};
use super::record::{
    ChildSaRecord, EncapSocket, IpsecTransform, NoKernelMigration, SaRecordConfig,
    SaRecordFactory, TransformMigrator,
};
use super::spi::SpiAllocator;
use super::state::{ChildState, Event, IkeSaContext, LocalCommand, TimerEvent};
use super::timer::{Clock, SystemClock, TimerQueue};
use crate::config::{ChildSessionParams, ChildTimingConfig};
use crate::ikev2::constants::{ExchangeSubtype, ExchangeType, NotifyType};
use crate::ikev2::payload::{
    DeletePayload, IkePayload, PayloadListExt, TrafficSelector, TrafficSelectorsPayload,
};
use crate::ikev2::proposal::{Proposal, ProtocolId};
use crate::logging;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

static NEXT_CHILD_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a controller talks to
pub struct ChildSessionDeps {
    /// Parent IKE session
    pub session_callback: Arc<dyn SessionCallback>,

    /// Application callback
    pub user_callback: Arc<dyn ChildSessionUserCallback>,

    /// Runs user notifications
    pub executor: Arc<dyn TaskExecutor>,

    /// Inbound SPI pool
    pub spi_allocator: Box<dyn SpiAllocator>,

    /// Builds SA records
    pub record_factory: Box<dyn SaRecordFactory>,

    /// Kernel transform migration
    pub migrator: Box<dyn TransformMigrator>,

    /// Time source for timers and record lifetimes
    pub clock: Box<dyn Clock>,

    /// Retry and timeout intervals
    pub timing: ChildTimingConfig,
}

impl ChildSessionDeps {
    /// Create dependencies with the system clock, no kernel migration and
    /// default timing
    pub fn new(
        session_callback: Arc<dyn SessionCallback>,
        user_callback: Arc<dyn ChildSessionUserCallback>,
        executor: Arc<dyn TaskExecutor>,
        spi_allocator: Box<dyn SpiAllocator>,
        record_factory: Box<dyn SaRecordFactory>,
    ) -> Self {
        ChildSessionDeps {
            session_callback,
            user_callback,
            executor,
            spi_allocator,
            record_factory,
            migrator: Box::new(NoKernelMigration),
            clock: Box::new(SystemClock),
            timing: ChildTimingConfig::default(),
        }
    }

    /// Use another clock
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Use a platform transform migrator
    pub fn with_migrator(mut self, migrator: impl TransformMigrator + 'static) -> Self {
        self.migrator = Box::new(migrator);
        self
    }

    /// Override timing
    pub fn with_timing(mut self, timing: ChildTimingConfig) -> Self {
        self.timing = timing;
        self
    }
}

/// Which new record of a rekey becomes current
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurvivingRecord {
    LocalInit,
    RemoteInit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MigrationTarget {
    local: IpAddr,
    remote: IpAddr,
    encap: Option<EncapSocket>,
}

/// Request we sent and still wait a response for
struct OutstandingRequest {
    kind: LocalRequestKind,
    payloads: Vec<IkePayload>,
    local_spi: Option<u32>,
    migration: Option<MigrationTarget>,
}

enum UserNotice {
    Opened(ChildSessionConfiguration),
    Closed,
    ClosedWithException(Error),
    TransformCreated(IpsecTransform),
    TransformDeleted(IpsecTransform),
    TransformsMigrated(IpsecTransform, IpsecTransform),
}

impl UserNotice {
    fn deliver(self, callback: &dyn ChildSessionUserCallback) {
        match self {
            UserNotice::Opened(config) => callback.on_opened(&config),
            UserNotice::Closed => callback.on_closed(),
            UserNotice::ClosedWithException(err) => callback.on_closed_with_exception(err),
            UserNotice::TransformCreated(t) => callback.on_transform_created(&t, t.direction),
            UserNotice::TransformDeleted(t) => callback.on_transform_deleted(&t, t.direction),
            UserNotice::TransformsMigrated(inbound, outbound) => {
                callback.on_transforms_migrated(&inbound, &outbound)
            }
        }
    }
}

fn deletes_spi(payloads: &[IkePayload], spi: u32) -> bool {
    payloads
        .deletes()
        .iter()
        .any(|d| d.protocol_id == ProtocolId::Esp && d.spis.contains(&spi))
}

fn rekeys_spi(payloads: &[IkePayload], spi: u32) -> bool {
    payloads
        .status_notify(NotifyType::RekeySa)
        .and_then(|n| n.spi)
        == Some(spi)
}

fn names_spi(subtype: ExchangeSubtype, payloads: &[IkePayload], spi: u32) -> bool {
    match subtype {
        ExchangeSubtype::DeleteChild => deletes_spi(payloads, spi),
        ExchangeSubtype::RekeyChild => rekeys_spi(payloads, spi),
    }
}

/// State machine for one Child SA session
pub struct ChildSessionController {
    child_id: u64,
    params: ChildSessionParams,
    deps: ChildSessionDeps,
    state: ChildState,
    queue: VecDeque<Event>,
    timers: TimerQueue<TimerEvent>,

    ike: Option<IkeSaContext>,
    negotiated: Option<Proposal>,
    pending_proposal: Option<Proposal>,
    local_ts: Vec<TrafficSelector>,
    remote_ts: Vec<TrafficSelector>,
    is_first_child: bool,

    current: Option<ChildSaRecord>,
    local_init_new: Option<ChildSaRecord>,
    remote_init_new: Option<ChildSaRecord>,
    surviving: Option<SurvivingRecord>,

    outstanding: Option<OutstandingRequest>,
    pending_migration: Option<MigrationTarget>,
    deferred: Option<Event>,
    rekey_delete_generation: u64,

    closed_notified: bool,
    deleted_during_rekey: bool,
    simultaneous_delete: bool,
}

impl ChildSessionController {
    /// Create a controller in `Initial`
    pub fn new(params: ChildSessionParams, deps: ChildSessionDeps) -> Self {
        let local_ts = params.inbound_traffic_selectors.clone();
        let remote_ts = params.outbound_traffic_selectors.clone();

        ChildSessionController {
            child_id: NEXT_CHILD_ID.fetch_add(1, Ordering::Relaxed),
            params,
            deps,
            state: ChildState::Initial,
            queue: VecDeque::new(),
            timers: TimerQueue::new(),
            ike: None,
            negotiated: None,
            pending_proposal: None,
            local_ts,
            remote_ts,
            is_first_child: false,
            current: None,
            local_init_new: None,
            remote_init_new: None,
            surviving: None,
            outstanding: None,
            pending_migration: None,
            deferred: None,
            rekey_delete_generation: 0,
            closed_notified: false,
            deleted_during_rekey: false,
            simultaneous_delete: false,
        }
    }

    /// Tag carried by every log event of this session
    pub fn child_id(&self) -> u64 {
        self.child_id
    }

    /// Current state
    pub fn state(&self) -> ChildState {
        self.state
    }

    /// (local, remote) SPIs of the current record
    pub fn current_spis(&self) -> Option<(u32, u32)> {
        self.current
            .as_ref()
            .map(|r| (r.local_spi(), r.remote_spi()))
    }

    /// Earliest pending timer deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Whether an event is waiting to be handled
    pub fn has_pending_events(&self) -> bool {
        self.deferred.is_some() || !self.queue.is_empty()
    }

    /// Replace SK_d after the parent IKE SA was rekeyed
    pub fn set_sk_d(&mut self, sk_d: Vec<u8>) {
        if let Some(ike) = self.ike.as_mut() {
            ike.sk_d = zeroize::Zeroizing::new(sk_d);
        }
    }

    /// Start a CREATE_CHILD_SA exchange for a new Child SA
    pub fn create_child_session(&mut self, ctx: IkeSaContext) {
        self.enqueue(Event::Local(LocalCommand::Create(ctx)));
    }

    /// Adopt the Child SA negotiated in IKE_AUTH
    ///
    /// `request` and `response` hold the child payloads of the exchange.
    pub fn handle_first_child_exchange(
        &mut self,
        request: Vec<IkePayload>,
        response: Vec<IkePayload>,
        ctx: IkeSaContext,
    ) {
        self.enqueue(Event::Local(LocalCommand::FirstChild {
            ctx,
            request,
            response,
        }));
    }

    /// Rekey the current Child SA
    pub fn rekey_child_session(&mut self) {
        self.enqueue(Event::Local(LocalCommand::Rekey));
    }

    /// Delete the Child SA
    pub fn delete_child_session(&mut self) {
        self.enqueue(Event::Local(LocalCommand::Delete));
    }

    /// Move to new outer addresses, in the kernel when possible
    pub fn perform_migration(&mut self, local: IpAddr, remote: IpAddr, encap: Option<EncapSocket>) {
        self.enqueue(Event::Local(LocalCommand::Migrate {
            local,
            remote,
            encap,
        }));
    }

    /// Move to new outer addresses with a rekey
    pub fn perform_rekey_migration(
        &mut self,
        local: IpAddr,
        remote: IpAddr,
        encap: Option<EncapSocket>,
    ) {
        self.enqueue(Event::Local(LocalCommand::RekeyMigrate {
            local,
            remote,
            encap,
        }));
    }

    /// Hand over a request from the peer
    pub fn receive_request(
        &mut self,
        subtype: ExchangeSubtype,
        exchange: ExchangeType,
        payloads: Vec<IkePayload>,
    ) {
        self.enqueue(Event::InboundRequest {
            subtype,
            exchange,
            payloads,
        });
    }

    /// Hand over the response to our last request
    pub fn receive_response(&mut self, exchange: ExchangeType, payloads: Vec<IkePayload>) {
        self.enqueue(Event::InboundResponse { exchange, payloads });
    }

    /// Close every record now and reach `Closed`
    ///
    /// Runs synchronously. Queued events are dropped.
    pub fn kill_session(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        debug!(child_id = self.child_id, state = self.state.name(), "Killing child session");
        self.shutdown(UserNotice::Closed);
    }

    /// Handle one event
    ///
    /// A deferred request goes first, then queued events, then due timers.
    /// Returns `false` when nothing was handled.
    pub fn dispatch_next(&mut self) -> bool {
        if let Some(event) = self.deferred.take() {
            self.handle_event(event);
            return true;
        }
        if let Some(event) = self.queue.pop_front() {
            self.handle_event(event);
            return true;
        }
        let now = self.deps.clock.now();
        if let Some(timer) = self.timers.pop_due(now) {
            self.handle_event(Event::Timer(timer));
            return true;
        }
        false
    }

    /// Handle events until the queue is empty and no timer is due
    pub fn dispatch_all(&mut self) {
        while self.dispatch_next() {}
    }

    fn enqueue(&mut self, event: Event) {
        if self.state.is_terminal() {
            debug!(child_id = self.child_id, "Dropping event for closed child session");
            return;
        }
        self.queue.push_back(event);
    }

    fn handle_event(&mut self, event: Event) {
        if self.state.is_terminal() {
            return;
        }
        if self.state == ChildState::IdleWithDeferredRequest {
            self.transition_to(ChildState::Idle);
        }

        let context = self.state.name();
        let result = match event {
            Event::Timer(timer) => self.handle_timer(timer),
            event => match self.state {
                ChildState::Initial => self.handle_initial(event),
                ChildState::CreateLocalCreate => self.handle_create_local_create(event),
                ChildState::Idle | ChildState::IdleWithDeferredRequest => self.handle_idle(event),
                ChildState::RekeyLocalCreate | ChildState::MobikeRekeyLocalCreate => {
                    self.handle_rekey_local_create(event)
                }
                ChildState::RekeyLocalDelete => self.handle_rekey_local_delete(event),
                ChildState::RekeyRemoteDelete => self.handle_rekey_remote_delete(event),
                ChildState::DeleteLocalDelete => self.handle_delete_local_delete(event),
                ChildState::Closed => Ok(()),
            },
        };

        if let Err(e) = result {
            logging::log_unexpected_error(self.child_id, context, &e.to_string());
            if !self.state.is_terminal() {
                self.fatal_close(e.wrap_internal());
            }
        }
    }

    // ---- states ----

    fn handle_initial(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Local(LocalCommand::Create(ctx)) => self.start_create(ctx),
            Event::Local(LocalCommand::FirstChild {
                ctx,
                request,
                response,
            }) => self.adopt_first_child(ctx, request, response),
            Event::Local(LocalCommand::Delete) => {
                self.close_session(None);
                Ok(())
            }
            Event::Local(cmd) => {
                self.ignore_local(&cmd);
                Ok(())
            }
            _ => {
                self.ignore_inbound(&event);
                Ok(())
            }
        }
    }

    fn handle_create_local_create(&mut self, event: Event) -> Result<()> {
        match event {
            Event::InboundResponse { payloads, .. } => self.handle_create_response(payloads),
            // no SA exists yet, so the peer's request names nothing of ours
            Event::InboundRequest {
                subtype: ExchangeSubtype::RekeyChild,
                ..
            } => {
                self.reply_temporary_failure();
                Ok(())
            }
            Event::InboundRequest {
                subtype: ExchangeSubtype::DeleteChild,
                ..
            } => {
                self.send(ExchangeType::Informational, true, Vec::new());
                Ok(())
            }
            Event::Local(cmd) => {
                self.ignore_local(&cmd);
                Ok(())
            }
            Event::Timer(_) => Ok(()),
        }
    }

    fn handle_idle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Local(LocalCommand::Rekey) => self.start_local_rekey(None),
            Event::Local(LocalCommand::Delete) => self.start_local_delete(),
            Event::Local(LocalCommand::Migrate {
                local,
                remote,
                encap,
            }) => self.migrate(MigrationTarget {
                local,
                remote,
                encap,
            }),
            Event::Local(LocalCommand::RekeyMigrate {
                local,
                remote,
                encap,
            }) => self.start_local_rekey(Some(MigrationTarget {
                local,
                remote,
                encap,
            })),
            Event::Local(cmd) => {
                self.ignore_local(&cmd);
                Ok(())
            }
            Event::InboundRequest {
                subtype: ExchangeSubtype::RekeyChild,
                payloads,
                ..
            } => {
                self.handle_remote_rekey(&payloads);
                Ok(())
            }
            Event::InboundRequest {
                subtype: ExchangeSubtype::DeleteChild,
                payloads,
                ..
            } => self.handle_idle_delete_request(&payloads),
            _ => {
                self.ignore_inbound(&event);
                Ok(())
            }
        }
    }

    fn handle_rekey_local_create(&mut self, event: Event) -> Result<()> {
        match event {
            Event::InboundResponse { payloads, .. } => self.handle_rekey_response(payloads),
            Event::InboundRequest {
                subtype: ExchangeSubtype::RekeyChild,
                ..
            } => {
                self.reply_temporary_failure();
                Ok(())
            }
            Event::InboundRequest {
                subtype: ExchangeSubtype::DeleteChild,
                payloads,
                ..
            } => {
                let current = self
                    .current
                    .as_ref()
                    .map(|c| (c.local_spi(), c.remote_spi()));
                match current {
                    Some((local_spi, remote_spi)) if deletes_spi(&payloads, remote_spi) => {
                        self.send(
                            ExchangeType::Informational,
                            true,
                            CreateChildHelper::delete_payloads(local_spi),
                        );
                        self.close_current_during_rekey();
                    }
                    _ => self.send(ExchangeType::Informational, true, Vec::new()),
                }
                Ok(())
            }
            Event::Local(cmd) => {
                self.ignore_local(&cmd);
                Ok(())
            }
            Event::Timer(_) => Ok(()),
        }
    }

    fn handle_rekey_local_delete(&mut self, event: Event) -> Result<()> {
        match event {
            Event::InboundResponse { .. } => {
                self.finish_local_rekey()?;
                self.enter_idle();
                Ok(())
            }
            Event::InboundRequest {
                subtype,
                exchange,
                payloads,
            } => {
                let new_remote = self.local_init_new.as_ref().map(ChildSaRecord::remote_spi);
                if let Some(spi) = new_remote.filter(|&s| names_spi(subtype, &payloads, s)) {
                    return self.defer_request(subtype, exchange, payloads, spi);
                }
                match subtype {
                    ExchangeSubtype::RekeyChild => self.reply_temporary_failure(),
                    // simultaneous delete of the old SA
                    ExchangeSubtype::DeleteChild => {
                        self.send(ExchangeType::Informational, true, Vec::new())
                    }
                }
                Ok(())
            }
            Event::Local(cmd) => {
                self.ignore_local(&cmd);
                Ok(())
            }
            Event::Timer(_) => Ok(()),
        }
    }

    fn handle_rekey_remote_delete(&mut self, event: Event) -> Result<()> {
        match event {
            Event::InboundRequest {
                subtype,
                exchange,
                payloads,
            } => {
                let new_remote = self.remote_init_new.as_ref().map(ChildSaRecord::remote_spi);
                if let Some(spi) = new_remote.filter(|&s| names_spi(subtype, &payloads, s)) {
                    return self.defer_request(subtype, exchange, payloads, spi);
                }

                let current = self
                    .current
                    .as_ref()
                    .map(|c| (c.local_spi(), c.remote_spi()));
                match (subtype, current) {
                    (ExchangeSubtype::DeleteChild, Some((local_spi, remote_spi)))
                        if deletes_spi(&payloads, remote_spi) =>
                    {
                        self.send(
                            ExchangeType::Informational,
                            true,
                            CreateChildHelper::delete_payloads(local_spi),
                        );
                        self.finish_remote_rekey()?;
                        self.enter_idle();
                    }
                    (ExchangeSubtype::DeleteChild, _) => {
                        self.send(ExchangeType::Informational, true, Vec::new())
                    }
                    (ExchangeSubtype::RekeyChild, _) => self.reply_temporary_failure(),
                }
                Ok(())
            }
            Event::Local(cmd) => {
                self.ignore_local(&cmd);
                Ok(())
            }
            _ => {
                self.ignore_inbound(&event);
                Ok(())
            }
        }
    }

    fn handle_delete_local_delete(&mut self, event: Event) -> Result<()> {
        match event {
            Event::InboundResponse { payloads, .. } => {
                if !payloads.deletes().is_empty() || self.simultaneous_delete {
                    self.close_session(None);
                } else {
                    self.close_session(Some(Error::InvalidSyntax(
                        "delete response carries no Delete payload".into(),
                    )));
                }
                Ok(())
            }
            Event::InboundRequest {
                subtype: ExchangeSubtype::DeleteChild,
                ..
            } => {
                self.send(ExchangeType::Informational, true, Vec::new());
                self.simultaneous_delete = true;
                Ok(())
            }
            Event::InboundRequest {
                subtype: ExchangeSubtype::RekeyChild,
                ..
            } => {
                self.reply_temporary_failure();
                Ok(())
            }
            Event::Local(cmd) => {
                self.ignore_local(&cmd);
                Ok(())
            }
            Event::Timer(_) => Ok(()),
        }
    }

    fn handle_timer(&mut self, timer: TimerEvent) -> Result<()> {
        match timer {
            TimerEvent::RekeyDeleteTimeout { generation } => {
                if self.state == ChildState::RekeyRemoteDelete
                    && generation == self.rekey_delete_generation
                {
                    debug!(
                        child_id = self.child_id,
                        "Peer did not delete the rekeyed Child SA in time"
                    );
                    self.finish_remote_rekey()?;
                    self.enter_idle();
                }
                Ok(())
            }
            TimerEvent::SoftLifetime {
                local_spi,
                generation,
            } => {
                let live = self.current.as_ref().map_or(false, |c| {
                    c.local_spi() == local_spi && c.scheduler().generation() == generation
                });
                if !live {
                    return Ok(());
                }
                if self.state == ChildState::Idle {
                    self.start_local_rekey(None)
                } else {
                    self.reschedule_current_rekey();
                    Ok(())
                }
            }
            TimerEvent::HardLifetime { local_spi } => {
                let live = self
                    .current
                    .as_ref()
                    .map_or(false, |c| c.local_spi() == local_spi);
                if !live {
                    return Ok(());
                }
                if self.state == ChildState::Idle {
                    self.start_local_delete()
                } else {
                    let at = self.deps.clock.now() + self.deps.timing.retry_interval;
                    self.timers.schedule(at, TimerEvent::HardLifetime { local_spi });
                    Ok(())
                }
            }
        }
    }

    // ---- create ----

    fn start_create(&mut self, ctx: IkeSaContext) -> Result<()> {
        let local_address = ctx.local_address;
        self.ike = Some(ctx);
        let local_spi = self.deps.spi_allocator.allocate_spi(local_address)?;

        let ke = match CreateChildHelper::create_request_dh_group(&self.params) {
            Some(group) => match self.deps.record_factory.key_exchange_payload(group) {
                Ok(ke) => Some(ke),
                Err(e) => {
                    self.deps.spi_allocator.release_spi(local_spi);
                    return Err(e);
                }
            },
            None => None,
        };

        let payloads = CreateChildHelper::create_request_payloads(local_spi, &self.params, ke);
        self.outstanding = Some(OutstandingRequest {
            kind: LocalRequestKind::CreateChild,
            payloads: payloads.clone(),
            local_spi: Some(local_spi),
            migration: None,
        });
        self.send(ExchangeType::CreateChildSa, false, payloads);
        self.transition_to(ChildState::CreateLocalCreate);
        Ok(())
    }

    fn adopt_first_child(
        &mut self,
        ctx: IkeSaContext,
        request: Vec<IkePayload>,
        response: Vec<IkePayload>,
    ) -> Result<()> {
        self.ike = Some(ctx);
        self.is_first_child = true;

        let local_spi = request
            .sa()
            .and_then(|sa| sa.proposals().first())
            .and_then(|p| p.spi)
            .ok_or_else(|| Error::InvalidSyntax("IKE_AUTH request carries no child SA".into()))?;

        self.outstanding = Some(OutstandingRequest {
            kind: LocalRequestKind::CreateChild,
            payloads: request,
            local_spi: Some(local_spi),
            migration: None,
        });
        self.handle_create_response(response)
    }

    fn handle_create_response(&mut self, response: Vec<IkePayload>) -> Result<()> {
        let outstanding = self
            .outstanding
            .take()
            .ok_or_else(|| Error::InvalidState("create response without request".into()))?;
        let local_spi = outstanding
            .local_spi
            .ok_or_else(|| Error::InvalidState("create request without SPI".into()))?;
        let kind = outstanding.kind;
        let request = outstanding.payloads;

        match CreateChildHelper::validate_response(&request, &response, self.params.is_transport)
        {
            CreateChildResult::Negotiated(child) => {
                self.deps.session_callback.spi_created(child.remote_spi);

                let built = self
                    .record_config(&child.proposal, local_spi, child.remote_spi, true)
                    .and_then(|config| {
                        self.deps
                            .record_factory
                            .make_sa_record(&request, &response, config)
                    });
                let record = match built {
                    Ok(record) => record,
                    Err(e) => {
                        self.deps.session_callback.spi_deleted(child.remote_spi);
                        self.deps.spi_allocator.release_spi(local_spi);
                        logging::log_unexpected_error(
                            self.child_id,
                            self.state.name(),
                            &e.to_string(),
                        );
                        self.fatal_close(e.wrap_internal());
                        return Ok(());
                    }
                };
                logging::log_child_sa_created(self.child_id, local_spi, child.remote_spi, true);

                let config = ChildSessionConfiguration::new(
                    child.local_ts.clone(),
                    child.remote_ts.clone(),
                    child.config_reply.as_ref(),
                );
                self.notify_user(vec![
                    UserNotice::TransformCreated(record.inbound_transform().clone()),
                    UserNotice::TransformCreated(record.outbound_transform().clone()),
                    UserNotice::Opened(config),
                ]);

                self.negotiated = Some(child.proposal);
                self.local_ts = child.local_ts;
                self.remote_ts = child.remote_ts;
                self.current = Some(record);
                self.arm_lifetime_timers();
                self.enter_idle();
                Ok(())
            }
            CreateChildResult::ErrorNotify(err) => {
                logging::log_error_notify(self.child_id, err.notify_type(), true);
                self.deps.spi_allocator.release_spi(local_spi);

                if err.is_fatal_for_create() || self.is_first_child {
                    self.fatal_close(err);
                } else {
                    self.deps.session_callback.schedule_retry(
                        LocalRequest::new(kind),
                        self.deps.timing.retry_interval,
                    );
                    self.deps.session_callback.procedure_finished();
                    self.transition_to(ChildState::Initial);
                }
                Ok(())
            }
            CreateChildResult::InvalidResponse { error, remote_spi } => {
                if let Some(spi) = remote_spi {
                    self.deps.session_callback.spi_created(spi);
                    self.deps.session_callback.spi_deleted(spi);
                }
                self.deps.spi_allocator.release_spi(local_spi);
                logging::log_unexpected_error(self.child_id, self.state.name(), &error.to_string());
                self.fatal_close(error);
                Ok(())
            }
        }
    }

    // ---- local rekey ----

    /// Proposal offered when rekeying
    ///
    /// A first child never negotiated D-H, so its configured counterpart
    /// supplies the groups.
    fn rekey_proposal(&self, negotiated: &Proposal) -> Proposal {
        if self.is_first_child && negotiated.dh_group().is_none() {
            if let Some(configured) = self
                .params
                .sa_proposals
                .iter()
                .find(|p| p.matches_ignoring_dh(negotiated))
            {
                return configured.clone();
            }
        }
        negotiated.clone()
    }

    fn start_local_rekey(&mut self, migration: Option<MigrationTarget>) -> Result<()> {
        let kind = if migration.is_some() {
            LocalRequestKind::MobikeRekey
        } else {
            LocalRequestKind::RekeyChild
        };
        let current_local_spi = self
            .current
            .as_ref()
            .map(ChildSaRecord::local_spi)
            .ok_or_else(|| Error::InvalidState("rekey without a Child SA".into()))?;
        let negotiated = self
            .negotiated
            .clone()
            .ok_or_else(|| Error::InvalidState("rekey without a negotiated proposal".into()))?;
        let local_address = match (&migration, &self.ike) {
            (Some(target), _) => target.local,
            (None, Some(ike)) => ike.local_address,
            (None, None) => return Err(Error::InvalidState("no IKE SA context".into())),
        };
        let proposal = self.rekey_proposal(&negotiated);

        let new_spi = match self.deps.spi_allocator.allocate_spi(local_address) {
            Ok(spi) => spi,
            Err(e) => return self.abort_local_rekey(migration.is_some(), e),
        };
        let ke = match proposal.dh_group() {
            Some(group) => match self.deps.record_factory.key_exchange_payload(group) {
                Ok(ke) => Some(ke),
                Err(e) => {
                    self.deps.spi_allocator.release_spi(new_spi);
                    return self.abort_local_rekey(migration.is_some(), e);
                }
            },
            None => None,
        };

        let payloads = CreateChildHelper::rekey_request_payloads(
            &proposal,
            new_spi,
            current_local_spi,
            &self.local_ts,
            &self.remote_ts,
            self.params.is_transport,
            ke,
        );
        logging::log_rekey_start(self.child_id, current_local_spi, true);

        let next = if migration.is_some() {
            ChildState::MobikeRekeyLocalCreate
        } else {
            ChildState::RekeyLocalCreate
        };
        self.outstanding = Some(OutstandingRequest {
            kind,
            payloads: payloads.clone(),
            local_spi: Some(new_spi),
            migration,
        });
        self.deleted_during_rekey = false;
        self.send(ExchangeType::CreateChildSa, false, payloads);
        self.transition_to(next);
        Ok(())
    }

    fn abort_local_rekey(&mut self, mobike: bool, err: Error) -> Result<()> {
        logging::log_unexpected_error(self.child_id, "rekey", &err.to_string());
        if mobike {
            self.mobike_fatal(err.wrap_internal());
        } else {
            self.reschedule_current_rekey();
            self.enter_idle();
        }
        Ok(())
    }

    fn handle_rekey_response(&mut self, response: Vec<IkePayload>) -> Result<()> {
        let outstanding = self
            .outstanding
            .take()
            .ok_or_else(|| Error::InvalidState("rekey response without request".into()))?;
        let new_spi = outstanding
            .local_spi
            .ok_or_else(|| Error::InvalidState("rekey request without SPI".into()))?;
        let migration = outstanding.migration;
        let kind = outstanding.kind;
        let request = outstanding.payloads;

        if self.deleted_during_rekey {
            // The old SA is gone and the user was told: only clean up
            self.deps.spi_allocator.release_spi(new_spi);
            self.close_session(None);
            return Ok(());
        }

        match CreateChildHelper::validate_response(&request, &response, self.params.is_transport)
        {
            CreateChildResult::Negotiated(child) => {
                self.deps.session_callback.spi_created(child.remote_spi);

                let built = self
                    .record_config(&child.proposal, new_spi, child.remote_spi, true)
                    .and_then(|mut config| {
                        if let Some(target) = &migration {
                            config.local_address = target.local;
                            config.remote_address = target.remote;
                            config.encap_socket = target.encap;
                        }
                        self.deps
                            .record_factory
                            .make_sa_record(&request, &response, config)
                    });
                let record = match built {
                    Ok(record) => record,
                    Err(e) => {
                        self.deps.session_callback.spi_deleted(child.remote_spi);
                        self.deps.spi_allocator.release_spi(new_spi);
                        logging::log_unexpected_error(
                            self.child_id,
                            self.state.name(),
                            &e.to_string(),
                        );
                        if migration.is_some() {
                            self.mobike_fatal(e.wrap_internal());
                        } else {
                            self.fatal_close(e.wrap_internal());
                        }
                        return Ok(());
                    }
                };
                logging::log_child_sa_created(self.child_id, new_spi, child.remote_spi, true);

                match &migration {
                    Some(target) => {
                        self.notify_user(vec![UserNotice::TransformsMigrated(
                            record.inbound_transform().clone(),
                            record.outbound_transform().clone(),
                        )]);
                        if let Some(ike) = self.ike.as_mut() {
                            ike.local_address = target.local;
                            ike.remote_address = target.remote;
                            ike.encap_socket = target.encap;
                        }
                        logging::log_migration(self.child_id, target.local, target.remote, false);
                    }
                    None => self.notify_user(vec![
                        UserNotice::TransformCreated(record.inbound_transform().clone()),
                        UserNotice::TransformCreated(record.outbound_transform().clone()),
                    ]),
                }

                self.pending_proposal = Some(child.proposal);
                self.local_ts = child.local_ts;
                self.remote_ts = child.remote_ts;
                self.local_init_new = Some(record);
                self.surviving = Some(SurvivingRecord::LocalInit);
                self.pending_migration = migration;

                let old_local_spi = self
                    .current
                    .as_ref()
                    .map(ChildSaRecord::local_spi)
                    .ok_or_else(|| Error::InvalidState("rekeyed SA disappeared".into()))?;
                let payloads = CreateChildHelper::delete_payloads(old_local_spi);
                self.outstanding = Some(OutstandingRequest {
                    kind: LocalRequestKind::DeleteChild,
                    payloads: payloads.clone(),
                    local_spi: None,
                    migration: None,
                });
                self.send(ExchangeType::Informational, false, payloads);
                self.transition_to(ChildState::RekeyLocalDelete);
                Ok(())
            }
            CreateChildResult::ErrorNotify(err) => {
                logging::log_error_notify(self.child_id, err.notify_type(), true);
                self.deps.spi_allocator.release_spi(new_spi);

                if migration.is_some() {
                    self.mobike_fatal(err);
                } else if err == Error::TemporaryFailure {
                    self.deps.session_callback.schedule_retry(
                        LocalRequest::new(kind),
                        self.deps.timing.retry_interval,
                    );
                    self.enter_idle();
                } else {
                    self.reschedule_current_rekey();
                    self.enter_idle();
                }
                Ok(())
            }
            CreateChildResult::InvalidResponse { error, remote_spi } => {
                if let Some(spi) = remote_spi {
                    self.deps.session_callback.spi_created(spi);
                    self.deps.session_callback.spi_deleted(spi);
                }
                self.deps.spi_allocator.release_spi(new_spi);
                logging::log_unexpected_error(self.child_id, self.state.name(), &error.to_string());

                if migration.is_some() {
                    self.mobike_fatal(error);
                } else {
                    self.fatal_close(error);
                }
                Ok(())
            }
        }
    }

    /// Peer deleted the SA being rekeyed before answering the rekey
    fn close_current_during_rekey(&mut self) {
        let mut notices = Vec::new();
        if let Some(current) = self.current.take() {
            notices.extend(self.retire_record(current, "deleted by peer during rekey"));
        }
        if !self.closed_notified {
            notices.push(UserNotice::Closed);
            self.closed_notified = true;
        }
        self.notify_user(notices);
        self.deleted_during_rekey = true;
    }

    fn finish_local_rekey(&mut self) -> Result<()> {
        let new = self.take_surviving()?;
        let mobike = self.pending_migration.take().is_some();

        if let Some(old) = self.current.take() {
            let old_local_spi = old.local_spi();
            let notices = self.retire_record(old, "rekeyed");
            // a MOBIKE rekey reported the move as a migration
            if !mobike {
                self.notify_user(notices);
            }
            logging::log_rekey_complete(self.child_id, old_local_spi, new.local_spi());
        }

        self.promote(new);
        Ok(())
    }

    // ---- remote rekey ----

    fn handle_remote_rekey(&mut self, request: &[IkePayload]) {
        if let Err(err) = self.accept_remote_rekey(request) {
            logging::log_error_notify(self.child_id, err.notify_type(), false);
            self.send(
                ExchangeType::CreateChildSa,
                true,
                CreateChildHelper::error_notify_payloads(&err),
            );
            self.enter_idle();
        }
    }

    fn accept_remote_rekey(&mut self, request: &[IkePayload]) -> Result<()> {
        let child_id = self.child_id;
        let refuse = move |e: Error| {
            logging::log_unexpected_error(child_id, "RekeyRemoteCreate", &e.to_string());
            Error::NoProposalChosen
        };

        let (current_local_spi, ike_dh_group, local_address) =
            match (&self.current, &self.ike) {
                (Some(current), Some(ike)) => {
                    (current.local_spi(), ike.ike_dh_group, ike.local_address)
                }
                _ => return Err(refuse(Error::InvalidState("no Child SA to rekey".into()))),
            };

        let chosen = CreateChildHelper::negotiate_rekey_request(
            request,
            &self.params.sa_proposals,
            ike_dh_group,
            &self.local_ts,
            &self.remote_ts,
        )?;
        let remote_spi = chosen
            .spi
            .ok_or_else(|| Error::InvalidSyntax("offered proposal has no SPI".into()))?;
        let (Some(ts_i), Some(ts_r)) = (request.ts_initiator(), request.ts_responder()) else {
            return Err(Error::InvalidSyntax("missing TS payload".into()));
        };

        let new_spi = self
            .deps
            .spi_allocator
            .allocate_spi(local_address)
            .map_err(refuse)?;
        self.deps.session_callback.spi_created(remote_spi);

        let built = self.build_remote_rekey(
            request,
            &chosen,
            (ts_i, ts_r),
            new_spi,
            remote_spi,
            current_local_spi,
        );
        let (response, record) = match built {
            Ok(built) => built,
            Err(e) => {
                self.deps.session_callback.spi_deleted(remote_spi);
                self.deps.spi_allocator.release_spi(new_spi);
                return Err(refuse(e));
            }
        };

        self.send(ExchangeType::CreateChildSa, true, response);
        logging::log_rekey_start(self.child_id, current_local_spi, false);
        logging::log_child_sa_created(self.child_id, new_spi, remote_spi, false);
        self.notify_user(vec![UserNotice::TransformCreated(
            record.inbound_transform().clone(),
        )]);

        self.local_ts = ts_r.selectors.clone();
        self.remote_ts = ts_i.selectors.clone();
        self.pending_proposal = Some(chosen);
        self.remote_init_new = Some(record);
        self.surviving = Some(SurvivingRecord::RemoteInit);
        self.enter_rekey_remote_delete();
        Ok(())
    }

    fn build_remote_rekey(
        &mut self,
        request: &[IkePayload],
        chosen: &Proposal,
        (ts_i, ts_r): (&TrafficSelectorsPayload, &TrafficSelectorsPayload),
        new_spi: u32,
        remote_spi: u32,
        current_local_spi: u32,
    ) -> Result<(Vec<IkePayload>, ChildSaRecord)> {
        let ke = match chosen.dh_group() {
            Some(group) => Some(self.deps.record_factory.key_exchange_payload(group)?),
            None => None,
        };
        let response = CreateChildHelper::rekey_response_payloads(
            chosen,
            new_spi,
            ts_i,
            ts_r,
            current_local_spi,
            self.params.is_transport,
            ke,
        );
        let config = self.record_config(chosen, new_spi, remote_spi, false)?;
        let record = self
            .deps
            .record_factory
            .make_sa_record(&response, request, config)?;
        Ok((response, record))
    }

    fn enter_rekey_remote_delete(&mut self) {
        self.rekey_delete_generation += 1;
        let at = self.deps.clock.now() + self.deps.timing.rekey_delete_timeout;
        self.timers.schedule(
            at,
            TimerEvent::RekeyDeleteTimeout {
                generation: self.rekey_delete_generation,
            },
        );
        self.transition_to(ChildState::RekeyRemoteDelete);
    }

    fn finish_remote_rekey(&mut self) -> Result<()> {
        let new = self.take_surviving()?;

        self.notify_user(vec![UserNotice::TransformCreated(
            new.outbound_transform().clone(),
        )]);
        if let Some(old) = self.current.take() {
            let old_local_spi = old.local_spi();
            let notices = self.retire_record(old, "rekeyed by peer");
            self.notify_user(notices);
            logging::log_rekey_complete(self.child_id, old_local_spi, new.local_spi());
        }

        self.promote(new);
        Ok(())
    }

    /// Take the new record named by `surviving`, retiring the other one
    fn take_surviving(&mut self) -> Result<ChildSaRecord> {
        let (kept, other) = match self.surviving.take() {
            Some(SurvivingRecord::LocalInit) => {
                (self.local_init_new.take(), self.remote_init_new.take())
            }
            Some(SurvivingRecord::RemoteInit) => {
                (self.remote_init_new.take(), self.local_init_new.take())
            }
            None => (None, None),
        };
        let kept = kept.ok_or_else(|| Error::InvalidState("no rekey in progress".into()))?;

        if let Some(redundant) = other {
            let notices = self.retire_record(redundant, "redundant rekey");
            self.notify_user(notices);
        }
        Ok(kept)
    }

    fn promote(&mut self, record: ChildSaRecord) {
        self.current = Some(record);
        if let Some(proposal) = self.pending_proposal.take() {
            self.negotiated = Some(proposal);
        }
        self.outstanding = None;
        self.arm_lifetime_timers();
    }

    // ---- delete ----

    fn start_local_delete(&mut self) -> Result<()> {
        let local_spi = self
            .current
            .as_ref()
            .map(ChildSaRecord::local_spi)
            .ok_or_else(|| Error::InvalidState("delete without a Child SA".into()))?;

        let payloads = CreateChildHelper::delete_payloads(local_spi);
        self.outstanding = Some(OutstandingRequest {
            kind: LocalRequestKind::DeleteChild,
            payloads: payloads.clone(),
            local_spi: None,
            migration: None,
        });
        self.simultaneous_delete = false;
        self.send(ExchangeType::Informational, false, payloads);
        self.transition_to(ChildState::DeleteLocalDelete);
        Ok(())
    }

    fn handle_idle_delete_request(&mut self, payloads: &[IkePayload]) -> Result<()> {
        let (local_spi, remote_spi) = self
            .current_spis()
            .ok_or_else(|| Error::InvalidState("idle without a Child SA".into()))?;

        if deletes_spi(payloads, remote_spi) {
            self.send(
                ExchangeType::Informational,
                true,
                CreateChildHelper::delete_payloads(local_spi),
            );
            self.close_session(None);
        } else {
            self.send(ExchangeType::Informational, true, Vec::new());
            self.enter_idle();
        }
        Ok(())
    }

    // ---- migration ----

    fn migrate(&mut self, target: MigrationTarget) -> Result<()> {
        let same_encap = self
            .ike
            .as_ref()
            .map_or(false, |ike| ike.encap_socket == target.encap);

        if same_encap && self.deps.migrator.supports_migration() {
            match self.migrate_in_kernel(target) {
                Ok(()) => {
                    logging::log_migration(self.child_id, target.local, target.remote, true);
                    self.enter_idle();
                    return Ok(());
                }
                Err(e) => warn!(
                    child_id = self.child_id,
                    error = %e,
                    "Kernel migration failed, rekeying instead"
                ),
            }
        }
        self.start_local_rekey(Some(target))
    }

    fn migrate_in_kernel(&mut self, target: MigrationTarget) -> Result<()> {
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| Error::InvalidState("migration without a Child SA".into()))?;

        self.deps
            .migrator
            .migrate_transform(current.inbound_transform(), target.remote, target.local)?;
        self.deps
            .migrator
            .migrate_transform(current.outbound_transform(), target.local, target.remote)?;
        current.migrate(target.local, target.remote);

        let notice = UserNotice::TransformsMigrated(
            current.inbound_transform().clone(),
            current.outbound_transform().clone(),
        );
        if let Some(ike) = self.ike.as_mut() {
            ike.local_address = target.local;
            ike.remote_address = target.remote;
        }
        self.notify_user(vec![notice]);
        Ok(())
    }

    /// A failed MOBIKE rekey takes the IKE SA down with it
    fn mobike_fatal(&mut self, err: Error) {
        self.send(
            ExchangeType::Informational,
            false,
            vec![IkePayload::D(DeletePayload::ike())],
        );
        self.deps.session_callback.fatal_ike_error(err);
        self.transition_to(ChildState::Idle);
    }

    // ---- shared ----

    fn record_config(
        &self,
        proposal: &Proposal,
        local_spi: u32,
        remote_spi: u32,
        local_init: bool,
    ) -> Result<SaRecordConfig> {
        let ike = self
            .ike
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no IKE SA context".into()))?;

        Ok(SaRecordConfig {
            local_spi,
            remote_spi,
            local_init,
            local_address: ike.local_address,
            remote_address: ike.remote_address,
            encap_socket: ike.encap_socket,
            prf: ike.prf,
            dh_group: proposal.dh_group(),
            sk_d: ike.sk_d.clone(),
            is_transport: self.params.is_transport,
            has_integrity: proposal.has_integrity(),
            lifetime: self.params.lifetime,
            created_at: self.deps.clock.now(),
        })
    }

    fn arm_lifetime_timers(&mut self) {
        if let Some(record) = &self.current {
            let scheduler = record.scheduler();
            self.timers.schedule(
                scheduler.rekey_at(),
                TimerEvent::SoftLifetime {
                    local_spi: record.local_spi(),
                    generation: scheduler.generation(),
                },
            );
            self.timers.schedule(
                scheduler.expire_at(),
                TimerEvent::HardLifetime {
                    local_spi: record.local_spi(),
                },
            );
        }
    }

    fn reschedule_current_rekey(&mut self) {
        let now = self.deps.clock.now();
        let delay = self.deps.timing.retry_interval;
        if let Some(record) = self.current.as_mut() {
            let generation = record.scheduler_mut().reschedule_rekey(now, delay);
            let at = record.scheduler().rekey_at();
            // past the hard deadline only the hard lifetime timer is left
            if at > now {
                self.timers.schedule(
                    at,
                    TimerEvent::SoftLifetime {
                        local_spi: record.local_spi(),
                        generation,
                    },
                );
            }
        }
    }

    fn defer_request(
        &mut self,
        subtype: ExchangeSubtype,
        exchange: ExchangeType,
        payloads: Vec<IkePayload>,
        spi: u32,
    ) -> Result<()> {
        logging::log_deferred_request(self.child_id, self.state.name(), spi);
        match self.state {
            ChildState::RekeyLocalDelete => self.finish_local_rekey()?,
            ChildState::RekeyRemoteDelete => self.finish_remote_rekey()?,
            _ => {}
        }
        self.deferred = Some(Event::InboundRequest {
            subtype,
            exchange,
            payloads,
        });
        self.transition_to(ChildState::IdleWithDeferredRequest);
        Ok(())
    }

    fn reply_temporary_failure(&mut self) {
        logging::log_error_notify(self.child_id, NotifyType::TemporaryFailure, false);
        self.send(
            ExchangeType::Informational,
            true,
            CreateChildHelper::error_notify_payloads(&Error::TemporaryFailure),
        );
    }

    /// Unregister, release and wipe a record, returning its deletion notices
    fn retire_record(&mut self, mut record: ChildSaRecord, reason: &str) -> Vec<UserNotice> {
        self.deps.session_callback.spi_deleted(record.remote_spi());
        self.deps.spi_allocator.release_spi(record.local_spi());
        logging::log_child_sa_deleted(self.child_id, record.local_spi(), record.remote_spi(), reason);

        let notices = vec![
            UserNotice::TransformDeleted(record.inbound_transform().clone()),
            UserNotice::TransformDeleted(record.outbound_transform().clone()),
        ];
        record.close();
        notices
    }

    fn take_records(&mut self) -> Vec<ChildSaRecord> {
        if let Some(spi) = self.outstanding.take().and_then(|o| o.local_spi) {
            self.deps.spi_allocator.release_spi(spi);
        }
        [
            self.current.take(),
            self.local_init_new.take(),
            self.remote_init_new.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Normal close: one task with every deletion and the terminal notice
    fn close_session(&mut self, error: Option<Error>) {
        let mut notices = Vec::new();
        for record in self.take_records() {
            notices.extend(self.retire_record(record, "deleted"));
        }
        if !self.closed_notified {
            notices.push(match error {
                Some(err) => UserNotice::ClosedWithException(err),
                None => UserNotice::Closed,
            });
            self.closed_notified = true;
        }
        if !notices.is_empty() {
            self.notify_user(notices);
        }
        self.finish_closed();
    }

    fn fatal_close(&mut self, err: Error) {
        self.shutdown(UserNotice::ClosedWithException(err));
    }

    /// Abrupt close: one task per record, then the terminal notice
    fn shutdown(&mut self, terminal: UserNotice) {
        for record in self.take_records() {
            let notices = self.retire_record(record, "session closed");
            self.notify_user(notices);
        }
        if !self.closed_notified {
            self.notify_user(vec![terminal]);
            self.closed_notified = true;
        }
        self.finish_closed();
    }

    fn finish_closed(&mut self) {
        self.surviving = None;
        self.pending_migration = None;
        self.deferred = None;
        self.queue.clear();
        self.timers.clear();
        self.deps.session_callback.procedure_finished();
        self.deps
            .session_callback
            .session_closed(self.deps.user_callback.clone());
        self.transition_to(ChildState::Closed);
    }

    fn enter_idle(&mut self) {
        self.deps.session_callback.procedure_finished();
        self.transition_to(ChildState::Idle);
    }

    fn transition_to(&mut self, next: ChildState) {
        if self.state != next {
            logging::log_child_state_transition(self.child_id, self.state.name(), next.name());
            self.state = next;
        }
    }

    fn ignore_local(&self, cmd: &LocalCommand) {
        logging::log_ignored_request(self.child_id, self.state.name(), cmd.name());
        if !self.state.is_busy() {
            self.deps.session_callback.procedure_finished();
        }
    }

    fn ignore_inbound(&self, event: &Event) {
        let what = match event {
            Event::InboundRequest { .. } => "request",
            Event::InboundResponse { .. } => "response",
            Event::Local(_) | Event::Timer(_) => "event",
        };
        warn!(
            child_id = self.child_id,
            state = self.state.name(),
            "Ignoring unexpected inbound {}",
            what
        );
    }

    fn send(&self, exchange: ExchangeType, is_response: bool, payloads: Vec<IkePayload>) {
        let names: Vec<String> = payloads
            .iter()
            .map(|p| format!("{:?}", p.payload_type()))
            .collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        logging::log_outbound(self.child_id, exchange, is_response, &names);
        self.deps
            .session_callback
            .send_outbound(exchange, is_response, payloads);
    }

    fn notify_user(&self, notices: Vec<UserNotice>) {
        let callback = self.deps.user_callback.clone();
        self.deps.executor.execute(Box::new(move || {
            for notice in notices {
                notice.deliver(callback.as_ref());
            }
        }));
    }
}

impl std::fmt::Debug for ChildSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSessionController")
            .field("child_id", &self.child_id)
            .field("state", &self.state)
            .field("current", &self.current)
            .field("surviving", &self.surviving)
            .field("pending_events", &self.queue.len())
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}
