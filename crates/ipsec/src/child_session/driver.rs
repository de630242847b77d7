//! Tokio driver for a child session controller
//!
//! [`ChildSessionHandle::spawn`] moves a controller onto its own task. The
//! task feeds [`ChildCommand`]s into the controller, sleeps until the next
//! timer deadline, and stops once the session is closed.

use super::callback::TaskExecutor;
use super::controller::ChildSessionController;
use super::record::EncapSocket;
use super::state::{ChildState, IkeSaContext};
use super::timer::Clock;
use crate::ikev2::constants::{ExchangeSubtype, ExchangeType};
use crate::ikev2::payload::IkePayload;
use crate::{Error, Result};
use fynx_platform::{FynxResult, SecurityModule};
use std::net::IpAddr;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Clock following tokio time, so paused test runtimes drive timers
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Executor running user notifications on a dedicated tokio task
///
/// Tasks run one after another in submission order.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    tx: mpsc::UnboundedSender<Task>,
}

impl TokioExecutor {
    /// Spawn the worker task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
            debug!("User notification executor stopped");
        });

        TokioExecutor { tx }
    }
}

impl TaskExecutor for TokioExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        if self.tx.send(task).is_err() {
            warn!("User notification dropped: executor stopped");
        }
    }
}

/// Messages accepted by a running child session
pub enum ChildCommand {
    /// See [`ChildSessionController::create_child_session`]
    Create(IkeSaContext),

    /// See [`ChildSessionController::handle_first_child_exchange`]
    FirstChild {
        /// IKE_AUTH request child payloads
        request: Vec<IkePayload>,
        /// IKE_AUTH response child payloads
        response: Vec<IkePayload>,
        /// IKE SA context
        ctx: IkeSaContext,
    },

    /// Rekey the Child SA
    Rekey,

    /// Delete the Child SA
    Delete,

    /// See [`ChildSessionController::perform_migration`]
    Migrate {
        /// New local address
        local: IpAddr,
        /// New remote address
        remote: IpAddr,
        /// New encapsulation socket
        encap: Option<EncapSocket>,
    },

    /// See [`ChildSessionController::perform_rekey_migration`]
    RekeyMigrate {
        /// New local address
        local: IpAddr,
        /// New remote address
        remote: IpAddr,
        /// New encapsulation socket
        encap: Option<EncapSocket>,
    },

    /// Inbound request from the peer
    Request {
        /// Child-level meaning
        subtype: ExchangeSubtype,
        /// Carrying exchange
        exchange: ExchangeType,
        /// Child payloads
        payloads: Vec<IkePayload>,
    },

    /// Inbound response from the peer
    Response {
        /// Carrying exchange
        exchange: ExchangeType,
        /// Child payloads
        payloads: Vec<IkePayload>,
    },

    /// Replace SK_d after an IKE SA rekey
    SetSkD(Vec<u8>),

    /// Report the state once every queued event was handled
    State(oneshot::Sender<ChildState>),

    /// Close immediately
    Kill,
}

impl ChildCommand {
    fn apply(self, controller: &mut ChildSessionController) {
        match self {
            ChildCommand::Create(ctx) => controller.create_child_session(ctx),
            ChildCommand::FirstChild {
                request,
                response,
                ctx,
            } => controller.handle_first_child_exchange(request, response, ctx),
            ChildCommand::Rekey => controller.rekey_child_session(),
            ChildCommand::Delete => controller.delete_child_session(),
            ChildCommand::Migrate {
                local,
                remote,
                encap,
            } => controller.perform_migration(local, remote, encap),
            ChildCommand::RekeyMigrate {
                local,
                remote,
                encap,
            } => controller.perform_rekey_migration(local, remote, encap),
            ChildCommand::Request {
                subtype,
                exchange,
                payloads,
            } => controller.receive_request(subtype, exchange, payloads),
            ChildCommand::Response { exchange, payloads } => {
                controller.receive_response(exchange, payloads)
            }
            ChildCommand::SetSkD(sk_d) => controller.set_sk_d(sk_d),
            ChildCommand::State(reply) => {
                controller.dispatch_all();
                let _ = reply.send(controller.state());
            }
            ChildCommand::Kill => controller.kill_session(),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

async fn run(mut controller: ChildSessionController, mut rx: mpsc::UnboundedReceiver<ChildCommand>) {
    let child_id = controller.child_id();
    debug!(child_id = child_id, "Child session task started");

    loop {
        controller.dispatch_all();
        if controller.state().is_terminal() {
            break;
        }

        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd.apply(&mut controller),
                None => {
                    // every handle is gone
                    controller.kill_session();
                    break;
                }
            },
            _ = sleep_until(controller.next_deadline()) => {}
        }
    }

    debug!(child_id = child_id, "Child session task stopped");
}

/// Handle to a child session running on a tokio task
pub struct ChildSessionHandle {
    child_id: u64,
    tx: mpsc::UnboundedSender<ChildCommand>,
    task_handle: Option<JoinHandle<()>>,
}

impl ChildSessionHandle {
    /// Run `controller` on a new task
    ///
    /// The controller should use [`TokioClock`] so its timers follow tokio time.
    pub fn spawn(controller: ChildSessionController) -> Self {
        let child_id = controller.child_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(controller, rx));

        ChildSessionHandle {
            child_id,
            tx,
            task_handle: Some(handle),
        }
    }

    /// Session tag
    pub fn child_id(&self) -> u64 {
        self.child_id
    }

    /// Queue a command
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` once the session task has stopped.
    pub fn send(&self, cmd: ChildCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| Error::InvalidState("child session task stopped".into()))
    }

    /// Start creating the Child SA
    pub fn create_child_session(&self, ctx: IkeSaContext) -> Result<()> {
        self.send(ChildCommand::Create(ctx))
    }

    /// Rekey the Child SA
    pub fn rekey_child_session(&self) -> Result<()> {
        self.send(ChildCommand::Rekey)
    }

    /// Delete the Child SA
    pub fn delete_child_session(&self) -> Result<()> {
        self.send(ChildCommand::Delete)
    }

    /// Forward a request from the peer
    pub fn receive_request(
        &self,
        subtype: ExchangeSubtype,
        exchange: ExchangeType,
        payloads: Vec<IkePayload>,
    ) -> Result<()> {
        self.send(ChildCommand::Request {
            subtype,
            exchange,
            payloads,
        })
    }

    /// Forward a response from the peer
    pub fn receive_response(&self, exchange: ExchangeType, payloads: Vec<IkePayload>) -> Result<()> {
        self.send(ChildCommand::Response { exchange, payloads })
    }

    /// Close the session now
    ///
    /// A stopped session is left alone.
    pub fn kill(&self) {
        let _ = self.tx.send(ChildCommand::Kill);
    }

    /// State after every command sent so far was handled
    ///
    /// A stopped task reports `Closed`.
    pub async fn state(&self) -> ChildState {
        let (reply, rx) = oneshot::channel();
        if self.send(ChildCommand::State(reply)).is_err() {
            return ChildState::Closed;
        }
        rx.await.unwrap_or(ChildState::Closed)
    }

    /// Whether the session task is still running
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Wait for the session task to stop
    pub async fn join(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                warn!(child_id = self.child_id, error = %e, "Child session task failed");
            }
        }
    }
}

impl SecurityModule for ChildSessionHandle {
    fn id(&self) -> &'static str {
        "ipsec-child-session"
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &'static str {
        "IKEv2 Child SA session"
    }

    fn shutdown(&mut self) -> FynxResult<()> {
        self.kill();
        Ok(())
    }
}
