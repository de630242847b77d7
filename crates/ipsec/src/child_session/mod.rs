//! Child SA session
//!
//! One [`ChildSessionController`] owns the Child SA pair negotiated under a
//! parent IKE SA and walks it through creation, rekey, migration and
//! deletion. Work arrives as events on a FIFO queue and only runs when the
//! owner calls [`ChildSessionController::dispatch_next`]. [`ChildSessionHandle`]
//! does that on a tokio task.
//!
//! - `state`: states, local commands, timer and queue events
//! - `callback`: ports to the parent session and to the application
//! - `record`: Child SA records, transforms and the key derivation seam
//! - `spi`: inbound SPI allocation
//! - `timer`: clocks and the delayed-message queue
//! - `helper`: CREATE_CHILD_SA payload building and validation
//! - `controller`: the state machine
//! - `driver`: tokio task running a controller

pub mod callback;
pub mod controller;
pub mod driver;
pub mod helper;
pub mod record;
pub mod spi;
pub mod state;
pub mod timer;

pub use callback::{
    ChildSessionConfiguration, ChildSessionUserCallback, InlineExecutor, LocalRequest,
    LocalRequestKind, SessionCallback, TaskExecutor,
};
pub use controller::{ChildSessionController, ChildSessionDeps};
pub use driver::{ChildCommand, ChildSessionHandle, TokioClock, TokioExecutor};
pub use helper::{CreateChildHelper, CreateChildResult, NegotiatedChild};
pub use record::{
    ChildSaRecord, Direction, EncapSocket, IpsecTransform, KeyDerivingFactory, KeyExchange,
    NoKernelMigration, NoKeyExchange, SaRecordConfig, SaRecordFactory, TransformMigrator,
};
pub use spi::{RandomSpiAllocator, SpiAllocator};
pub use state::{ChildState, IkeSaContext};
pub use timer::{Clock, ManualClock, SystemClock};
