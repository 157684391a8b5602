//! Worker hosts: the isolated runtimes execution units run on.
//!
//! A host runs at most one unit at a time. Hosts are created by a
//! [`HostFactory`], handed out by the pool and either recycled or terminated
//! by the supervisor once their unit is done.

mod process;
mod thread;

pub use process::{serve_worker, ProcessHostFactory, FromWorker, ToWorker};
pub use thread::ThreadHostFactory;

use futures_util::future::BoxFuture;

use crate::unit::{ExecutionUnit, Outcome};
use crate::Result;

pub type HostId = u64;

/// Stack size of the threads that run execution units.
pub const UNIT_STACK_SIZE: usize = 64 * 1024 * 1024;

pub trait WorkerHost: Send + 'static {
    fn id(&self) -> HostId;

    /// Runs one unit to completion.
    ///
    /// Cancelling `unit.cancel` is forwarded to the running unit. Dropping
    /// the returned future leaves the host in an unknown state; the caller must
    /// terminate it afterwards.
    fn run(&mut self, unit: ExecutionUnit) -> BoxFuture<'_, Result<Outcome>>;

    /// Whether the host can be handed out again.
    fn is_healthy(&mut self) -> bool;

    /// Destroys the host without waiting for its current unit.
    fn terminate(self: Box<Self>);
}

pub trait HostFactory: Send + Sync + 'static {
    /// Starts a host and resolves once it has reported ready.
    fn spawn(&self, id: HostId) -> BoxFuture<'_, Result<Box<dyn WorkerHost>>>;
}
