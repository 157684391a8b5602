use std::sync::Arc;
use std::thread::JoinHandle;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::Error;
use crate::host::{HostFactory, HostId, WorkerHost, UNIT_STACK_SIZE};
use crate::unit::{ExecutionCapability, ExecutionUnit, Outcome};
use crate::Result;

/// Host command
pub(crate) enum Command {
    Append(QueueEntry),
    Stop,
}

/// Queue entry
pub(crate) struct QueueEntry {
    pub unit: ExecutionUnit,

    /// Outcome sender
    pub response_tx: oneshot::Sender<Outcome>,

    /// Instant when this entry was queued
    pub queue_time: Instant,
}

impl QueueEntry {
    pub fn new(unit: ExecutionUnit, response_tx: oneshot::Sender<Outcome>) -> Self {
        Self {
            unit,
            response_tx,
            queue_time: Instant::now(),
        }
    }
}

/// In-process host backed by a dedicated OS thread.
///
/// Threads cannot be killed: terminating a busy host detaches its thread,
/// which exits once the capability returns.
pub struct ThreadHost {
    id: HostId,
    tx: UnboundedSender<Command>,
    join_handle: JoinHandle<()>,
}

impl ThreadHost {
    async fn run_unit(&mut self, unit: ExecutionUnit) -> Result<Outcome> {
        let task_id = unit.task_id;
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(Command::Append(QueueEntry::new(unit, response_tx)))
            .map_err(|_| Error::HostFailure(self.id, "host thread has stopped".into()))?;

        response_rx
            .await
            .map_err(|_| Error::HostFailure(self.id, format!("host thread dropped task {task_id}")))
    }
}

impl WorkerHost for ThreadHost {
    fn id(&self) -> HostId {
        self.id
    }

    fn run(&mut self, unit: ExecutionUnit) -> BoxFuture<'_, Result<Outcome>> {
        self.run_unit(unit).boxed()
    }

    fn is_healthy(&mut self) -> bool {
        !self.tx.is_closed() && !self.join_handle.is_finished()
    }

    fn terminate(self: Box<Self>) {
        tracing::trace!("Detaching thread host {}", self.id);
        let _ = self.tx.send(Command::Stop);
    }
}

pub struct ThreadHostFactory {
    capability: Arc<dyn ExecutionCapability>,
}

impl ThreadHostFactory {
    pub fn new(capability: Arc<dyn ExecutionCapability>) -> Self {
        Self { capability }
    }

    async fn start(&self, id: HostId) -> Result<Box<dyn WorkerHost>> {
        let (tx, rx) = unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let capability = Arc::clone(&self.capability);

        let join_handle = std::thread::Builder::new()
            .name(format!("worker-host-{id}"))
            .stack_size(UNIT_STACK_SIZE)
            .spawn(move || {
                // Create a new Runtime to receive commands
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        tracing::error!("Thread host {} failed to start: {}", id, err);
                        return;
                    }
                };
                let _ = ready_tx.send(());
                runtime.block_on(queue_task(id, rx, capability))
            })?;

        ready_rx
            .await
            .map_err(|_| Error::HostFailure(id, "thread exited before reporting ready".into()))?;
        tracing::trace!("Thread host {} ready", id);

        Ok(Box::new(ThreadHost {
            id,
            tx,
            join_handle,
        }))
    }
}

impl HostFactory for ThreadHostFactory {
    fn spawn(&self, id: HostId) -> BoxFuture<'_, Result<Box<dyn WorkerHost>>> {
        self.start(id).boxed()
    }
}

// Runs queued units one after the other until stopped
async fn queue_task(
    id: HostId,
    mut receiver: UnboundedReceiver<Command>,
    capability: Arc<dyn ExecutionCapability>,
) {
    'main: while let Some(cmd) = receiver.recv().await {
        use Command::*;

        match cmd {
            Append(entry) => {
                tracing::trace!(
                    "Host {} running task {}, queued {}ms ago",
                    id,
                    entry.unit.task_id,
                    entry.queue_time.elapsed().as_millis()
                );

                let outcome = entry.unit.run(capability.as_ref());

                if entry.response_tx.send(outcome).is_ok() {
                    tracing::trace!("Host {} finished task {}", id, entry.unit.task_id)
                } else {
                    tracing::trace!(
                        "Host {}: task {} finished after its supervisor gave up",
                        id,
                        entry.unit.task_id
                    )
                }
            }
            Stop => {
                tracing::trace!("Stopping thread host {}", id);
                break 'main;
            }
        }
    }
}
