use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::protocol::{Reply, RequestId, TIMEOUT_MESSAGE};
use crate::unit::{Bindings, ExecutionFailure, Outcome};
use crate::{Result, TaskId};

type Writer = Pin<Box<dyn AsyncWrite + Send>>;

/// Serializes replies onto the outbound channel, one JSON object per line.
pub struct ResultMultiplexer {
    writer: tokio::sync::Mutex<Writer>,
    failed: CancelToken,
    failure: Mutex<Option<(io::ErrorKind, String)>>,
}

impl ResultMultiplexer {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            writer: tokio::sync::Mutex::new(Box::pin(writer)),
            failed: CancelToken::new(),
            failure: Mutex::new(None),
        }
    }

    /// Writes and flushes one reply. A write failure is fatal: it is returned
    /// as [`Error::Outbound`] and signalled through [`ResultMultiplexer::failed`].
    pub async fn emit(&self, reply: &Reply) -> Result<()> {
        let mut line = reply.to_line()?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        let written = match writer.write_all(line.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(err) => Err(err),
        };
        drop(writer);

        written.map_err(|err| {
            tracing::error!("Failed to write reply: {}", err);
            self.failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert_with(|| (err.kind(), err.to_string()));
            self.failed.cancel();
            Error::Outbound(err)
        })
    }

    pub fn has_failed(&self) -> bool {
        self.failed.is_cancelled()
    }

    /// Resolves once a write has failed.
    pub async fn failed(&self) -> Error {
        self.failed.cancelled().await;
        let (kind, message) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or((io::ErrorKind::Other, "outbound channel failed".to_string()));
        Error::Outbound(io::Error::new(kind, message))
    }
}

/// Ids of requests that have been accepted but not yet answered.
#[derive(Debug, Default)]
pub struct InFlight {
    ids: Mutex<HashSet<RequestId>>,
}

impl InFlight {
    /// Registers `id`; false when it is already in flight.
    pub fn insert(&self, id: RequestId) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    pub fn remove(&self, id: &RequestId) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Projects an outcome onto the reply for a request.
///
/// A requested binding named `id` is dropped only when the request carries an
/// id of its own, which the reply echoes under that key.
pub fn project(id: Option<RequestId>, outcome: Outcome, binding_names: &[String]) -> Reply {
    match outcome {
        Outcome::Completed { mut bindings } => {
            let mut projected = Bindings::new();
            for name in binding_names {
                if name == "id" && id.is_some() {
                    tracing::warn!("Dropping binding `id`, it would shadow the request id");
                    continue;
                }
                if let Some(value) = bindings.remove(name) {
                    projected.insert(name.clone(), value);
                }
            }
            Reply::bindings(id, projected)
        }
        Outcome::Failed { message } => Reply::exception(id, message),
        Outcome::TimedOut => Reply::exception(id, TIMEOUT_MESSAGE),
    }
}

/// The single reply owed to an accepted request.
///
/// [`ReplySlot::deliver`] consumes the slot. A slot dropped without delivery
/// still answers, with a failure reply.
pub struct ReplySlot {
    mux: Arc<ResultMultiplexer>,
    inflight: Arc<InFlight>,
    task_id: TaskId,
    id: Option<RequestId>,
    binding_names: Vec<String>,
    delivered: bool,
}

impl ReplySlot {
    pub fn new(
        mux: Arc<ResultMultiplexer>,
        inflight: Arc<InFlight>,
        task_id: TaskId,
        id: Option<RequestId>,
        binding_names: Vec<String>,
    ) -> Self {
        Self {
            mux,
            inflight,
            task_id,
            id,
            binding_names,
            delivered: false,
        }
    }

    pub async fn deliver(mut self, outcome: Outcome) -> Result<()> {
        self.delivered = true;
        let id = self.id.take();
        let reply = project(id.clone(), outcome, &self.binding_names);
        tracing::trace!("Replying to task {}", self.task_id);
        let written = self.mux.emit(&reply).await;
        release(&self.inflight, id.as_ref());
        written
    }
}

/// Frees a request id once its reply has left the outbound channel.
fn release(inflight: &InFlight, id: Option<&RequestId>) {
    if let Some(id) = id {
        inflight.remove(id);
    }
}

impl Drop for ReplySlot {
    fn drop(&mut self) {
        if self.delivered {
            return;
        }
        tracing::error!("Task {} ended without an outcome", self.task_id);

        let id = self.id.take();
        let message = "request ended without an outcome";
        let failure = ExecutionFailure::new("SystemError", message, vec![format!("'{message}'")]);
        let reply = Reply::exception(id.clone(), failure.to_string());
        let mux = Arc::clone(&self.mux);
        let inflight = Arc::clone(&self.inflight);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = mux.emit(&reply).await;
                    release(&inflight, id.as_ref());
                });
            }
            Err(_) => {
                tracing::error!("No runtime left to reply to task {}", self.task_id);
                release(&inflight, id.as_ref());
            }
        }
    }
}
