use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::BrokerConfig;
use crate::error::Error;
use crate::multiplexer::{InFlight, ReplySlot, ResultMultiplexer};
use crate::pool::WorkerPool;
use crate::protocol::{Reply, Request, RequestId};
use crate::supervisor::{self, Supervision};
use crate::unit::{ExecutionUnit, Outcome};
use crate::Result;

/// Turns inbound lines into supervised execution units.
///
/// `submit` never waits for a request to finish; it only suspends while a
/// capped pool has no free host.
pub struct Dispatcher {
    config: BrokerConfig,
    pool: Arc<WorkerPool>,
    mux: Arc<ResultMultiplexer>,
    inflight: Arc<InFlight>,
    force: CancelToken,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(config: BrokerConfig, pool: Arc<WorkerPool>, mux: Arc<ResultMultiplexer>) -> Self {
        Self {
            config,
            pool,
            mux,
            inflight: Arc::new(InFlight::default()),
            force: CancelToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Handles one inbound line. Only fatal errors are returned.
    pub async fn submit(&mut self, line: &str) -> Result<()> {
        self.reap();

        if line.trim().is_empty() {
            return Ok(());
        }

        let request = match Request::parse(line, self.config.timeout_unit) {
            Ok(request) => request,
            Err(rejected) => return self.reject(rejected.id, rejected.error).await,
        };

        if let Some(id) = &request.id {
            if !self.inflight.insert(id.clone()) {
                return self
                    .reject(Some(id.clone()), Error::DuplicateRequestId(id.to_string()))
                    .await;
            }
        }

        let task_id = Uuid::new_v4();
        tracing::trace!(
            "Accepted request {} as task {}",
            request
                .id
                .as_ref()
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
            task_id
        );

        let slot = ReplySlot::new(
            Arc::clone(&self.mux),
            Arc::clone(&self.inflight),
            task_id,
            request.id,
            request.binding_names,
        );

        let host = match self.pool.acquire().await {
            Ok(host) => host,
            Err(err) => {
                tracing::error!("No host for task {}: {}", task_id, err);
                return slot
                    .deliver(Outcome::Failed {
                        message: err.to_string(),
                    })
                    .await;
            }
        };

        let pool = Arc::clone(&self.pool);
        let force = self.force.clone();
        let supervision = Supervision {
            timeout: request.timeout,
            grace: self.config.grace_for(request.timeout),
        };
        let unit = ExecutionUnit::new(task_id, request.payload);

        self.tasks.spawn(async move {
            let outcome = supervisor::supervise(&pool, host, unit, supervision, &force).await;
            if let Err(err) = slot.deliver(outcome).await {
                tracing::error!("Reply for task {} was lost: {}", task_id, err);
            }
        });
        Ok(())
    }

    /// Answers a line that will not be run.
    pub(crate) async fn reject(&self, id: Option<RequestId>, error: Error) -> Result<()> {
        tracing::warn!("Rejecting request: {}", error);
        self.mux.emit(&Reply::exception(id, error.to_string())).await
    }

    // Collects tasks that have already finished.
    fn reap(&mut self) {
        while let Some(Some(result)) = self.tasks.join_next().now_or_never() {
            if let Err(err) = result {
                tracing::error!("Request task failed: {}", err);
            }
        }
    }

    /// Waits up to `timeout` for in-flight requests, then forces the rest to
    /// time out. Every request has been answered when this returns.
    pub async fn drain(&mut self, timeout: Duration) {
        if !self.tasks.is_empty() {
            tracing::info!("Draining {} in-flight requests", self.tasks.len());
        }

        let drained = tokio::time::timeout(timeout, self.join_all()).await;
        if drained.is_err() {
            tracing::warn!(
                "{} requests still running after {}ms, terminating them",
                self.tasks.len(),
                timeout.as_millis()
            );
            self.terminate_all().await;
        }
    }

    /// Forces every in-flight request down immediately.
    pub async fn terminate_all(&mut self) {
        self.force.cancel();
        self.join_all().await;
    }

    async fn join_all(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                tracing::error!("Request task failed: {}", err);
            }
        }
    }
}
