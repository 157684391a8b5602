use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::Error;
use crate::host::{HostFactory, HostId, WorkerHost};
use crate::unit::{ExecutionUnit, Outcome};
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub spawned: usize,
    pub idle: usize,
    pub terminated: usize,
}

/// A host checked out of the pool.
///
/// Holds the capacity slot of a capped pool until it is released, terminated
/// or dropped.
pub struct PooledHost {
    host: Box<dyn WorkerHost>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PooledHost {
    pub fn id(&self) -> HostId {
        self.host.id()
    }

    pub async fn run(&mut self, unit: ExecutionUnit) -> Result<Outcome> {
        self.host.run(unit).await
    }
}

/// Growable set of worker hosts.
///
/// Idle hosts live under their own mutex. New hosts are spawned when none is
/// idle; with `max_hosts` set, [`WorkerPool::acquire`] waits for a free slot.
pub struct WorkerPool {
    factory: Arc<dyn HostFactory>,
    idle: Mutex<Vec<Box<dyn WorkerHost>>>,
    slots: Option<Arc<Semaphore>>,
    max_hosts: Option<usize>,
    startup_timeout: Duration,
    next_id: AtomicU64,
    spawned: AtomicUsize,
    terminated: AtomicUsize,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        factory: Arc<dyn HostFactory>,
        max_hosts: Option<usize>,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            idle: Mutex::new(Vec::new()),
            slots: max_hosts.map(|max| Arc::new(Semaphore::new(max))),
            max_hosts,
            startup_timeout,
            next_id: AtomicU64::new(1),
            spawned: AtomicUsize::new(0),
            terminated: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn WorkerHost>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn spawn_host(&self) -> Result<Box<dyn WorkerHost>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Spawning host {}", id);

        let host = tokio::time::timeout(self.startup_timeout, self.factory.spawn(id))
            .await
            .map_err(|_| Error::HostStartupTimeout(id))?
            .map_err(|err| {
                tracing::error!("Host {} failed to start: {}", id, err);
                err
            })?;

        self.spawned.fetch_add(1, Ordering::Relaxed);
        Ok(host)
    }

    /// Checks out an idle host or spawns a new one. Waits only when the pool
    /// is capped and every slot is taken.
    pub async fn acquire(&self) -> Result<PooledHost> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }
        let permit = match &self.slots {
            Some(slots) => Some(
                Arc::clone(slots)
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::PoolClosed)?,
            ),
            None => None,
        };

        let idle = self.idle().pop();
        let host = match idle {
            Some(host) => host,
            None => self.spawn_host().await?,
        };
        tracing::trace!("Acquired host {}", host.id());

        Ok(PooledHost {
            host,
            _permit: permit,
        })
    }

    /// Returns a host to the idle set, or tears it down when it is no longer
    /// healthy.
    pub fn release(&self, pooled: PooledHost) {
        let PooledHost { mut host, _permit } = pooled;
        if self.is_closed() {
            self.destroy(host);
        } else if host.is_healthy() {
            tracing::trace!("Released host {}", host.id());
            self.idle().push(host);
        } else {
            tracing::warn!("Host {} is unhealthy, discarding it", host.id());
            self.destroy(host);
        }
    }

    /// Unconditionally destroys a host and frees its slot.
    pub fn terminate(&self, pooled: PooledHost) {
        let PooledHost { host, _permit } = pooled;
        tracing::trace!("Terminating host {}", host.id());
        self.destroy(host);
    }

    fn destroy(&self, host: Box<dyn WorkerHost>) {
        host.terminate();
        self.terminated.fetch_add(1, Ordering::Relaxed);
    }

    /// Starts hosts until `count` are idle, bounded by `max_hosts`.
    pub async fn warm_up(&self, count: usize) -> Result<()> {
        let target = self.max_hosts.map_or(count, |max| count.min(max));
        while self.idle().len() < target {
            let host = self.spawn_host().await?;
            self.idle().push(host);
        }
        if target > 0 {
            tracing::info!("Warmed up {} hosts", target);
        }
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            spawned: self.spawned.load(Ordering::Relaxed),
            idle: self.idle().len(),
            terminated: self.terminated.load(Ordering::Relaxed),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Terminates every idle host. Hosts released afterwards are terminated
    /// too, and waiters of a capped pool fail with [`Error::PoolClosed`].
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(slots) = &self.slots {
            slots.close();
        }
        let idle = std::mem::take(&mut *self.idle());
        for host in idle {
            self.destroy(host);
        }
    }
}
