use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

use crate::config::BrokerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::host::{HostFactory, ThreadHostFactory};
use crate::multiplexer::ResultMultiplexer;
use crate::pool::WorkerPool;
use crate::unit::ExecutionCapability;
use crate::Result;

/// Long-running broker: reads requests from `input` until end of input or
/// shutdown, writes one reply per accepted request to `output`.
pub struct Broker {
    config: BrokerConfig,
    factory: Arc<dyn HostFactory>,
}

impl Broker {
    pub fn new(config: BrokerConfig, factory: Arc<dyn HostFactory>) -> Self {
        Self { config, factory }
    }

    /// Broker running units on in-process thread hosts.
    pub fn threaded(config: BrokerConfig, capability: Arc<dyn ExecutionCapability>) -> Self {
        Self::new(config, Arc::new(ThreadHostFactory::new(capability)))
    }

    /// Serves until `input` ends or `shutdown` resolves, then drains in-flight
    /// requests for at most the configured drain timeout.
    ///
    /// Returns an error only when the broker could not start or the outbound
    /// channel broke.
    pub async fn run<R, W, S>(self, input: R, output: W, shutdown: S) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + 'static,
        S: Future<Output = ()>,
    {
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&self.factory),
            self.config.max_hosts,
            self.config.startup_timeout(),
        ));
        if let Err(err) = pool.warm_up(self.config.min_idle).await {
            tracing::error!("Failed to start worker hosts: {}", err);
            pool.shutdown();
            return Err(err);
        }

        let mux = Arc::new(ResultMultiplexer::new(output));
        let mut dispatcher = Dispatcher::new(self.config.clone(), Arc::clone(&pool), Arc::clone(&mux));

        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();
        tokio::pin!(shutdown);

        tracing::info!("Broker accepting requests ({:?} hosts)", self.config.backend);

        let mut result = loop {
            tokio::select! {
                read = reader.read_until(b'\n', &mut buf) => {
                    match read {
                        Ok(0) => {
                            tracing::info!("End of input");
                            break Ok(());
                        }
                        Ok(_) => {
                            let submitted = match std::str::from_utf8(&buf) {
                                Ok(line) => dispatcher.submit(line).await,
                                Err(_) => {
                                    let error = Error::MalformedRequest("line is not valid UTF-8".into());
                                    dispatcher.reject(None, error).await
                                }
                            };
                            buf.clear();
                            if let Err(err) = submitted {
                                break Err(err);
                            }
                        }
                        Err(err) => {
                            tracing::error!("Failed to read input: {}", err);
                            break Err(Error::IO(err));
                        }
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break Ok(());
                }
                err = mux.failed() => break Err(err),
            }
        };

        match &result {
            Ok(()) => dispatcher.drain(self.config.drain_timeout()).await,
            Err(err) => {
                tracing::error!("Broker stopping: {}", err);
                dispatcher.terminate_all().await;
            }
        }
        if result.is_ok() && mux.has_failed() {
            result = Err(mux.failed().await);
        }

        pool.shutdown();
        let stats = pool.stats();
        tracing::info!(
            "Broker stopped, {} hosts spawned, {} terminated",
            stats.spawned,
            stats.terminated
        );
        result
    }
}
