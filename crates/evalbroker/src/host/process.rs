use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;

use crate::cancel::CancelToken;
use crate::config::WorkerCommand;
use crate::error::Error;
use crate::host::{HostFactory, HostId, WorkerHost, UNIT_STACK_SIZE};
use crate::unit::{ExecutionCapability, ExecutionFailure, ExecutionUnit, Outcome};
use crate::{Result, TaskId};

/// Messages from the broker to a worker process, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToWorker {
    Run { task_id: TaskId, payload: String },
    Cancel,
}

/// Messages from a worker process to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FromWorker {
    Ready,
    Outcome { outcome: Outcome },
}

async fn write_message<W, M>(writer: &mut W, message: &M) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Host backed by a child process running `evalbroker worker`.
pub struct ProcessHost {
    id: HostId,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    broken: bool,
}

impl ProcessHost {
    async fn read_message(&mut self) -> anyhow::Result<FromWorker> {
        let line = self
            .stdout
            .next_line()
            .await
            .context("reading from worker")?
            .context("worker closed its output")?;
        serde_json::from_str(&line).with_context(|| format!("decoding worker message {line:?}"))
    }

    async fn exchange(&mut self, unit: ExecutionUnit) -> anyhow::Result<Outcome> {
        let cancel = unit.cancel.clone();
        let run = ToWorker::Run {
            task_id: unit.task_id,
            payload: unit.payload,
        };
        write_message(&mut self.stdin, &run)
            .await
            .context("sending unit to worker")?;

        let mut cancel_sent = false;
        loop {
            tokio::select! {
                message = self.read_message() => match message? {
                    FromWorker::Outcome { outcome } => return Ok(outcome),
                    FromWorker::Ready => tracing::warn!("Process host {} repeated its handshake", self.id),
                },
                _ = cancel.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    write_message(&mut self.stdin, &ToWorker::Cancel)
                        .await
                        .context("forwarding cancellation to worker")?;
                }
            }
        }
    }

    async fn run_unit(&mut self, unit: ExecutionUnit) -> Result<Outcome> {
        let task_id = unit.task_id;
        self.exchange(unit).await.map_err(|err| {
            self.broken = true;
            tracing::error!("Process host {} failed on task {}: {:#}", self.id, task_id, err);
            Error::HostFailure(self.id, format!("{err:#}"))
        })
    }
}

impl WorkerHost for ProcessHost {
    fn id(&self) -> HostId {
        self.id
    }

    fn run(&mut self, unit: ExecutionUnit) -> BoxFuture<'_, Result<Outcome>> {
        self.run_unit(unit).boxed()
    }

    fn is_healthy(&mut self) -> bool {
        !self.broken && matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(self: Box<Self>) {
        let ProcessHost { id, mut child, .. } = *self;
        tracing::trace!("Killing process host {} (pid {:?})", id, child.id());
        if let Err(err) = child.start_kill() {
            tracing::warn!("Failed to kill process host {}: {}", id, err);
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = child.wait().await;
            });
        }
    }
}

pub struct ProcessHostFactory {
    command: WorkerCommand,
}

impl ProcessHostFactory {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }

    async fn start(&self, id: HostId) -> Result<Box<dyn WorkerHost>> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let failure = |message: &str| Error::HostFailure(id, message.to_string());
        let stdin = child.stdin.take().ok_or_else(|| failure("no stdin from worker"))?;
        let stdout = child.stdout.take().ok_or_else(|| failure("no stdout from worker"))?;

        let mut host = ProcessHost {
            id,
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            broken: false,
        };

        match host.read_message().await {
            Ok(FromWorker::Ready) => {}
            Ok(other) => return Err(failure(&format!("expected ready, got {other:?}"))),
            Err(err) => return Err(failure(&format!("{err:#}"))),
        }
        tracing::trace!("Process host {} (pid {:?}) ready", id, host.child.id());

        Ok(Box::new(host))
    }
}

impl HostFactory for ProcessHostFactory {
    fn spawn(&self, id: HostId) -> BoxFuture<'_, Result<Box<dyn WorkerHost>>> {
        self.start(id).boxed()
    }
}

struct RunningUnit {
    task_id: TaskId,
    cancel: CancelToken,
    outcome_rx: oneshot::Receiver<Outcome>,
}

impl RunningUnit {
    fn start(
        task_id: TaskId,
        payload: String,
        capability: Arc<dyn ExecutionCapability>,
    ) -> anyhow::Result<Self> {
        let unit = ExecutionUnit::new(task_id, payload);
        let cancel = unit.cancel.clone();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name(format!("unit-{task_id}"))
            .stack_size(UNIT_STACK_SIZE)
            .spawn(move || {
                let _ = outcome_tx.send(unit.run(capability.as_ref()));
            })
            .context("starting unit thread")?;

        Ok(Self {
            task_id,
            cancel,
            outcome_rx,
        })
    }
}

async fn next_outcome(current: &mut Option<RunningUnit>) -> Outcome {
    match current {
        Some(running) => match (&mut running.outcome_rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let message = "unit thread exited without an outcome";
                Outcome::Failed {
                    message: ExecutionFailure::new("SystemError", message, vec![format!("'{message}'")])
                        .to_string(),
                }
            }
        },
        None => std::future::pending().await,
    }
}

/// Worker side of a process host.
///
/// Announces readiness on `output`, then runs one unit per `run` command on a
/// dedicated thread. Returns when `input` reaches end of file.
pub async fn serve_worker<R, W>(
    capability: Arc<dyn ExecutionCapability>,
    input: R,
    mut output: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut current: Option<RunningUnit> = None;

    write_message(&mut output, &FromWorker::Ready).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading worker input")? else {
                    if let Some(running) = &current {
                        running.cancel.cancel();
                    }
                    tracing::debug!("Worker input closed");
                    return Ok(());
                };

                match serde_json::from_str::<ToWorker>(&line).context("decoding worker command")? {
                    ToWorker::Run { task_id, payload } => {
                        if let Some(running) = &current {
                            anyhow::bail!(
                                "received task {} while task {} is running",
                                task_id,
                                running.task_id
                            );
                        }
                        tracing::trace!("Worker starting task {}", task_id);
                        current = Some(RunningUnit::start(task_id, payload, Arc::clone(&capability))?);
                    }
                    ToWorker::Cancel => {
                        if let Some(running) = &current {
                            tracing::trace!("Worker cancelling task {}", running.task_id);
                            running.cancel.cancel();
                        }
                    }
                }
            }
            outcome = next_outcome(&mut current) => {
                current = None;
                write_message(&mut output, &FromWorker::Outcome { outcome }).await?;
            }
        }
    }
}
