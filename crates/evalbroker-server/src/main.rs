use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evalbroker::host::{serve_worker, HostFactory, ProcessHostFactory, ThreadHostFactory};
use evalbroker::script::DEFAULT_RECURSION_LIMIT;
use evalbroker::{Backend, Broker, BrokerConfig, ScriptCapability, WorkerCommand};

mod utils;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);

/// Runs script evaluations requested as JSON lines on stdin and answers on
/// stdout.
#[derive(Debug, Parser)]
#[command(version, args_conflicts_with_subcommands = true)]
pub struct App {
    #[command(subcommand)]
    pub mode: Option<Mode>,

    #[clap(flatten)]
    pub broker_args: BrokerConfig,
}

#[derive(Debug, Subcommand)]
pub enum Mode {
    /// Serve requests on stdin/stdout (the default)
    Serve(ServeArgs),
    /// Run units for a broker using the process backend
    Worker(WorkerArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[clap(flatten)]
    pub broker_args: BrokerConfig,
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Maximum call depth of the script capability
    #[arg(long, default_value_t = DEFAULT_RECURSION_LIMIT)]
    pub recursion_limit: usize,
}

fn init_tracing() {
    // stdout carries the protocol, logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evalbroker=info,evalbroker_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn serve(config: BrokerConfig) -> Result<ExitCode> {
    let factory: Arc<dyn HostFactory> = match config.backend {
        Backend::Thread => {
            let capability = ScriptCapability::new().with_recursion_limit(config.recursion_limit);
            Arc::new(ThreadHostFactory::new(Arc::new(capability)))
        }
        Backend::Process => Arc::new(ProcessHostFactory::new(WorkerCommand {
            program: std::env::current_exe()?,
            args: config.worker_args(),
        })),
    };

    let broker = Broker::new(config, factory);
    match broker
        .run(tokio::io::stdin(), tokio::io::stdout(), utils::shutdown_signal())
        .await
    {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            tracing::error!("Broker failed: {}", err);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn worker(args: WorkerArgs) -> Result<ExitCode> {
    utils::ignore_interrupts();

    let capability = ScriptCapability::new().with_recursion_limit(args.recursion_limit);
    serve_worker(
        Arc::new(capability),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;

    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    let args = App::parse();

    init_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let exit_code = runtime.block_on(async move {
        match args.mode {
            Some(Mode::Worker(worker_args)) => worker(worker_args).await,
            Some(Mode::Serve(serve_args)) => serve(serve_args.broker_args).await,
            None => serve(args.broker_args).await,
        }
    });

    // A pending read on stdin would otherwise hold the runtime open
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    exit_code
}
