use std::path::PathBuf;
use std::time::Duration;

use crate::script::DEFAULT_RECURSION_LIMIT;

/// Upper bound of the default grace period.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum Backend {
    /// In-process hosts on dedicated OS threads. A timed-out unit that ignores
    /// cancellation cannot be killed; its thread is detached and keeps running.
    #[default]
    Thread,
    /// Child processes running `evalbroker worker`, killed on timeout.
    Process,
}

/// Unit of the `timeout` field of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum TimeoutUnit {
    #[default]
    #[cfg_attr(feature = "clap", value(name = "ms"))]
    Millis,
    Seconds,
}

impl TimeoutUnit {
    /// Converts a wire timeout. `None` for non-positive, non-finite or
    /// unrepresentable values.
    pub fn to_duration(self, raw: f64) -> Option<Duration> {
        if !raw.is_finite() || raw <= 0.0 {
            return None;
        }
        let seconds = match self {
            TimeoutUnit::Millis => raw / 1000.0,
            TimeoutUnit::Seconds => raw,
        };
        Duration::try_from_secs_f64(seconds).ok()
    }
}

/// Program and arguments used to start a process host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct BrokerConfig {
    /// Where execution units run. Thread hosts cannot be force-killed, so a
    /// runaway unit is detached and keeps its thread; use `process` when timed
    /// out units must be stopped.
    #[cfg_attr(feature = "clap", arg(long, value_enum, default_value_t = Backend::Thread))]
    pub backend: Backend,

    /// Maximum number of concurrently busy hosts (unbounded when absent)
    #[cfg_attr(feature = "clap", arg(long))]
    pub max_hosts: Option<usize>,

    /// Hosts started before the first request is read
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 0))]
    pub min_idle: usize,

    /// Grace period after cooperative cancellation [default: min(timeout, 500)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub grace_ms: Option<u64>,

    /// How long in-flight requests may run after end of input
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 5000))]
    pub drain_timeout_ms: u64,

    /// How long a new host may take to report ready
    #[cfg_attr(feature = "clap", arg(long, default_value_t = 10_000))]
    pub startup_timeout_ms: u64,

    /// Unit of the request `timeout` field
    #[cfg_attr(feature = "clap", arg(long, value_enum, default_value_t = TimeoutUnit::Millis))]
    pub timeout_unit: TimeoutUnit,

    /// Maximum call depth of the built-in script capability
    #[cfg_attr(feature = "clap", arg(long, default_value_t = DEFAULT_RECURSION_LIMIT))]
    pub recursion_limit: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Thread,
            max_hosts: None,
            min_idle: 0,
            grace_ms: None,
            drain_timeout_ms: 5000,
            startup_timeout_ms: 10_000,
            timeout_unit: TimeoutUnit::Millis,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

impl BrokerConfig {
    pub fn grace_for(&self, timeout: Duration) -> Duration {
        match self.grace_ms {
            Some(ms) => Duration::from_millis(ms),
            None => timeout.min(DEFAULT_GRACE),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Arguments that start a worker matching this configuration.
    pub fn worker_args(&self) -> Vec<String> {
        vec![
            "worker".to_string(),
            "--recursion-limit".to_string(),
            self.recursion_limit.to_string(),
        ]
    }
}
