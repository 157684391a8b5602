use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::TaskId;

/// Name under which the cancellation handle is visible to the payload.
pub const CANCEL_HANDLE_NAME: &str = "stop";

/// Names never reported back as bindings.
pub const RESERVED_NAMES: &[&str] = &[CANCEL_HANDLE_NAME, "__builtins__"];

/// Transmissible bindings of a finished unit.
pub type Bindings = serde_json::Map<String, serde_json::Value>;

/// A namespace entry as reported by an execution capability.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Value(serde_json::Value),
    Callable,
    Module,
    CancelHandle,
    /// Data without a JSON form, e.g. non-finite floats.
    Opaque(String),
}

pub type Namespace = BTreeMap<String, Binding>;

/// Failure raised while running a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub type_name: String,
    pub message: String,
    /// `repr` of each exception argument.
    pub args: Vec<String>,
}

impl ExecutionFailure {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            args,
        }
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = match self.args.as_slice() {
            [] => "()".to_string(),
            [single] => format!("({single},)"),
            many => format!("({})", many.join(", ")),
        };
        write!(f, "<class '{}'> {} {}", self.type_name, self.message, args)
    }
}

impl std::error::Error for ExecutionFailure {}

/// The external collaborator that actually runs payloads.
///
/// Implementations seed a fresh namespace with the cancellation handle under
/// [`CANCEL_HANDLE_NAME`], run the payload and return the final namespace.
pub trait ExecutionCapability: Send + Sync + 'static {
    fn execute(&self, payload: &str, cancel: &CancelToken) -> Result<Namespace, ExecutionFailure>;
}

impl<F> ExecutionCapability for F
where
    F: Fn(&str, &CancelToken) -> Result<Namespace, ExecutionFailure> + Send + Sync + 'static,
{
    fn execute(&self, payload: &str, cancel: &CancelToken) -> Result<Namespace, ExecutionFailure> {
        (self)(payload, cancel)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Completed { bindings: Bindings },
    Failed { message: String },
    TimedOut,
}

/// One run of a payload with its own cancellation token.
#[derive(Debug)]
pub struct ExecutionUnit {
    pub task_id: TaskId,
    pub payload: String,
    pub cancel: CancelToken,
}

impl ExecutionUnit {
    pub fn new(task_id: TaskId, payload: String) -> Self {
        Self {
            task_id,
            payload,
            cancel: CancelToken::new(),
        }
    }

    /// Runs the payload to completion. Never panics and never returns an error.
    pub fn run(&self, capability: &dyn ExecutionCapability) -> Outcome {
        tracing::trace!("Unit {} starting", self.task_id);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            capability.execute(&self.payload, &self.cancel)
        }));

        match result {
            Ok(Ok(namespace)) => Outcome::Completed {
                bindings: snapshot(self.task_id, namespace),
            },
            Ok(Err(failure)) => {
                tracing::trace!("Unit {} failed: {}", self.task_id, failure);
                Outcome::Failed {
                    message: failure.to_string(),
                }
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Unit {} panicked: {}", self.task_id, detail);
                let failure = ExecutionFailure::new(
                    "SystemError",
                    detail.clone(),
                    vec![format!("{detail:?}")],
                );
                Outcome::Failed {
                    message: failure.to_string(),
                }
            }
        }
    }
}

/// Keep only transmissible, non-reserved bindings.
fn snapshot(task_id: TaskId, namespace: Namespace) -> Bindings {
    namespace
        .into_iter()
        .filter_map(|(name, binding)| {
            if RESERVED_NAMES.contains(&name.as_str()) {
                return None;
            }
            match binding {
                Binding::Value(value) => Some((name, value)),
                Binding::Opaque(kind) => {
                    tracing::debug!("Unit {}: dropping `{}` ({} has no JSON form)", task_id, name, kind);
                    None
                }
                Binding::Callable | Binding::Module | Binding::CancelHandle => None,
            }
        })
        .collect()
}
