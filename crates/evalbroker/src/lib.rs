#![doc = include_str!("../README.md")]

pub mod broker;
pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod multiplexer;
pub mod pool;
pub mod protocol;
pub mod script;
mod supervisor;
pub mod unit;

pub use broker::Broker;
pub use cancel::CancelToken;
pub use config::{Backend, BrokerConfig, TimeoutUnit, WorkerCommand};
pub use error::{Error, Result};
pub use script::ScriptCapability;
pub use unit::{ExecutionCapability, ExecutionFailure, Outcome};

/// Identifier of one accepted request, used in logs and in the worker protocol.
pub type TaskId = uuid::Uuid;
