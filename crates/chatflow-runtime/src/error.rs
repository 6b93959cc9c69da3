//! Runtime errors.

use chatflow_core::RegistryError;
use chatflow_framework::DispatchError;
use chatflow_transport::TransportError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::queue::QueueError;

/// Errors raised while building or running a [`ChatflowRuntime`](crate::ChatflowRuntime).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
