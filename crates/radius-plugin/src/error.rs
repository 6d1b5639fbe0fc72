//! Plugin error types

use crate::config::ConfigError;
use crate::ipc::ChannelError;
use crate::supervisor::{SupervisorError, WorkerKind};
use thiserror::Error;

/// Failure classes reported for a host event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required host-supplied attribute is absent
    MissingAttribute,
    /// I/O failure or protocol desync on a worker channel
    ChannelFault,
    /// The worker answered with a non-success status
    WorkerRejected,
    /// The port allocator has no free handles
    PoolExhausted,
    /// No session matched the event's key
    UnknownSession,
    /// The worker's handshake did not report success
    WorkerInitFailed,
    /// The worker did not answer within the configured timeout
    WorkerTimeout,
    /// Channel creation, fork or configuration failed during open
    Startup,
}

/// Plugin operation errors
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("missing required attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("{worker} worker channel fault: {source}")]
    Channel {
        worker: WorkerKind,
        #[source]
        source: ChannelError,
    },

    #[error("{0} worker rejected the request")]
    WorkerRejected(WorkerKind),

    #[error("no free port handles ({0} in use)")]
    PoolExhausted(usize),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("{0} worker failed to initialize")]
    WorkerInitFailed(WorkerKind),

    #[error("failed to start worker: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PluginError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PluginError::MissingAttribute(_) => ErrorKind::MissingAttribute,
            PluginError::Channel { source, .. } if source.is_timeout() => {
                ErrorKind::WorkerTimeout
            }
            PluginError::Channel { .. } => ErrorKind::ChannelFault,
            PluginError::WorkerRejected(_) => ErrorKind::WorkerRejected,
            PluginError::PoolExhausted(_) => ErrorKind::PoolExhausted,
            PluginError::UnknownSession(_) => ErrorKind::UnknownSession,
            PluginError::WorkerInitFailed(_) => ErrorKind::WorkerInitFailed,
            PluginError::Supervisor(_) | PluginError::Config(_) => ErrorKind::Startup,
        }
    }
}

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;
