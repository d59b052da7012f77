//! Server error types.

use std::net::SocketAddr;

use sliceway_http::StatusCode;
use thiserror::Error;

/// Errors raised while binding, configuring or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("accept loop terminated abnormally: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Errors from reading requests off, or writing responses onto, a socket.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("response already ended")]
    Ended,

    #[error("connection closed")]
    Closed,

    #[error("response already committed")]
    Committed,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Errors resolved through a response [`Completion`](sliceway_http::Completion).
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("a terminal response was already accepted for this exchange")]
    AlreadyResponded,

    #[error("status {0} is not a terminal status")]
    NonTerminalStatus(StatusCode),

    #[error("response body failed")]
    Body(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("response task aborted: {0}")]
    Aborted(String),
}

impl BridgeError {
    pub(crate) fn body(err: anyhow::Error) -> Self {
        Self::Body(err.into())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
