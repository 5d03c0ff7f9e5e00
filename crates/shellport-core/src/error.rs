use thiserror::Error;

/// Errors produced by the shellport connection layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout")]
    Timeout,

    #[error("transport closed")]
    Closed,

    #[error("send queue full")]
    QueueFull,

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        LinkError::Io(e.to_string())
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
