//! src/error.rs
//! Error kinds shared across the protocol front-end, dialer, and control surface.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed")]
    Auth,

    #[error("unsupported command")]
    UnsupportedCommand,

    #[error("could not resolve host: {0}")]
    Resolution(String),

    #[error("no runway available")]
    NoRunwayAvailable,

    #[error("upstream proxy refused the connection")]
    UpstreamRefused,

    #[error("operation timed out")]
    Timeout,

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<tokio::time::error::Elapsed> for ProxyError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ProxyError::Timeout
    }
}
