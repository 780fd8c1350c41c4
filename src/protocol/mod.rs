//! src/protocol/mod.rs
//! Byte-sniffing dispatch between SOCKS5 and HTTP CONNECT, then delegates
//! to the matching handler.

pub mod http_connect;
pub mod socks5;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::error::{ProxyError, Result};

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub enum DetectedProtocol {
    Socks5,
    /// Carries the 8 bytes already consumed from the stream while
    /// sniffing (`CONNECT` plus the byte following it) so the HTTP
    /// handler can reconstruct the full request line.
    HttpConnect(Vec<u8>),
}

/// Reads exactly one byte from the client within 2 seconds. `0x05`
/// selects SOCKS5 (the byte is the greeting's version byte; the handler
/// resumes parsing from the second greeting byte). Otherwise reads up to
/// 7 more bytes and matches against `CONNECT`; a match selects HTTP
/// CONNECT (the caller must treat `CONNECT` as already consumed from the
/// stream when reconstructing the request line). Anything else is a
/// protocol error and the caller must close the socket.
pub async fn dispatch<S>(stream: &mut S) -> Result<DetectedProtocol>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first_byte = tokio::time::timeout(DISPATCH_TIMEOUT, stream.read_u8())
        .await
        .map_err(|_| ProxyError::Timeout)??;

    if first_byte == 0x05 {
        return Ok(DetectedProtocol::Socks5);
    }

    let mut rest = [0u8; 7];
    tokio::time::timeout(DISPATCH_TIMEOUT, stream.read_exact(&mut rest))
        .await
        .map_err(|_| ProxyError::Timeout)?
        .map_err(|_| ProxyError::Protocol("short read during dispatch".into()))?;

    let mut buf = [0u8; 8];
    buf[0] = first_byte;
    buf[1..].copy_from_slice(&rest);

    if &buf[..7] == b"CONNECT" {
        Ok(DetectedProtocol::HttpConnect(buf.to_vec()))
    } else {
        Err(ProxyError::Protocol("unrecognized client greeting".into()))
    }
}
