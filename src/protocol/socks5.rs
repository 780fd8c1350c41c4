//! src/protocol/socks5.rs
//! RFC 1928 SOCKS5 for the `CONNECT` command only, with optional RFC 1929
//! username/password sub-negotiation.

use std::net::Ipv4Addr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::AuthConfig;
use crate::error::{ProxyError, Result};

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// RFC 1928 §6 reply codes.
#[derive(Debug, Clone, Copy)]
pub enum ReplyCode {
    Succeeded = 0x00,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

/// Runs the greeting and (if enabled) RFC 1929 auth, then parses the
/// request and returns the requested `(host, port)`. The caller is
/// responsible for later emitting the success/failure reply once a
/// runway (and hence bound address) is known.
pub async fn handle_request<S>(stream: &mut S, auth: &AuthConfig) -> Result<(String, u16)>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    negotiate_method(stream, auth).await?;
    parse_connect_request(stream).await
}

async fn negotiate_method<S>(stream: &mut S, auth: &AuthConfig) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let nmethods = stream.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await?;

    if !auth.enabled {
        stream.write_all(&[0x05, METHOD_NO_AUTH]).await?;
        return Ok(());
    }

    if !methods.contains(&METHOD_USER_PASS) {
        stream.write_all(&[0x05, METHOD_NONE_ACCEPTABLE]).await?;
        return Err(ProxyError::Auth);
    }

    stream.write_all(&[0x05, METHOD_USER_PASS]).await?;
    sub_negotiate(stream, auth).await
}

async fn sub_negotiate<S>(stream: &mut S, auth: &AuthConfig) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let ver = stream.read_u8().await?;
    if ver != 0x01 {
        return Err(ProxyError::Protocol("bad sub-negotiation version".into()));
    }
    let ulen = stream.read_u8().await? as usize;
    let mut uname = vec![0u8; ulen];
    stream.read_exact(&mut uname).await?;
    let plen = stream.read_u8().await? as usize;
    let mut passwd = vec![0u8; plen];
    stream.read_exact(&mut passwd).await?;

    let username = String::from_utf8_lossy(&uname).to_string();
    let password = String::from_utf8_lossy(&passwd).to_string();

    let ok = auth
        .users
        .get(&username)
        .map(|expected| expected == &password)
        .unwrap_or(false);

    if ok {
        stream.write_all(&[0x01, 0x00]).await?;
        Ok(())
    } else {
        stream.write_all(&[0x01, 0x01]).await?;
        Err(ProxyError::Auth)
    }
}

async fn parse_connect_request<S>(stream: &mut S) -> Result<(String, u16)>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [_ver, cmd, _rsv, atyp] = header;

    if cmd != CMD_CONNECT {
        write_reply(stream, ReplyCode::CommandNotSupported, Ipv4Addr::UNSPECIFIED, 0).await?;
        return Err(ProxyError::UnsupportedCommand);
    }

    let host = match atyp {
        ATYP_IPV4 => {
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await?;
            Ipv4Addr::from(buf).to_string()
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            String::from_utf8(buf)
                .map_err(|_| ProxyError::Protocol("invalid domain encoding".into()))?
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 16];
            stream.read_exact(&mut buf).await?;
            std::net::Ipv6Addr::from(buf).to_string()
        }
        _ => {
            write_reply(
                stream,
                ReplyCode::AddressTypeNotSupported,
                Ipv4Addr::UNSPECIFIED,
                0,
            )
            .await?;
            return Err(ProxyError::Protocol("unsupported address type".into()));
        }
    };

    let port = stream.read_u16().await?;
    Ok((host, port))
}

/// Writes a SOCKS5 reply: `VER REP RSV ATYP BND.ADDR BND.PORT`. Used both
/// for the final success reply (bound address = the selected runway's
/// interface IPv4, or `0.0.0.0`) and for failure replies.
pub async fn write_reply<S>(
    stream: &mut S,
    code: ReplyCode,
    bnd_addr: Ipv4Addr,
    bnd_port: u16,
) -> Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    let mut reply = Vec::with_capacity(10);
    reply.push(0x05);
    reply.push(code as u8);
    reply.push(0x00);
    reply.push(ATYP_IPV4);
    reply.extend_from_slice(&bnd_addr.octets());
    reply.extend_from_slice(&bnd_port.to_be_bytes());
    stream.write_all(&reply).await?;
    Ok(())
}
