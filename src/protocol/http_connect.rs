//! src/protocol/http_connect.rs
//! HTTP/1.1 CONNECT front-end, with optional `Proxy-Authorization: Basic`.

use std::collections::HashMap;

use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::AuthConfig;
use crate::error::{ProxyError, Result};

const MAX_LINE_LEN: usize = 8192;
const MAX_HEADERS: usize = 64;
const DEFAULT_PORT: u16 = 443;

/// Parses the request line and headers, enforcing Basic auth when
/// enabled, and returns the requested `(host, port)`. `prefix` is the
/// bytes the dispatcher already consumed from the stream while sniffing
/// (`CONNECT` plus the following byte); the request line is reconstructed
/// as `prefix + rest-of-line-read-here`.
pub async fn handle_request<S>(
    stream: &mut S,
    prefix: Vec<u8>,
    auth: &AuthConfig,
) -> Result<(String, u16)>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let request_line = read_line(stream, prefix).await?;
    let (method, target) = parse_request_line(&request_line)?;

    if method != "CONNECT" {
        return Err(ProxyError::UnsupportedCommand);
    }

    let headers = read_headers(stream).await?;

    if auth.enabled {
        authorize(&headers, auth)?;
    }

    parse_target(&target)
}

fn parse_request_line(line: &str) -> Result<(String, String)> {
    let tokens: Vec<&str> = line.trim_end().split(' ').collect();
    if tokens.len() != 3 {
        return Err(ProxyError::Protocol("malformed request line".into()));
    }
    Ok((tokens[0].to_string(), tokens[1].to_string()))
}

fn parse_target(target: &str) -> Result<(String, u16)> {
    match target.rsplit_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str
                .parse()
                .map_err(|_| ProxyError::Protocol("invalid CONNECT port".into()))?;
            Ok((host.to_string(), port))
        }
        None => Ok((target.to_string(), DEFAULT_PORT)),
    }
}

async fn read_headers<S>(stream: &mut S) -> Result<HashMap<String, String>>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut headers = HashMap::new();
    for _ in 0..MAX_HEADERS {
        let line = read_line(stream, Vec::new()).await?;
        if line.trim_end().is_empty() {
            return Ok(headers);
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    Err(ProxyError::Protocol("too many headers".into()))
}

/// Reads bytes starting from `prefix` until a `\r\n` (or bare `\n`) is
/// found, returning the line with the terminator stripped.
async fn read_line<S>(stream: &mut S, prefix: Vec<u8>) -> Result<String>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut buf = prefix;
    loop {
        if buf.len() > MAX_LINE_LEN {
            return Err(ProxyError::Protocol("header line too long".into()));
        }
        if let Some(pos) = find_crlf(&buf) {
            let line = String::from_utf8_lossy(&buf[..pos]).to_string();
            return Ok(line);
        }
        let byte = stream.read_u8().await?;
        buf.push(byte);
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n').map(|pos| {
        if pos > 0 && buf[pos - 1] == b'\r' {
            pos - 1
        } else {
            pos
        }
    })
}

fn authorize(headers: &HashMap<String, String>, auth: &AuthConfig) -> Result<()> {
    let value = headers
        .get("proxy-authorization")
        .ok_or(ProxyError::Auth)?;
    let encoded = value
        .strip_prefix("Basic ")
        .ok_or(ProxyError::Auth)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| ProxyError::Auth)?;
    let decoded = String::from_utf8(decoded).map_err(|_| ProxyError::Auth)?;
    let (user, pass) = decoded.split_once(':').ok_or(ProxyError::Auth)?;

    let ok = auth
        .users
        .get(user)
        .map(|expected| expected == pass)
        .unwrap_or(false);

    if ok {
        Ok(())
    } else {
        Err(ProxyError::Auth)
    }
}

pub async fn write_connection_established<S>(stream: &mut S) -> Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    Ok(())
}

pub async fn write_auth_challenge<S>(stream: &mut S) -> Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    stream
        .write_all(
            b"HTTP/1.1 407 Proxy Authentication Required\r\n\
Proxy-Authenticate: Basic realm=\"Smart Proxy\"\r\n\r\n",
        )
        .await?;
    Ok(())
}

pub async fn write_error<S>(stream: &mut S, status: u16, reason: &str) -> Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    let response = format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\n\r\n");
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::duplex;

    fn no_auth() -> AuthConfig {
        AuthConfig {
            enabled: false,
            users: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn parses_host_and_explicit_port() {
        let (mut client, mut server) = duplex(512);
        tokio::spawn(async move {
            client
                .write_all(b"ECT gateway.example:8443 HTTP/1.1\r\nHost: gateway.example:8443\r\n\r\n")
                .await
                .unwrap();
        });
        let auth = no_auth();
        let (host, port) = handle_request(&mut server, b"CONN".to_vec(), &auth)
            .await
            .unwrap();
        assert_eq!(host, "gateway.example");
        assert_eq!(port, 8443);
    }

    #[tokio::test]
    async fn defaults_to_port_443_when_absent() {
        let (mut client, mut server) = duplex(512);
        tokio::spawn(async move {
            client
                .write_all(b"ECT gateway.example HTTP/1.1\r\nHost: gateway.example\r\n\r\n")
                .await
                .unwrap();
        });
        let auth = no_auth();
        let (host, port) = handle_request(&mut server, b"CONN".to_vec(), &auth)
            .await
            .unwrap();
        assert_eq!(host, "gateway.example");
        assert_eq!(port, 443);
    }

    #[tokio::test]
    async fn auth_enabled_accepts_valid_basic_credentials() {
        let (mut client, mut server) = duplex(512);
        let mut users = HashMap::new();
        users.insert("alice".to_string(), "wonder".to_string());
        let auth = AuthConfig {
            enabled: true,
            users,
        };

        tokio::spawn(async move {
            client.write_all(b"ECT gateway.example:443 HTTP/1.1\r\nHost: gateway.example:443\r\nProxy-Authorization: Basic YWxpY2U6d29uZGVy\r\n\r\n").await.unwrap();
        });

        let (host, port) = handle_request(&mut server, b"CONN".to_vec(), &auth)
            .await
            .unwrap();
        assert_eq!(host, "gateway.example");
        assert_eq!(port, 443);
    }

    #[tokio::test]
    async fn auth_enabled_rejects_missing_header() {
        let (mut client, mut server) = duplex(512);
        let auth = AuthConfig {
            enabled: true,
            users: HashMap::new(),
        };

        tokio::spawn(async move {
            client
                .write_all(b"ECT gateway.example:443 HTTP/1.1\r\nHost: gateway.example:443\r\n\r\n")
                .await
                .unwrap();
        });

        let err = handle_request(&mut server, b"CONN".to_vec(), &auth)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Auth));
    }
}
