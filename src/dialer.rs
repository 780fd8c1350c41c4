//! src/dialer.rs
//! Given a target and ordered candidate runways, establishes the outbound
//! leg: a direct socket bound to the runway's interface, or an upstream
//! CONNECT handshake. Retries per-runway with a bounded count and falls
//! back across runways. Never surfaces a partial connection: on failure
//! all intermediate sockets are closed before trying the next candidate.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};
use crate::platform;
use crate::registry::{Registry, RunwayKey};

pub const DEFAULT_RETRIES: u32 = 2;
const BACKOFF: Duration = Duration::from_millis(100);

pub struct DialOutcome {
    pub stream: TcpStream,
    pub runway: RunwayKey,
}

/// Attempts each candidate runway in order, `retries` times each, with a
/// fixed backoff between attempts. Returns the first success; returns
/// `NoRunwayAvailable` if every candidate is exhausted (candidates is
/// empty) or `UpstreamRefused`/`Timeout` style failures exhaust retries.
/// On success, records the connect latency against `target_key` in
/// `registry` so the `latency` selection policy can rank runways by the
/// destinations sessions actually dial, not only by the fixed
/// reachability targets the prober probes.
#[allow(clippy::too_many_arguments)]
pub async fn dial(
    registry: &Registry,
    target_key: &str,
    display_host: &str,
    resolved_ip: IpAddr,
    port: u16,
    candidates: &[RunwayKey],
    per_attempt_timeout: Duration,
    retries: u32,
) -> Result<DialOutcome> {
    if candidates.is_empty() {
        return Err(ProxyError::NoRunwayAvailable);
    }

    let mut last_err = ProxyError::NoRunwayAvailable;

    for runway in candidates {
        for attempt in 1..=retries.max(1) {
            let start = Instant::now();
            let attempt_result = tokio::time::timeout(
                per_attempt_timeout,
                dial_once(display_host, resolved_ip, port, runway),
            )
            .await;

            match attempt_result {
                Ok(Ok(stream)) => {
                    registry.record_latency(target_key, runway, start.elapsed().as_secs_f64());
                    return Ok(DialOutcome {
                        stream,
                        runway: runway.clone(),
                    });
                }
                Ok(Err(e)) => {
                    debug!(runway = %runway, attempt, error = %e, "dial attempt failed");
                    last_err = e;
                }
                Err(_) => {
                    debug!(runway = %runway, attempt, "dial attempt timed out");
                    last_err = ProxyError::Timeout;
                }
            }

            tokio::time::sleep(BACKOFF).await;
        }
        warn!(runway = %runway, "exhausted retries, falling back to next runway");
    }

    Err(last_err)
}

async fn dial_once(
    display_host: &str,
    resolved_ip: IpAddr,
    port: u16,
    runway: &RunwayKey,
) -> Result<TcpStream> {
    match &runway.upstream {
        None => dial_direct(resolved_ip, port, runway).await,
        Some(upstream) => {
            dial_via_upstream(display_host, port, &upstream.host, upstream.port).await
        }
    }
}

async fn dial_direct(resolved_ip: IpAddr, port: u16, runway: &RunwayKey) -> Result<TcpStream> {
    let socket = if resolved_ip.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    if let Some(src_ip) = platform::iface_ipv4(&runway.interface) {
        if !src_ip.is_unspecified() && resolved_ip.is_ipv4() {
            socket.bind(SocketAddr::new(IpAddr::V4(src_ip), 0))?;
        }
    }

    let stream = socket
        .connect(SocketAddr::new(resolved_ip, port))
        .await?;
    Ok(stream)
}

async fn dial_via_upstream(
    display_host: &str,
    port: u16,
    upstream_host: &str,
    upstream_port: u16,
) -> Result<TcpStream> {
    let mut stream = TcpStream::connect((upstream_host, upstream_port)).await?;

    let request = format!(
        "CONNECT {display_host}:{port} HTTP/1.1\r\nHost: {display_host}:{port}\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf[..n]);
    let status_line = response.lines().next().unwrap_or("");

    if !status_line.contains("200") {
        return Err(ProxyError::UpstreamRefused);
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Interface;

    fn empty_registry() -> Registry {
        Registry::new(&[Interface { name: "eth0".into() }], &[])
    }

    #[tokio::test]
    async fn empty_candidates_yields_no_runway_available() {
        let registry = empty_registry();
        let err = dial(
            &registry,
            "example.com:80",
            "example.com",
            "127.0.0.1".parse().unwrap(),
            80,
            &[],
            Duration::from_millis(50),
            DEFAULT_RETRIES,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProxyError::NoRunwayAvailable));
    }

    #[tokio::test]
    async fn successful_dial_records_latency_against_target_key() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let registry = empty_registry();
        let runway = registry.keys_in_order()[0].clone();
        let target_key = "example.com:443";

        assert!(registry.latest_latency(target_key, &runway).is_none());

        let outcome = dial(
            &registry,
            target_key,
            "example.com",
            "127.0.0.1".parse().unwrap(),
            port,
            &[runway.clone()],
            Duration::from_millis(500),
            1,
        )
        .await
        .unwrap();
        assert_eq!(outcome.runway, runway);

        assert!(registry.latest_latency(target_key, &runway).is_some());
    }

    #[tokio::test]
    async fn falls_back_across_runways_on_refused_connect() {
        // Candidate 1: a port nothing listens on -> refused/timeout.
        // Candidate 2: likewise. Both should be tried and fail without panics.
        let candidates = vec![
            RunwayKey {
                interface: "eth0".into(),
                upstream: None,
            },
            RunwayKey {
                interface: "eth1".into(),
                upstream: None,
            },
        ];
        let registry = empty_registry();
        let err = dial(
            &registry,
            "example.com:1",
            "example.com",
            "127.0.0.1".parse().unwrap(),
            1, // port 1 is reserved; nothing should accept a connection in CI
            &candidates,
            Duration::from_millis(100),
            1,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Io(_) | ProxyError::Timeout | ProxyError::UpstreamRefused
        ));
    }
}
