//! src/session.rs
//! Ties the pieces together for one accepted connection: protocol dispatch,
//! runway selection, fallback dialing, and the bidirectional relay. The
//! first unrecoverable error aborts the session, emits a protocol-appropriate
//! failure reply if the client hasn't been answered yet, and closes both
//! sockets. A session holds its own resolved `RunwayKey` once dialed, so a
//! concurrent config reload cannot invalidate it mid-flight.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use crate::config::Config;
use crate::control::Stats;
use crate::dialer::{self, DEFAULT_RETRIES};
use crate::error::{ProxyError, Result};
use crate::platform;
use crate::protocol::{self, http_connect, socks5, DetectedProtocol};
use crate::registry::Registry;
use crate::relay;
use crate::resolver::{self, DnsCache};
use crate::selector;

struct ActiveGuard<'a> {
    stats: &'a Stats,
}

impl<'a> ActiveGuard<'a> {
    fn new(stats: &'a Stats) -> Self {
        stats.conn_started();
        ActiveGuard { stats }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.stats.conn_ended();
    }
}

/// Handles one accepted client connection end to end. Never panics on
/// ordinary protocol/network failures. `failed_connections` (spec §4.8)
/// only counts sessions that never reached the relay phase — a post-dial
/// relay error has already forwarded bytes and is not a "failed" session.
pub async fn handle<S>(
    mut client: S,
    registry: Arc<Registry>,
    config: Arc<tokio::sync::RwLock<Config>>,
    stats: Arc<Stats>,
    dns_cache: Arc<DnsCache>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _guard = ActiveGuard::new(&stats);

    let established = match establish(&mut client, &registry, &config, &dns_cache).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "session failed before a runway was established");
            stats.conn_failed();
            return;
        }
    };

    let EstablishedSession {
        mut outbound,
        runway,
        target_key,
    } = established;

    info!(runway = %runway, target = %target_key, "relaying session");
    match relay::relay(&mut client, &mut outbound.stream).await {
        Ok((sent, received)) => info!(sent, received, "session closed"),
        Err(e) => warn!(error = %e, "relay ended with an I/O error"),
    }
}

struct EstablishedSession {
    outbound: dialer::DialOutcome,
    runway: crate::registry::RunwayKey,
    target_key: String,
}

/// Runs dispatch, auth, resolution, selection, and dialing, writing the
/// final client reply (success or failure) along the way. Everything up
/// to and including the dial belongs to the "not yet relaying" phase that
/// `failed_connections` accounts for.
async fn establish<S>(
    client: &mut S,
    registry: &Registry,
    config: &tokio::sync::RwLock<Config>,
    dns_cache: &DnsCache,
) -> Result<EstablishedSession>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let detected = protocol::dispatch(client).await?;

    let (host, port) = match &detected {
        DetectedProtocol::Socks5 => {
            let auth = config.read().await.auth.clone();
            match socks5::handle_request(client, &auth).await {
                Ok(target) => target,
                Err(e) => return Err(e),
            }
        }
        DetectedProtocol::HttpConnect(prefix) => {
            let auth = config.read().await.auth.clone();
            match http_connect::handle_request(client, prefix.clone(), &auth).await {
                Ok(target) => target,
                Err(ProxyError::Auth) => {
                    http_connect::write_auth_challenge(client).await?;
                    return Err(ProxyError::Auth);
                }
                Err(e) => {
                    http_connect::write_error(client, 400, "Bad Request").await?;
                    return Err(e);
                }
            }
        }
    };

    let (policy, tcp_timeout) = {
        let cfg = config.read().await;
        (
            cfg.selection_mode,
            Duration::from_secs_f64(cfg.tcp_timeout.max(0.001)),
        )
    };

    let target_key = format!("{host}:{port}");

    let outcome = dial_target(
        registry,
        dns_cache,
        &target_key,
        &host,
        port,
        policy,
        tcp_timeout,
    )
    .await;

    let outbound = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            fail_client(&detected, client, &e).await;
            return Err(e);
        }
    };

    succeed_client(&detected, client, &outbound.runway).await?;

    Ok(EstablishedSession {
        runway: outbound.runway.clone(),
        outbound,
        target_key,
    })
}

#[allow(clippy::too_many_arguments)]
async fn dial_target(
    registry: &Registry,
    dns_cache: &DnsCache,
    target_key: &str,
    host: &str,
    port: u16,
    policy: selector::SelectionPolicy,
    tcp_timeout: Duration,
) -> Result<dialer::DialOutcome> {
    let resolved_ip = resolver::resolve(host, port, dns_cache).await?;

    let candidates = selector::select(registry, target_key, policy);
    if candidates.is_empty() {
        return Err(ProxyError::NoRunwayAvailable);
    }

    dialer::dial(
        registry,
        target_key,
        host,
        resolved_ip,
        port,
        &candidates,
        tcp_timeout,
        DEFAULT_RETRIES,
    )
    .await
}

async fn succeed_client<S>(
    detected: &DetectedProtocol,
    client: &mut S,
    runway: &crate::registry::RunwayKey,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    match detected {
        DetectedProtocol::Socks5 => {
            let bound = platform::iface_ipv4(&runway.interface).unwrap_or(Ipv4Addr::UNSPECIFIED);
            socks5::write_reply(client, socks5::ReplyCode::Succeeded, bound, 0).await
        }
        DetectedProtocol::HttpConnect(_) => http_connect::write_connection_established(client).await,
    }
}

async fn fail_client<S>(detected: &DetectedProtocol, client: &mut S, err: &ProxyError)
where
    S: AsyncWrite + Unpin,
{
    let result = match detected {
        DetectedProtocol::Socks5 => {
            let code = match err {
                ProxyError::NoRunwayAvailable => socks5::ReplyCode::NetworkUnreachable,
                ProxyError::Resolution(_) => socks5::ReplyCode::HostUnreachable,
                _ => socks5::ReplyCode::ConnectionRefused,
            };
            socks5::write_reply(client, code, Ipv4Addr::UNSPECIFIED, 0).await
        }
        DetectedProtocol::HttpConnect(_) => match err {
            ProxyError::Timeout => http_connect::write_error(client, 504, "Gateway Timeout").await,
            _ => http_connect::write_error(client, 502, "Bad Gateway").await,
        },
    };
    if let Err(e) = result {
        warn!(error = %e, "failed to write failure reply to client");
    }
}
